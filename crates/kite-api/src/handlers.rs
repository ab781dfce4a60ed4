//! REST API handlers.
//!
//! Long-running work (deploys, sweeps) is spawned and answered with
//! `202 Accepted`; everything else runs inline against the registry.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use kite_cluster::ClusterError;
use kite_core::{DeployId, ServiceMetadata};
use kite_rollout::{DeployRequest, RolloutError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::ApiState;

/// Description of deployment records opened for API-triggered deploys.
pub const MANUAL_DEPLOY_DESCRIPTION: &str = "manual deploy";

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn status_for(err: &RolloutError) -> StatusCode {
    match err {
        RolloutError::InvalidInput(_) | RolloutError::Metadata(_) => StatusCode::BAD_REQUEST,
        RolloutError::ServiceNotFound(_) | RolloutError::MissingMetadata(_) => StatusCode::NOT_FOUND,
        RolloutError::ServiceExists { .. } | RolloutError::MultipleServices { .. } => StatusCode::CONFLICT,
        RolloutError::Cluster(e) => match e {
            ClusterError::NotFound { .. } => StatusCode::NOT_FOUND,
            ClusterError::AlreadyExists { .. } | ClusterError::Conflict { .. } => StatusCode::CONFLICT,
            ClusterError::Invalid(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn rollout_error(err: RolloutError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        warn!(error = %err, "request failed");
    }
    error_response(&err.to_string(), status)
}

// ── Services ───────────────────────────────────────────────────

/// POST /api/v1/services
pub async fn register_service(State(state): State<ApiState>, Json(meta): Json<ServiceMetadata>) -> Response {
    match state.orchestrator.services().register(meta).await {
        Ok(svc) => (StatusCode::CREATED, ApiResponse::ok(svc)).into_response(),
        Err(e) => rollout_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct FindQuery {
    pub owner: String,
    pub repo: String,
    pub branch: String,
}

/// GET /api/v1/services?owner=&repo=&branch=
pub async fn find_service(State(state): State<ApiState>, Query(q): Query<FindQuery>) -> Response {
    match state.orchestrator.services().find(&q.owner, &q.repo, &q.branch).await {
        Ok((_, meta)) => ApiResponse::ok(meta).into_response(),
        Err(e) => rollout_error(e),
    }
}

/// PUT /api/v1/namespaces/{ns}/services/{svc}/settings
pub async fn update_settings(
    State(state): State<ApiState>,
    Path((ns, svc)): Path<(String, String)>,
    Json(meta): Json<ServiceMetadata>,
) -> Response {
    match state.orchestrator.services().update_settings(&ns, &svc, meta).await {
        Ok(updated) => ApiResponse::ok(updated).into_response(),
        Err(e) => rollout_error(e),
    }
}

#[derive(Debug, Serialize)]
struct ScaleResult {
    replica_group: String,
    replicas: u32,
}

/// POST /api/v1/namespaces/{ns}/services/{svc}/scale/{rg}/{replicas}
pub async fn scale(
    State(state): State<ApiState>,
    Path((ns, svc, rg, replicas)): Path<(String, String, String, u32)>,
) -> Response {
    match state.orchestrator.services().scale(&ns, &svc, &rg, replicas).await {
        Ok(_) => ApiResponse::ok(ScaleResult {
            replica_group: rg,
            replicas,
        })
        .into_response(),
        Err(e) => rollout_error(e),
    }
}

#[derive(Debug, Serialize)]
struct Deleted {
    replica_groups: Vec<String>,
}

/// DELETE /api/v1/namespaces/{ns}/services/{svc}
pub async fn delete_service(State(state): State<ApiState>, Path((ns, svc)): Path<(String, String)>) -> Response {
    match state.orchestrator.services().delete_service(&ns, &svc).await {
        Ok(replica_groups) => ApiResponse::ok(Deleted { replica_groups }).into_response(),
        Err(e) => rollout_error(e),
    }
}

/// DELETE /api/v1/namespaces/{ns}
pub async fn delete_namespace(State(state): State<ApiState>, Path(ns): Path<String>) -> Response {
    match state.orchestrator.services().delete_namespace(&ns).await {
        Ok(()) => ApiResponse::ok(format!("namespace {ns} deleted")).into_response(),
        Err(e) => rollout_error(e),
    }
}

// ── Deploy / Activate ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct DeployQuery {
    #[serde(default)]
    pub image: String,
    /// Deployment record opened by the caller.
    pub deploy_id: Option<DeployId>,
}

#[derive(Debug, Serialize)]
struct DeployAccepted {
    deploy_id: DeployId,
    log_url: String,
}

/// POST /api/v1/namespaces/{ns}/services/{svc}/deploy/{sha}?image=&deploy_id=
///
/// Opens a deployment record when the caller did not, then runs the
/// deploy detached. `Location` points at the deploy's log view.
pub async fn deploy(
    State(state): State<ApiState>,
    Path((ns, svc, sha)): Path<(String, String, String)>,
    Query(q): Query<DeployQuery>,
) -> Response {
    if q.image.trim().is_empty() {
        return error_response("image required", StatusCode::BAD_REQUEST);
    }
    let meta = match state.orchestrator.services().get(&ns, &svc).await {
        Ok((_, meta)) => meta,
        Err(e) => return rollout_error(e),
    };
    let deploy_id = match q.deploy_id {
        Some(id) => id,
        None => match state
            .orchestrator
            .create_record(&meta, MANUAL_DEPLOY_DESCRIPTION)
            .await
        {
            Ok(id) => id,
            Err(e) => return rollout_error(e),
        },
    };

    // Detached: the outcome goes to the sinks, not to this caller.
    drop(state.orchestrator.spawn(DeployRequest {
        metadata: meta,
        sha: sha.clone(),
        image: q.image.clone(),
        deploy_id: Some(deploy_id),
    }));
    info!(namespace = %ns, service = %svc, %sha, image = %q.image, deploy_id, "deploy accepted");

    let log_url = state.server.log_url_for(deploy_id);
    (
        StatusCode::ACCEPTED,
        [(header::LOCATION, log_url.clone())],
        ApiResponse::ok(DeployAccepted { deploy_id, log_url }),
    )
        .into_response()
}

/// PUT /api/v1/namespaces/{ns}/services/{svc}/activate/{sha}/{deploy_id}
pub async fn activate(
    State(state): State<ApiState>,
    Path((ns, svc, sha, deploy_id)): Path<(String, String, String, DeployId)>,
) -> Response {
    match state.cutover.activate(&ns, &svc, &sha, deploy_id).await {
        Ok(updated) => ApiResponse::ok(updated).into_response(),
        Err(e) => rollout_error(e),
    }
}

// ── Garbage collection ─────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct GcQuery {
    #[serde(default)]
    pub dryrun: bool,
}

/// POST /api/v1/gc?dryrun=
pub async fn garbage_collect(State(state): State<ApiState>, Query(q): Query<GcQuery>) -> Response {
    drop(state.gc.spawn_sweep(q.dryrun, state.gc_ttl));
    info!(dry_run = q.dryrun, ttl = ?state.gc_ttl, "garbage collection initiated");
    (StatusCode::ACCEPTED, ApiResponse::ok("garbage collection initiated")).into_response()
}

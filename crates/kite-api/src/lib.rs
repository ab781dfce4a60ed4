//! kite-api: REST API for kite.
//!
//! Thin glue over the rollout and GC crates. Deploys and sweeps are
//! started on their own tasks and answered with `202 Accepted`; the
//! caller follows progress through notifications, the status sink and
//! the log view URL handed back.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/services` | Register a service |
//! | GET | `/api/v1/services?owner=&repo=&branch=` | Service metadata by source coordinates |
//! | PUT | `/api/v1/namespaces/{ns}/services/{svc}/settings` | Replace service metadata |
//! | POST | `/api/v1/namespaces/{ns}/services/{svc}/deploy/{sha}?image=&deploy_id=` | Start a deploy |
//! | PUT | `/api/v1/namespaces/{ns}/services/{svc}/activate/{sha}/{deploy_id}` | Cut over to a revision |
//! | POST | `/api/v1/namespaces/{ns}/services/{svc}/scale/{rg}/{replicas}` | Scale a replica group |
//! | DELETE | `/api/v1/namespaces/{ns}/services/{svc}` | Delete a service and its replica groups |
//! | DELETE | `/api/v1/namespaces/{ns}` | Delete a namespace |
//! | POST | `/api/v1/gc?dryrun=` | Start a garbage collection sweep |

pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{delete, get, post, put};
use kite_core::config::ServerConfig;
use kite_gc::GarbageCollector;
use kite_rollout::{CutoverSwitch, Orchestrator};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub cutover: Arc<CutoverSwitch>,
    pub gc: Arc<GarbageCollector>,
    /// Retention passed to sweeps started through the API.
    pub gc_ttl: Duration,
    pub server: ServerConfig,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/services", get(handlers::find_service).post(handlers::register_service))
        .route("/namespaces/{ns}", delete(handlers::delete_namespace))
        .route("/namespaces/{ns}/services/{svc}", delete(handlers::delete_service))
        .route("/namespaces/{ns}/services/{svc}/settings", put(handlers::update_settings))
        .route("/namespaces/{ns}/services/{svc}/deploy/{sha}", post(handlers::deploy))
        .route(
            "/namespaces/{ns}/services/{svc}/activate/{sha}/{deploy_id}",
            put(handlers::activate),
        )
        .route(
            "/namespaces/{ns}/services/{svc}/scale/{rg}/{replicas}",
            post(handlers::scale),
        )
        .route("/gc", post(handlers::garbage_collect))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}

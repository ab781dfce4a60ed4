//! Deployment status sinks.

use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use kite_core::DeployId;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{SinkError, SinkResult};

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentState {
    Pending,
    Success,
    Failure,
    Error,
}

impl DeploymentState {
    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentState::Pending => "pending",
            DeploymentState::Success => "success",
            DeploymentState::Failure => "failure",
            DeploymentState::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, DeploymentState::Pending)
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source-control deployment records.
#[async_trait]
pub trait StatusSink: Send + Sync {
    /// Open a deployment record for `git_ref` and return its id.
    async fn create_deployment(
        &self,
        org: &str,
        repo: &str,
        git_ref: &str,
        description: &str,
    ) -> SinkResult<DeployId>;

    async fn set_deployment_state(
        &self,
        org: &str,
        repo: &str,
        id: DeployId,
        state: DeploymentState,
    ) -> SinkResult<()>;
}

// ── GitHub ────────────────────────────────────────────────────────

#[derive(Serialize)]
struct CreateDeployment<'a> {
    #[serde(rename = "ref")]
    git_ref: &'a str,
    description: &'a str,
    auto_merge: bool,
    required_contexts: [&'a str; 0],
}

#[derive(Deserialize)]
struct DeploymentCreated {
    id: DeployId,
}

#[derive(Serialize)]
struct CreateStatus {
    state: DeploymentState,
}

/// GitHub Deployments REST API.
pub struct GitHubStatusSink {
    http: reqwest::Client,
    api: String,
    token: String,
}

impl GitHubStatusSink {
    pub fn new(api: &str, token: &str) -> SinkResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("kite/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            api: api.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    async fn post<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> SinkResult<reqwest::Response> {
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .json(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Status {
                endpoint: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl StatusSink for GitHubStatusSink {
    async fn create_deployment(
        &self,
        org: &str,
        repo: &str,
        git_ref: &str,
        description: &str,
    ) -> SinkResult<DeployId> {
        info!(%org, %repo, %git_ref, "creating deployment record");
        let url = format!("{}/repos/{org}/{repo}/deployments", self.api);
        let body = CreateDeployment {
            git_ref,
            description,
            auto_merge: false,
            required_contexts: [],
        };
        let created: DeploymentCreated = self.post(&url, &body).await?.json().await?;
        Ok(created.id)
    }

    async fn set_deployment_state(
        &self,
        org: &str,
        repo: &str,
        id: DeployId,
        state: DeploymentState,
    ) -> SinkResult<()> {
        let url = format!("{}/repos/{org}/{repo}/deployments/{id}/statuses", self.api);
        self.post(&url, &CreateStatus { state }).await?;
        debug!(%org, %repo, deploy_id = id, %state, "deployment state reported");
        Ok(())
    }
}

// ── Log only ──────────────────────────────────────────────────────

/// Writes records to the log and hands out sequential ids.
#[derive(Debug, Default)]
pub struct LogStatusSink {
    next_id: AtomicU64,
}

#[async_trait]
impl StatusSink for LogStatusSink {
    async fn create_deployment(
        &self,
        org: &str,
        repo: &str,
        git_ref: &str,
        description: &str,
    ) -> SinkResult<DeployId> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        info!(%org, %repo, %git_ref, %description, deploy_id = id, "deployment record created");
        Ok(id)
    }

    async fn set_deployment_state(
        &self,
        org: &str,
        repo: &str,
        id: DeployId,
        state: DeploymentState,
    ) -> SinkResult<()> {
        info!(%org, %repo, deploy_id = id, %state, "deployment state");
        Ok(())
    }
}

// ── In memory ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Created {
        org: String,
        repo: String,
        git_ref: String,
        id: DeployId,
    },
    State {
        org: String,
        repo: String,
        id: DeployId,
        state: DeploymentState,
    },
}

/// Records every call. Can be told to reject record creation.
#[derive(Debug, Default)]
pub struct MemoryStatusSink {
    events: Mutex<Vec<StatusEvent>>,
    next_id: AtomicU64,
    reject_creates: AtomicBool,
}

impl MemoryStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject_creates(&self, reject: bool) {
        self.reject_creates.store(reject, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// States reported for one deployment, in order.
    pub fn states(&self, id: DeployId) -> Vec<DeploymentState> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                StatusEvent::State { id: got, state, .. } if got == id => Some(state),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: StatusEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}

#[async_trait]
impl StatusSink for MemoryStatusSink {
    async fn create_deployment(
        &self,
        org: &str,
        repo: &str,
        git_ref: &str,
        _description: &str,
    ) -> SinkResult<DeployId> {
        if self.reject_creates.load(Ordering::SeqCst) {
            return Err(SinkError::Rejected(format!("deployment for {org}/{repo}@{git_ref}")));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.record(StatusEvent::Created {
            org: org.to_string(),
            repo: repo.to_string(),
            git_ref: git_ref.to_string(),
            id,
        });
        Ok(id)
    }

    async fn set_deployment_state(
        &self,
        org: &str,
        repo: &str,
        id: DeployId,
        state: DeploymentState,
    ) -> SinkResult<()> {
        self.record(StatusEvent::State {
            org: org.to_string(),
            repo: repo.to_string(),
            id,
            state,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::Arc;

    type Seen = Arc<Mutex<Vec<(String, serde_json::Value, Option<String>)>>>;

    async fn fake_github() -> (String, Seen) {
        let seen: Seen = Arc::default();

        async fn create(
            State(seen): State<Seen>,
            Path((org, repo)): Path<(String, String)>,
            headers: HeaderMap,
            Json(body): Json<serde_json::Value>,
        ) -> Json<serde_json::Value> {
            let auth = headers
                .get("authorization")
                .map(|v| v.to_str().unwrap().to_string());
            seen.lock().unwrap().push((format!("{org}/{repo}"), body, auth));
            Json(serde_json::json!({ "id": 4242 }))
        }

        async fn status(
            State(seen): State<Seen>,
            Path((org, repo, id)): Path<(String, String, u64)>,
            Json(body): Json<serde_json::Value>,
        ) -> Json<serde_json::Value> {
            seen.lock().unwrap().push((format!("{org}/{repo}/{id}"), body, None));
            Json(serde_json::json!({}))
        }

        let app = Router::new()
            .route("/repos/{org}/{repo}/deployments", post(create))
            .route("/repos/{org}/{repo}/deployments/{id}/statuses", post(status))
            .with_state(seen.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{addr}"), seen)
    }

    #[tokio::test]
    async fn github_sink_creates_deployment_and_status() {
        let (api, seen) = fake_github().await;
        let sink = GitHubStatusSink::new(&api, "secret").unwrap();

        let id = sink
            .create_deployment("kakao", "api", "main", "deploy main")
            .await
            .unwrap();
        assert_eq!(id, 4242);
        sink.set_deployment_state("kakao", "api", id, DeploymentState::Success)
            .await
            .unwrap();

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, "kakao/api");
        assert_eq!(seen[0].1["ref"], "main");
        assert_eq!(seen[0].1["auto_merge"], false);
        assert_eq!(seen[0].2.as_deref(), Some("Bearer secret"));
        assert_eq!(seen[1].0, "kakao/api/4242");
        assert_eq!(seen[1].1["state"], "success");
    }

    #[tokio::test]
    async fn github_sink_surfaces_http_errors() {
        let (api, _) = fake_github().await;
        let err = GitHubStatusSink::new(&format!("{api}/nope"), "secret")
            .unwrap()
            .create_deployment("kakao", "api", "main", "")
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn memory_sink_records_in_order() {
        let sink = MemoryStatusSink::new();
        let id = sink.create_deployment("o", "r", "main", "").await.unwrap();
        sink.set_deployment_state("o", "r", id, DeploymentState::Pending).await.unwrap();
        sink.set_deployment_state("o", "r", id, DeploymentState::Failure).await.unwrap();
        assert_eq!(
            sink.states(id),
            vec![DeploymentState::Pending, DeploymentState::Failure]
        );
        assert_eq!(sink.events().len(), 3);

        sink.reject_creates(true);
        assert!(sink.create_deployment("o", "r", "main", "").await.is_err());
    }

    #[tokio::test]
    async fn log_sink_hands_out_sequential_ids() {
        let sink = LogStatusSink::default();
        assert_eq!(sink.create_deployment("o", "r", "a", "").await.unwrap(), 1);
        assert_eq!(sink.create_deployment("o", "r", "b", "").await.unwrap(), 2);
    }

    #[test]
    fn state_names() {
        assert_eq!(DeploymentState::Failure.to_string(), "failure");
        assert!(!DeploymentState::Pending.is_terminal());
        assert_eq!(
            serde_json::to_value(DeploymentState::Success).unwrap(),
            serde_json::json!("success")
        );
    }
}

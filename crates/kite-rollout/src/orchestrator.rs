//! Deployment orchestrator: one revision from image to live traffic.
//!
//! ```text
//! deploy id ─► pending ─► validate ─► "deploy started"
//!                                         │
//!                 UpsertingWorkload ◄─────┘   WorkloadEngine::upsert
//!                         │
//!                 CuttingOver                 ServiceRegistry::upsert_service
//!                         │                   (selector = base + sha + deploy_id)
//!                 Succeeded / Failed  ─► "deploy success" | "deploy failed"
//! ```
//!
//! Exactly one terminal state reaches the status sink per deploy id. It
//! defaults to failure and is sent even if the attempt is dropped midway.

use std::sync::Arc;

use kite_cluster::Service;
use kite_core::metadata::LOADBALANCER_ANNOTATION;
use kite_core::{DeployId, Revision, ServiceMetadata, naming};
use kite_notify::{DeploymentState, Notifier, StatusSink};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span, warn};

use crate::cutover::revision_selector;
use crate::error::RolloutResult;
use crate::services::ServiceRegistry;
use crate::workload::{UpsertRequest, WorkloadEngine};

/// Description of deployment records opened by the orchestrator itself.
pub const AUTO_DEPLOY_DESCRIPTION: &str = "kite deploy";

/// Current phase of a deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum DeployPhase {
    /// Deploy id obtained, nothing touched yet.
    Pending,
    /// Creating the ReplicaGroup and waiting for it to serve.
    UpsertingWorkload,
    /// Pointing the Service at the new revision.
    CuttingOver,
    Succeeded,
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub metadata: ServiceMetadata,
    pub sha: String,
    pub image: String,
    /// Record opened by the caller. When absent, one is opened here.
    pub deploy_id: Option<DeployId>,
}

/// What happened to one deploy attempt.
#[derive(Debug, Clone, Serialize)]
pub struct DeployReport {
    pub namespace: String,
    pub service: String,
    pub sha: String,
    pub image: String,
    pub deploy_id: Option<DeployId>,
    #[serde(flatten)]
    pub phase: DeployPhase,
    /// Terminal state sent to the status sink.
    pub state: DeploymentState,
    pub replica_group: Option<String>,
    pub domain: Option<String>,
}

impl DeployReport {
    fn new(namespace: &str, req: &DeployRequest) -> Self {
        Self {
            namespace: namespace.to_string(),
            service: req.metadata.service.clone(),
            sha: req.sha.clone(),
            image: req.image.clone(),
            deploy_id: req.deploy_id,
            phase: DeployPhase::Pending,
            state: DeploymentState::Pending,
            replica_group: None,
            domain: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.phase == DeployPhase::Succeeded
    }

    fn advance(&mut self, phase: DeployPhase) {
        info!(from = ?self.phase, to = ?phase, "deploy phase");
        self.phase = phase;
    }

    fn fail(&mut self, state: DeploymentState, reason: String) {
        self.state = state;
        self.advance(DeployPhase::Failed { reason });
    }
}

/// Sends the terminal deployment state once. If dropped before
/// [`FinalStatus::finish`], sends failure from a detached task.
struct FinalStatus {
    sink: Arc<dyn StatusSink>,
    org: String,
    repo: String,
    id: DeployId,
    sent: bool,
}

impl FinalStatus {
    fn new(sink: Arc<dyn StatusSink>, meta: &ServiceMetadata, id: DeployId) -> Self {
        Self {
            sink,
            org: meta.github_org.clone(),
            repo: meta.github_repo.clone(),
            id,
            sent: false,
        }
    }

    async fn finish(mut self, state: DeploymentState) {
        self.sent = true;
        send_state(self.sink.as_ref(), &self.org, &self.repo, self.id, state).await;
    }
}

impl Drop for FinalStatus {
    fn drop(&mut self) {
        if self.sent {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(deploy_id = self.id, "no runtime left to report deploy failure");
            return;
        };
        let sink = self.sink.clone();
        let (org, repo, id) = (std::mem::take(&mut self.org), std::mem::take(&mut self.repo), self.id);
        runtime.spawn(async move {
            send_state(sink.as_ref(), &org, &repo, id, DeploymentState::Failure).await;
        });
    }
}

async fn send_state(sink: &dyn StatusSink, org: &str, repo: &str, id: DeployId, state: DeploymentState) {
    if let Err(e) = sink.set_deployment_state(org, repo, id, state).await {
        warn!(%org, %repo, deploy_id = id, %state, error = %e, "failed to report deployment state");
    }
}

/// Domain from the Service's `loadbalancer` annotation (`{"domain": ...}`).
pub fn load_balancer_domain(svc: &Service) -> Option<String> {
    let raw = svc.meta.annotations.get(LOADBALANCER_ANNOTATION)?;
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    value
        .get("domain")
        .and_then(|d| d.as_str())
        .filter(|d| !d.is_empty())
        .map(str::to_string)
}

/// Runs deploys. Two deploys of the same Service are not serialized; the
/// last cutover to write the selector wins.
pub struct Orchestrator {
    engine: WorkloadEngine,
    services: Arc<ServiceRegistry>,
    status: Arc<dyn StatusSink>,
    notifier: Arc<dyn Notifier>,
}

impl Orchestrator {
    pub fn new(
        engine: WorkloadEngine,
        services: Arc<ServiceRegistry>,
        status: Arc<dyn StatusSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            engine,
            services,
            status,
            notifier,
        }
    }

    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    /// Open a deployment record for the Service's branch.
    pub async fn create_record(&self, meta: &ServiceMetadata, description: &str) -> RolloutResult<DeployId> {
        let id = self
            .status
            .create_deployment(&meta.github_org, &meta.github_repo, &meta.git_branch, description)
            .await?;
        Ok(id)
    }

    /// Run [`Self::deploy`] on its own task.
    pub fn spawn(self: &Arc<Self>, req: DeployRequest) -> JoinHandle<DeployReport> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.deploy(req).await })
    }

    /// Deploy one revision. Never fails; the outcome is reported to the
    /// sinks and returned.
    pub async fn deploy(&self, req: DeployRequest) -> DeployReport {
        let meta = &req.metadata;
        let namespace = naming::namespace_for_org(&meta.github_org);
        let mut report = DeployReport::new(&namespace, &req);

        let deploy_id = match req.deploy_id {
            Some(id) => id,
            None => match self.create_record(meta, AUTO_DEPLOY_DESCRIPTION).await {
                Ok(id) => id,
                Err(e) => {
                    let msg = format!(
                        "error while creating deployment record for {}/{}/{}: {e}",
                        meta.github_org, meta.github_repo, meta.git_branch
                    );
                    error!(%namespace, service = %meta.service, sha = %req.sha, error = %e, "deployment record not created");
                    self.notifier.notify(&meta.notification, &msg).await;
                    report.fail(DeploymentState::Error, msg);
                    return report;
                }
            },
        };
        report.deploy_id = Some(deploy_id);

        let span = info_span!(
            "deploy",
            %namespace,
            service = %meta.service,
            sha = %req.sha,
            image = %req.image,
            deploy_id
        );
        self.run(&req, &namespace, deploy_id, report).instrument(span).await
    }

    async fn run(&self, req: &DeployRequest, ns: &str, id: DeployId, mut report: DeployReport) -> DeployReport {
        let meta = &req.metadata;
        send_state(
            self.status.as_ref(),
            &meta.github_org,
            &meta.github_repo,
            id,
            DeploymentState::Pending,
        )
        .await;
        let final_status = FinalStatus::new(self.status.clone(), meta, id);

        if let Some(reason) = invalid_revision(&req.sha, &req.image) {
            warn!("{reason}");
            self.notifier.notify(&meta.notification, &reason).await;
            report.fail(DeploymentState::Failure, reason);
            final_status.finish(DeploymentState::Failure).await;
            return report;
        }

        let started = format!(
            "deploy started: {}/{}/{}:{}",
            meta.github_org, meta.github_repo, meta.git_branch, req.sha
        );
        info!("{started}");
        self.notifier.notify(&meta.notification, &started).await;

        match self.roll_out(req, ns, id, &mut report).await {
            Ok(()) => {
                let msg = match &report.domain {
                    Some(domain) => format!("deploy success: https://{domain}"),
                    None => format!(
                        "deploy success: {}/{}/{}:{}",
                        meta.github_org, meta.github_repo, meta.git_branch, req.sha
                    ),
                };
                info!("{msg}");
                self.notifier.notify(&meta.notification, &msg).await;
                report.state = DeploymentState::Success;
                report.advance(DeployPhase::Succeeded);
                final_status.finish(DeploymentState::Success).await;
            }
            Err(e) => {
                let msg = format!("deploy failed: {e}");
                error!(phase = ?report.phase, error = %e, "deploy failed");
                self.notifier.notify(&meta.notification, &msg).await;
                report.fail(DeploymentState::Failure, e.to_string());
                final_status.finish(DeploymentState::Failure).await;
            }
        }
        report
    }

    async fn roll_out(&self, req: &DeployRequest, ns: &str, id: DeployId, report: &mut DeployReport) -> RolloutResult<()> {
        let meta = &req.metadata;
        let ports = if meta.container_ports.is_empty() {
            meta.resolve_ports()?
        } else {
            meta.container_ports.clone()
        };
        let revision = Revision::new(&meta.github_repo, &meta.git_branch, &req.sha, id);
        let labels = revision.labels();

        report.advance(DeployPhase::UpsertingWorkload);
        let group = self
            .engine
            .upsert(&UpsertRequest {
                namespace: ns.to_string(),
                generate_name: revision.generate_name(),
                image: req.image.clone(),
                labels: labels.clone(),
                selector: labels,
                env: meta.environment_map(),
                replicas: meta.replicas,
                ports: ports.clone(),
                probe_path: meta.probe_path.clone(),
                deploy_id: id,
            })
            .await?;
        report.replica_group = Some(group.meta.name);

        report.advance(DeployPhase::CuttingOver);
        let mut stored = meta.clone();
        stored.namespace = ns.to_string();
        let annotation = stored.to_annotation()?;
        let base = Revision::base_labels(&meta.github_repo, &meta.git_branch);
        let svc = self
            .services
            .upsert_service(
                ns,
                &meta.service,
                &base,
                &revision_selector(&base, &req.sha, id),
                Some(annotation),
                &ports,
            )
            .await?;
        report.domain = load_balancer_domain(&svc);
        Ok(())
    }
}

fn invalid_revision(sha: &str, image: &str) -> Option<String> {
    if image.trim().is_empty() {
        return Some(format!("invalid image name: {image:?}"));
    }
    if sha.trim().is_empty() {
        return Some("invalid revision: empty sha".to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::RegistrySettings;
    use kite_cluster::{ClusterClient, ClusterStore, LabelSelector};
    use kite_core::NotificationTarget;
    use kite_core::config::ClusterConfig;
    use kite_core::labels::{LABEL_DEPLOY_ID, LABEL_SHA};
    use kite_health::{ProbeSettings, ReadinessProber, StaticDialer};
    use kite_notify::{MemoryNotifier, MemoryStatusSink, StatusEvent};
    use std::time::Duration;

    const NS: &str = "kakao";

    struct Harness {
        store: ClusterStore,
        status: Arc<MemoryStatusSink>,
        notifier: Arc<MemoryNotifier>,
        orchestrator: Arc<Orchestrator>,
    }

    fn metadata() -> ServiceMetadata {
        ServiceMetadata {
            service: "api".to_string(),
            github_org: "kakao".to_string(),
            github_repo: "api".to_string(),
            git_branch: "main".to_string(),
            http_port: "8080".to_string(),
            replicas: 2,
            notification: vec![NotificationTarget::new("slack", "https://hooks/team")],
            ..Default::default()
        }
    }

    async fn harness(ready: bool) -> Harness {
        let store = ClusterStore::open_in_memory().unwrap();
        store.set_start_pods_running(true);
        let client: Arc<dyn ClusterClient> = Arc::new(store.clone());
        let config = ClusterConfig {
            poll_interval: Duration::from_secs(1),
            poll_timeout: Duration::from_secs(20),
            ..ClusterConfig::default()
        };
        let prober = ReadinessProber::new(
            client.clone(),
            Arc::new(StaticDialer(ready)),
            ProbeSettings::from(&config),
        );
        let engine = WorkloadEngine::new(client.clone(), prober, config);
        let services = Arc::new(ServiceRegistry::new(
            client,
            RegistrySettings {
                max_replicas: 10,
                load_balancer: "nginx".to_string(),
                reserved_namespaces: vec![],
            },
        ));
        services.register(metadata()).await.unwrap();

        let status = Arc::new(MemoryStatusSink::new());
        let notifier = Arc::new(MemoryNotifier::new());
        let orchestrator = Arc::new(Orchestrator::new(engine, services, status.clone(), notifier.clone()));
        Harness {
            store,
            status,
            notifier,
            orchestrator,
        }
    }

    fn request(sha: &str, image: &str, deploy_id: Option<DeployId>) -> DeployRequest {
        DeployRequest {
            metadata: metadata(),
            sha: sha.to_string(),
            image: image.to_string(),
            deploy_id,
        }
    }

    async fn group_count(store: &ClusterStore) -> usize {
        store
            .list_replica_groups(NS, &LabelSelector::everything())
            .await
            .unwrap()
            .len()
    }

    #[tokio::test(start_paused = true)]
    async fn successful_deploy_cuts_over() {
        let h = harness(true).await;

        let report = h.orchestrator.deploy(request("abc", "api:abc", None)).await;

        assert!(report.succeeded(), "{report:?}");
        assert_eq!(report.deploy_id, Some(1));
        assert_eq!(report.state, DeploymentState::Success);
        assert!(report.replica_group.is_some());
        assert_eq!(
            h.status.states(1),
            vec![DeploymentState::Pending, DeploymentState::Success]
        );
        assert!(matches!(&h.status.events()[0], StatusEvent::Created { git_ref, .. } if git_ref == "main"));
        assert_eq!(
            h.notifier.messages(),
            vec!["deploy started: kakao/api/main:abc", "deploy success: kakao/api/main:abc"]
        );
        assert_eq!(h.notifier.endpoints()[0], vec!["https://hooks/team".to_string()]);

        let svc = h.store.get_service(NS, "api").await.unwrap();
        assert_eq!(svc.spec.selector.get(LABEL_SHA), Some("abc"));
        assert_eq!(svc.spec.selector.get(LABEL_DEPLOY_ID), Some("1"));
        assert_eq!(group_count(&h.store).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn success_message_names_the_domain() {
        let h = harness(true).await;
        let mut svc = h.store.get_service(NS, "api").await.unwrap();
        svc.meta.annotations.insert(
            LOADBALANCER_ANNOTATION.to_string(),
            r#"{"domain":"api.kakao.example"}"#.to_string(),
        );
        h.store.update_service(&svc).await.unwrap();

        let report = h.orchestrator.deploy(request("abc", "api:abc", Some(9))).await;

        assert_eq!(report.domain.as_deref(), Some("api.kakao.example"));
        assert_eq!(
            h.notifier.messages().last().map(String::as_str),
            Some("deploy success: https://api.kakao.example")
        );
        // Caller-supplied id: no record opened here.
        assert!(h.status.events().iter().all(|e| !matches!(e, StatusEvent::Created { .. })));
        assert_eq!(
            h.status.states(9),
            vec![DeploymentState::Pending, DeploymentState::Success]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unready_revision_fails_without_cutover() {
        let h = harness(false).await;

        let report = h.orchestrator.deploy(request("abc", "api:abc", None)).await;

        assert!(!report.succeeded());
        assert_eq!(
            h.status.states(1),
            vec![DeploymentState::Pending, DeploymentState::Failure]
        );
        let messages = h.notifier.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[1].starts_with("deploy failed: "), "{}", messages[1]);

        let svc = h.store.get_service(NS, "api").await.unwrap();
        assert_eq!(svc.spec.selector.get(LABEL_SHA), None);
        assert_eq!(group_count(&h.store).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_deploy_keeps_previous_revision_live() {
        let h = harness(true).await;
        assert!(h.orchestrator.deploy(request("abc", "api:abc", Some(1))).await.succeeded());

        h.store.set_start_pods_running(false);
        let report = h.orchestrator.deploy(request("def", "api:def", Some(2))).await;

        assert!(!report.succeeded());
        let svc = h.store.get_service(NS, "api").await.unwrap();
        assert_eq!(svc.spec.selector.get(LABEL_SHA), Some("abc"));
        assert_eq!(svc.spec.selector.get(LABEL_DEPLOY_ID), Some("1"));
        assert_eq!(group_count(&h.store).await, 1);
    }

    #[tokio::test]
    async fn empty_image_touches_nothing() {
        let h = harness(true).await;

        let report = h.orchestrator.deploy(request("abc", "", None)).await;

        assert!(matches!(report.phase, DeployPhase::Failed { .. }));
        assert_eq!(
            h.status.states(1),
            vec![DeploymentState::Pending, DeploymentState::Failure]
        );
        assert_eq!(h.notifier.messages(), vec!["invalid image name: \"\""]);
        assert_eq!(group_count(&h.store).await, 0);
    }

    #[tokio::test]
    async fn record_creation_failure_stops_early() {
        let h = harness(true).await;
        h.status.reject_creates(true);

        let report = h.orchestrator.deploy(request("abc", "api:abc", None)).await;

        assert_eq!(report.deploy_id, None);
        assert_eq!(report.state, DeploymentState::Error);
        assert!(h.status.events().is_empty());
        let messages = h.notifier.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("error while creating deployment record"));
        assert_eq!(group_count(&h.store).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_deploy_still_reports_failure() {
        let h = harness(false).await;

        let handle = h.orchestrator.spawn(request("abc", "api:abc", Some(5)));
        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            h.status.states(5),
            vec![DeploymentState::Pending, DeploymentState::Failure]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_deploy_can_be_awaited() {
        let h = harness(true).await;

        let report = h
            .orchestrator
            .spawn(request("abc", "api:abc", Some(3)))
            .await
            .unwrap();

        assert!(report.succeeded());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["phase"], "succeeded");
        assert_eq!(json["state"], "success");
    }

    #[test]
    fn domain_from_annotation() {
        let mut svc = Service {
            meta: kite_cluster::ObjectMeta::named(NS, "api"),
            spec: Default::default(),
        };
        assert_eq!(load_balancer_domain(&svc), None);
        svc.meta
            .annotations
            .insert(LOADBALANCER_ANNOTATION.to_string(), "not json".to_string());
        assert_eq!(load_balancer_domain(&svc), None);
        svc.meta
            .annotations
            .insert(LOADBALANCER_ANNOTATION.to_string(), r#"{"domain":"x.io"}"#.to_string());
        assert_eq!(load_balancer_domain(&svc).as_deref(), Some("x.io"));
    }
}

//! Workload upsert engine.
//!
//! Creates a fresh ReplicaGroup for one revision and gates it on
//! readiness. Every failure between creation and the desired-replica
//! check deletes the group again, so a failed upsert leaves nothing new
//! behind. Once the group is confirmed serving, its readiness probe is
//! tuned to the startup delay actually observed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use kite_cluster::{
    ClusterClient, Container, ContainerPort, ObjectMeta, PodTemplate, Probe, ReplicaGroup, ReplicaGroupSpec,
    ResourceList, Resources, cascade,
};
use kite_core::config::ClusterConfig;
use kite_core::{DeployId, Labels};
use kite_health::{ProbeError, ReadinessProber};
use tracing::{error, info, warn};

use crate::error::{RolloutError, RolloutResult};

/// Annotation recording the HTTP path a revision asked to be probed on.
pub const PROBE_PATH_ANNOTATION: &str = "kite/probe-path";

const DEFAULT_PROBE_PATH: &str = "/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertRequest {
    pub namespace: String,
    pub generate_name: String,
    pub image: String,
    pub labels: Labels,
    pub selector: Labels,
    pub env: BTreeMap<String, String>,
    pub replicas: u32,
    /// Container ports. The first one is the one probed.
    pub ports: Vec<u16>,
    pub probe_path: String,
    pub deploy_id: DeployId,
}

pub struct WorkloadEngine {
    client: Arc<dyn ClusterClient>,
    prober: ReadinessProber,
    config: ClusterConfig,
}

impl WorkloadEngine {
    pub fn new(client: Arc<dyn ClusterClient>, prober: ReadinessProber, config: ClusterConfig) -> Self {
        Self {
            client,
            prober,
            config,
        }
    }

    /// Create the group, wait for it to serve, then patch its readiness
    /// probe. Returns the group as last written.
    pub async fn upsert(&self, req: &UpsertRequest) -> RolloutResult<ReplicaGroup> {
        validate(req)?;
        let first_port = req.ports[0];
        let poll_timeout = self.prober.settings().poll_timeout;

        let created = self.client.create_replica_group(&self.build(req)).await?;
        let name = created.meta.name.clone();
        info!(
            namespace = %req.namespace,
            replica_group = %name,
            replicas = req.replicas,
            deploy_id = req.deploy_id,
            "replica group created"
        );

        let readiness = match self.prober.wait_pods_ready(&created).await {
            Ok(readiness) => readiness,
            Err(e) => return Err(self.roll_back(&req.namespace, &name, e).await),
        };
        let initial_delay = self
            .config
            .clamp_initial_delay(readiness.initial_delay.unwrap_or(Duration::ZERO));

        if let Err(e) = self.prober.wait_desired_replicas(&req.namespace, &name).await {
            return Err(self.roll_back(&req.namespace, &name, e).await);
        }
        info!(namespace = %req.namespace, replica_group = %name, ?initial_delay, "replica group ready");

        // The group is serving from here on; a failed patch is reported
        // but the group stays.
        let patch = async {
            let mut group = self.client.get_replica_group(&req.namespace, &name).await?;
            for container in &mut group.spec.template.containers {
                container.readiness_probe = Some(Probe::tcp(first_port, initial_delay, poll_timeout));
            }
            self.client.update_replica_group(&group).await
        };
        patch.await.map_err(|source| {
            warn!(namespace = %req.namespace, replica_group = %name, error = %source, "readiness probe patch failed");
            RolloutError::ProbePatch {
                replica_group: name.clone(),
                source,
            }
        })
    }

    fn build(&self, req: &UpsertRequest) -> ReplicaGroup {
        let poll_timeout = self.prober.settings().poll_timeout;
        let probe_path = if req.probe_path.is_empty() {
            DEFAULT_PROBE_PATH
        } else {
            req.probe_path.as_str()
        };

        let container = Container {
            name: req.generate_name.clone(),
            image: req.image.clone(),
            env: req.env.clone(),
            ports: req.ports.iter().copied().map(ContainerPort::tcp).collect(),
            resources: Resources {
                requests: ResourceList {
                    cpu: self.config.default_cpu.clone(),
                    memory: self.config.default_memory.clone(),
                },
                limits: ResourceList {
                    cpu: self.config.max_cpu.clone(),
                    memory: self.config.max_memory.clone(),
                },
            },
            liveness_probe: Some(Probe::tcp(req.ports[0], poll_timeout, poll_timeout)),
            readiness_probe: None,
        };

        let mut meta = ObjectMeta::generated(&req.namespace, &req.generate_name);
        meta.labels = req.labels.clone();
        meta.annotations
            .insert(PROBE_PATH_ANNOTATION.to_string(), probe_path.to_string());

        ReplicaGroup {
            meta,
            spec: ReplicaGroupSpec {
                replicas: req.replicas,
                selector: req.selector.clone(),
                template: PodTemplate {
                    labels: req.labels.clone(),
                    containers: vec![container],
                },
            },
            status: Default::default(),
        }
    }

    async fn roll_back(&self, ns: &str, name: &str, cause: ProbeError) -> RolloutError {
        warn!(namespace = %ns, replica_group = %name, error = %cause, "readiness failed, rolling back");
        match cascade::delete_replica_group(self.client.as_ref(), ns, name).await {
            Ok(pods) => {
                info!(namespace = %ns, replica_group = %name, pods, "replica group rolled back");
                RolloutError::RolledBack {
                    replica_group: name.to_string(),
                    source: cause,
                }
            }
            Err(source) => {
                error!(namespace = %ns, replica_group = %name, error = %source, "rollback failed");
                RolloutError::RollbackFailed {
                    replica_group: name.to_string(),
                    cause: cause.to_string(),
                    source,
                }
            }
        }
    }
}

fn validate(req: &UpsertRequest) -> RolloutResult<()> {
    if req.ports.is_empty() {
        return Err(RolloutError::InvalidInput("container port required".to_string()));
    }
    if req.image.trim().is_empty() {
        return Err(RolloutError::InvalidInput("image required".to_string()));
    }
    if !req.labels.is_superset_of(&req.selector) {
        return Err(RolloutError::InvalidInput(format!(
            "selector {} does not match labels {}",
            req.selector, req.labels
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kite_cluster::{ClusterStore, ContainerState, Fault, LabelSelector, ProbeAction};
    use kite_core::Revision;
    use kite_health::{ProbeSettings, StaticDialer};

    const NS: &str = "kakao";

    fn config() -> ClusterConfig {
        ClusterConfig {
            poll_interval: Duration::from_secs(1),
            poll_timeout: Duration::from_secs(30),
            ..ClusterConfig::default()
        }
    }

    async fn engine(store: &ClusterStore, dial: bool) -> WorkloadEngine {
        store.create_namespace(NS).await.unwrap();
        let client: Arc<dyn ClusterClient> = Arc::new(store.clone());
        let prober = ReadinessProber::new(
            client.clone(),
            Arc::new(StaticDialer(dial)),
            ProbeSettings::from(&config()),
        );
        WorkloadEngine::new(client, prober, config())
    }

    fn request(replicas: u32) -> UpsertRequest {
        let rev = Revision::new("api", "main", "abc123", 7);
        UpsertRequest {
            namespace: NS.to_string(),
            generate_name: rev.generate_name(),
            image: "registry/api:abc123".to_string(),
            labels: rev.labels(),
            selector: rev.labels(),
            env: BTreeMap::from([("MODE".to_string(), "prod".to_string())]),
            replicas,
            ports: vec![8080, 9090],
            probe_path: String::new(),
            deploy_id: 7,
        }
    }

    async fn groups(store: &ClusterStore) -> Vec<ReplicaGroup> {
        store
            .list_replica_groups(NS, &LabelSelector::everything())
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn ready_group_gets_readiness_probe() {
        let store = ClusterStore::open_in_memory().unwrap();
        store.set_start_pods_running(true);
        let engine = engine(&store, true).await;

        let group = engine.upsert(&request(2)).await.unwrap();

        assert!(group.meta.name.starts_with("api-main-abc123"));
        let container = &group.spec.template.containers[0];
        assert_eq!(container.name, "api-main-abc123");
        assert_eq!(container.ports, vec![ContainerPort::tcp(8080), ContainerPort::tcp(9090)]);
        assert_eq!(container.resources.requests.cpu, "100m");
        assert_eq!(container.resources.limits.memory, "1Gi");
        assert_eq!(container.env.get("MODE").map(String::as_str), Some("prod"));

        let liveness = container.liveness_probe.as_ref().unwrap();
        assert_eq!(liveness.action, ProbeAction::TcpSocket { port: 8080 });
        assert_eq!(liveness.initial_delay, Duration::from_secs(30));

        // Ready after one poll (1s), clamped up to the 5s floor.
        let readiness = container.readiness_probe.as_ref().unwrap();
        assert_eq!(readiness.action, ProbeAction::TcpSocket { port: 8080 });
        assert_eq!(readiness.initial_delay, Duration::from_secs(5));
        assert_eq!(readiness.timeout, Duration::from_secs(30));
        assert_eq!(
            group.meta.annotations.get(PROBE_PATH_ANNOTATION).map(String::as_str),
            Some("/")
        );

        assert_eq!(groups(&store).await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_start_sets_measured_delay() {
        let store = ClusterStore::open_in_memory().unwrap();
        let engine = engine(&store, true).await;
        let req = request(1);

        let driver = {
            let store = store.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(12_500)).await;
                for pod in store.list_pods(NS, &LabelSelector::everything()).await.unwrap() {
                    store
                        .set_container_state(NS, &pod.meta.name, ContainerState::running())
                        .unwrap();
                }
            })
        };

        let group = engine.upsert(&req).await.unwrap();
        driver.await.unwrap();

        let probe = group.spec.template.containers[0].readiness_probe.as_ref().unwrap();
        assert_eq!(probe.initial_delay, Duration::from_secs(13));
    }

    #[tokio::test(start_paused = true)]
    async fn staggered_start_uses_first_ready_pod() {
        let store = ClusterStore::open_in_memory().unwrap();
        let engine = engine(&store, true).await;

        let driver = {
            let store = store.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(4_500)).await;
                let names: Vec<String> = store
                    .list_pods(NS, &LabelSelector::everything())
                    .await
                    .unwrap()
                    .into_iter()
                    .map(|p| p.meta.name)
                    .collect();
                assert_eq!(names.len(), 3);
                store.set_container_state(NS, &names[0], ContainerState::running()).unwrap();
                tokio::time::sleep(Duration::from_secs(7)).await;
                for name in &names[1..] {
                    store.set_container_state(NS, name, ContainerState::running()).unwrap();
                }
            })
        };

        let group = engine.upsert(&request(3)).await.unwrap();
        driver.await.unwrap();

        let probe = group.spec.template.containers[0].readiness_probe.as_ref().unwrap();
        assert_eq!(probe.initial_delay, config().clamp_initial_delay(Duration::from_secs(5)));
        assert_eq!(probe.initial_delay, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_rolls_back() {
        let store = ClusterStore::open_in_memory().unwrap();
        store.set_start_pods_running(true);
        let engine = engine(&store, false).await;

        let err = engine.upsert(&request(2)).await.unwrap_err();

        assert!(matches!(
            err,
            RolloutError::RolledBack {
                source: ProbeError::Timeout { .. },
                ..
            }
        ));
        assert!(groups(&store).await.is_empty());
        assert!(store.list_pods(NS, &LabelSelector::everything()).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn crash_loop_rolls_back_with_logs() {
        let store = ClusterStore::open_in_memory().unwrap();
        let engine = engine(&store, true).await;

        let driver = {
            let store = store.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(2_500)).await;
                let pods = store.list_pods(NS, &LabelSelector::everything()).await.unwrap();
                let pod = &pods[0].meta.name;
                store.push_pod_logs(NS, pod, true, &["panic: bad config"]).unwrap();
                store
                    .set_container_state(NS, pod, ContainerState::waiting(ContainerState::CRASH_LOOP))
                    .unwrap();
            })
        };

        let started = tokio::time::Instant::now();
        let err = engine.upsert(&request(1)).await.unwrap_err();
        driver.await.unwrap();

        match err {
            RolloutError::RolledBack {
                source: ProbeError::CrashLoop { logs, .. },
                ..
            } => assert!(logs.contains("panic: bad config")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(started.elapsed() < Duration::from_secs(30));
        assert!(groups(&store).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn desired_replica_timeout_rolls_back() {
        let store = ClusterStore::open_in_memory().unwrap();
        let engine = engine(&store, true).await;

        // Pods come up, but the controller keeps reporting one replica short.
        let driver = {
            let store = store.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(1_500)).await;
                for pod in store.list_pods(NS, &LabelSelector::everything()).await.unwrap() {
                    store
                        .set_container_state(NS, &pod.meta.name, ContainerState::running())
                        .unwrap();
                }
                let group = &store
                    .list_replica_groups(NS, &LabelSelector::everything())
                    .await
                    .unwrap()[0];
                store.set_observed_replicas(NS, &group.meta.name, 1).unwrap();
            })
        };

        let err = engine.upsert(&request(2)).await.unwrap_err();
        driver.await.unwrap();

        assert!(matches!(
            err,
            RolloutError::RolledBack {
                source: ProbeError::Timeout {
                    waiting_for: "desired replica count",
                    ..
                },
                ..
            }
        ));
        assert!(groups(&store).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_rollback_is_reported() {
        let store = ClusterStore::open_in_memory().unwrap();
        store.set_start_pods_running(true);
        let engine = engine(&store, false).await;
        store.arm(Fault::DeleteReplicaGroup);

        let err = engine.upsert(&request(1)).await.unwrap_err();

        assert!(matches!(err, RolloutError::RollbackFailed { .. }));
        assert_eq!(groups(&store).await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_patch_failure_keeps_group() {
        let store = ClusterStore::open_in_memory().unwrap();
        store.set_start_pods_running(true);
        let engine = engine(&store, true).await;
        store.arm(Fault::UpdateReplicaGroup);

        let err = engine.upsert(&request(1)).await.unwrap_err();

        assert!(matches!(err, RolloutError::ProbePatch { .. }));
        assert_eq!(groups(&store).await.len(), 1);
    }

    #[tokio::test]
    async fn empty_ports_rejected_before_any_write() {
        let store = ClusterStore::open_in_memory().unwrap();
        let engine = engine(&store, true).await;
        let mut req = request(1);
        req.ports.clear();

        let err = engine.upsert(&req).await.unwrap_err();

        assert!(matches!(err, RolloutError::InvalidInput(_)));
        assert!(groups(&store).await.is_empty());
    }

    #[tokio::test]
    async fn create_failure_needs_no_rollback() {
        let store = ClusterStore::open_in_memory().unwrap();
        let engine = engine(&store, true).await;
        store.arm(Fault::CreateReplicaGroup);

        let err = engine.upsert(&request(1)).await.unwrap_err();

        assert!(matches!(err, RolloutError::Cluster(_)));
        assert!(groups(&store).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_replicas_uses_minimum_delay() {
        let store = ClusterStore::open_in_memory().unwrap();
        let engine = engine(&store, true).await;

        let group = engine.upsert(&request(0)).await.unwrap();

        let probe = group.spec.template.containers[0].readiness_probe.as_ref().unwrap();
        assert_eq!(probe.initial_delay, Duration::from_secs(5));
    }
}

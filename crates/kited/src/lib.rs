//! Construction root for the kite daemon.
//!
//! [`Kite::open`] wires every subsystem from a [`KiteConfig`]; tests use
//! [`Kite::assemble`] to swap in an in-memory store and recording sinks.

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use kite_api::ApiState;
use kite_cluster::{ClusterClient, ClusterStore};
use kite_core::KiteConfig;
use kite_core::config::StatusConfig;
use kite_gc::{GarbageCollector, GcSettings};
use kite_health::{PortDialer, ProbeSettings, ReadinessProber, TcpDialer};
use kite_notify::{GitHubStatusSink, LogStatusSink, Notifier, StatusSink, WebhookNotifier};
use kite_rollout::{CutoverSwitch, Orchestrator, RegistrySettings, ServiceRegistry, WorkloadEngine};
use tracing::info;

/// File name of the embedded cluster store inside `store.data_dir`.
pub const STORE_FILE: &str = "kite.redb";

/// Every long-lived subsystem of one daemon.
pub struct Kite {
    pub config: KiteConfig,
    pub orchestrator: Arc<Orchestrator>,
    pub cutover: Arc<CutoverSwitch>,
    pub gc: Arc<GarbageCollector>,
}

impl Kite {
    /// Open the on-disk store and build the configured sinks.
    pub fn open(config: KiteConfig) -> anyhow::Result<Self> {
        let data_dir = &config.store.data_dir;
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("creating data dir {}", data_dir.display()))?;
        let db_path = data_dir.join(STORE_FILE);
        let store = ClusterStore::open(&db_path)?;
        store.set_start_pods_running(config.store.start_pods_running);
        info!(path = ?db_path, "cluster store opened");

        let status = status_sink(&config.status)?;
        let notifier: Arc<dyn Notifier> = Arc::new(WebhookNotifier::new()?);
        Ok(Self::assemble(config, Arc::new(store), Arc::new(TcpDialer), status, notifier))
    }

    pub fn assemble(
        config: KiteConfig,
        client: Arc<dyn ClusterClient>,
        dialer: Arc<dyn PortDialer>,
        status: Arc<dyn StatusSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let prober = ReadinessProber::new(client.clone(), dialer, ProbeSettings::from(&config.cluster));
        let engine = WorkloadEngine::new(client.clone(), prober, config.cluster.clone());
        let services = Arc::new(ServiceRegistry::new(client.clone(), RegistrySettings::from(&config)));
        let orchestrator = Arc::new(Orchestrator::new(engine, services, status, notifier.clone()));
        let cutover = Arc::new(CutoverSwitch::new(client.clone()));
        let gc = Arc::new(GarbageCollector::new(client, notifier, GcSettings::from(&config)));

        Self {
            config,
            orchestrator,
            cutover,
            gc,
        }
    }

    pub fn api_state(&self) -> ApiState {
        ApiState {
            orchestrator: self.orchestrator.clone(),
            cutover: self.cutover.clone(),
            gc: self.gc.clone(),
            gc_ttl: self.config.gc.retention,
            server: self.config.server.clone(),
        }
    }

    pub fn router(&self) -> Router {
        kite_api::build_router(self.api_state())
    }
}

/// Status sink selected by `status.driver`.
pub fn status_sink(config: &StatusConfig) -> anyhow::Result<Arc<dyn StatusSink>> {
    match config.driver.as_str() {
        "log" => Ok(Arc::new(LogStatusSink::default())),
        "github" => {
            let token = std::env::var(&config.token_env)
                .with_context(|| format!("status driver github needs ${}", config.token_env))?;
            Ok(Arc::new(GitHubStatusSink::new(&config.api, &token)?))
        }
        other => anyhow::bail!("unknown status driver {other:?}"),
    }
}

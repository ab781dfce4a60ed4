//! The sweep.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use kite_cluster::{ClusterClient, LabelSelector, ReplicaGroup, cascade, epoch_secs};
use kite_core::labels::LABEL_TYPE;
use kite_core::{KiteConfig, NotificationTarget};
use kite_notify::Notifier;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::{GcError, GcResult};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcSettings {
    /// Namespaces never swept.
    pub reserved_namespaces: Vec<String>,
    /// Receives sweep summaries and sweep failures.
    pub system_targets: Vec<NotificationTarget>,
}

impl From<&KiteConfig> for GcSettings {
    fn from(config: &KiteConfig) -> Self {
        Self {
            reserved_namespaces: config.cluster.reserved_namespaces.clone(),
            system_targets: config.notification.system.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GcReport {
    pub dry_run: bool,
    pub namespaces: usize,
    /// `namespace/name` of every collected group, sorted.
    pub deleted: Vec<String>,
}

impl GcReport {
    /// Notification text, or `None` when nothing was collected.
    pub fn summary(&self) -> Option<String> {
        if self.deleted.is_empty() {
            return None;
        }
        let mut head = format!("deleted replica groups: {}", self.deleted.len());
        if self.dry_run {
            head.push_str(" (dryrun)");
        }
        Some(format!("{head}\n{}", self.deleted.join("\n")))
    }
}

/// Orphans keyed by (namespace, label signature).
type Candidates = BTreeMap<(String, String), Vec<ReplicaGroup>>;

pub struct GarbageCollector {
    client: Arc<dyn ClusterClient>,
    notifier: Arc<dyn Notifier>,
    settings: GcSettings,
}

impl GarbageCollector {
    pub fn new(client: Arc<dyn ClusterClient>, notifier: Arc<dyn Notifier>, settings: GcSettings) -> Self {
        Self {
            client,
            notifier,
            settings,
        }
    }

    /// Delete every ReplicaGroup older than `ttl` whose label signature
    /// matches no Service selector in its namespace. With `dry_run` the
    /// groups are only reported.
    ///
    /// A failure is sent to the system targets and ends the sweep.
    pub async fn sweep(&self, dry_run: bool, ttl: Duration) -> GcResult<GcReport> {
        info!(dry_run, ?ttl, "sweep started");
        match self.collect(dry_run, ttl).await {
            Ok(report) => {
                if let Some(summary) = report.summary() {
                    self.notifier.notify(&self.settings.system_targets, &summary).await;
                }
                info!(dry_run, deleted = report.deleted.len(), namespaces = report.namespaces, "sweep finished");
                Ok(report)
            }
            Err(e) => {
                error!(error = %e, "sweep aborted");
                self.notifier
                    .notify(&self.settings.system_targets, &e.to_string())
                    .await;
                Err(e)
            }
        }
    }

    /// Run one sweep on its own task.
    pub fn spawn_sweep(self: &Arc<Self>, dry_run: bool, ttl: Duration) -> JoinHandle<GcResult<GcReport>> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.sweep(dry_run, ttl).await })
    }

    /// Sweep every `interval` until `shutdown` changes.
    pub async fn run(&self, interval: Duration, ttl: Duration, dry_run: bool, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), ?ttl, dry_run, "garbage collector started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    // Failures are already logged and notified.
                    let _ = self.sweep(dry_run, ttl).await;
                }
                _ = shutdown.changed() => {
                    info!("garbage collector shutting down");
                    break;
                }
            }
        }
    }

    async fn collect(&self, dry_run: bool, ttl: Duration) -> GcResult<GcReport> {
        let now = epoch_secs();
        let reserved: HashSet<&str> = self
            .settings
            .reserved_namespaces
            .iter()
            .map(String::as_str)
            .collect();
        let namespaces = self
            .client
            .list_namespaces()
            .await
            .map_err(GcError::ListNamespaces)?;

        let mut candidates = Candidates::new();
        let mut swept = 0;
        for ns in namespaces.iter().filter(|ns| !reserved.contains(ns.name.as_str())) {
            swept += 1;
            let ns = ns.name.as_str();

            let groups = self
                .client
                .list_replica_groups(ns, &LabelSelector::everything())
                .await
                .map_err(|source| GcError::ListReplicaGroups {
                    namespace: ns.to_string(),
                    source,
                })?;
            for group in groups {
                if group.meta.age_at(now) <= ttl {
                    continue;
                }
                let signature = group.meta.labels.signature();
                candidates
                    .entry((ns.to_string(), signature))
                    .or_default()
                    .push(group);
            }

            let services = self
                .client
                .list_services(ns, &LabelSelector::everything().without(LABEL_TYPE))
                .await
                .map_err(|source| GcError::ListServices {
                    namespace: ns.to_string(),
                    source,
                })?;
            for svc in services {
                let signature = svc.spec.selector.signature();
                if candidates.remove(&(ns.to_string(), signature)).is_some() {
                    debug!(namespace = %ns, service = %svc.meta.name, "replica group in use");
                }
            }
        }

        let mut deleted = Vec::new();
        for ((ns, signature), groups) in candidates {
            for group in groups {
                let name = group.meta.name;
                info!(namespace = %ns, replica_group = %name, labels = %signature, dry_run, "collecting orphaned replica group");
                if !dry_run {
                    cascade::delete_replica_group(self.client.as_ref(), &ns, &name)
                        .await
                        .map_err(|source| GcError::Delete {
                            namespace: ns.clone(),
                            name: name.clone(),
                            source,
                        })?;
                }
                deleted.push(format!("{ns}/{name}"));
            }
        }
        deleted.sort();

        Ok(GcReport {
            dry_run,
            namespaces: swept,
            deleted,
        })
    }
}

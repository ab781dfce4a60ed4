//! Readiness prober.
//!
//! A pod is ready when every container reports running and its first
//! declared port answers: TCP ports are dialed, UDP ports and portless
//! pods count as ready as is. The group is ready when the number of ready
//! pods equals its desired replica count.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use kite_cluster::{ClusterClient, LabelSelector, Pod, Protocol, ReplicaGroup};
use kite_core::config::ClusterConfig;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::dialer::PortDialer;
use crate::error::{ProbeError, ProbeResult};
use crate::poll::{PollError, poll_until};

/// Log lines fetched from a crash-looping container's previous instance.
pub const CRASH_LOG_TAIL: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSettings {
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    pub dial_timeout: Duration,
}

impl From<&ClusterConfig> for ProbeSettings {
    fn from(config: &ClusterConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            poll_timeout: config.poll_timeout,
            dial_timeout: config.dial_timeout,
        }
    }
}

/// Outcome of a successful readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    /// Time from the start of polling until the first pod was seen ready.
    /// `None` only when the group wants zero replicas.
    pub initial_delay: Option<Duration>,
}

pub struct ReadinessProber {
    client: Arc<dyn ClusterClient>,
    dialer: Arc<dyn PortDialer>,
    settings: ProbeSettings,
}

impl ReadinessProber {
    pub fn new(client: Arc<dyn ClusterClient>, dialer: Arc<dyn PortDialer>, settings: ProbeSettings) -> Self {
        Self {
            client,
            dialer,
            settings,
        }
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    /// Poll until `group`'s ready pods reach its desired replica count.
    pub async fn wait_pods_ready(&self, group: &ReplicaGroup) -> ProbeResult<Readiness> {
        let ns = group.meta.namespace.as_str();
        let name = group.meta.name.as_str();
        let desired = group.spec.replicas as usize;
        let selector = LabelSelector::eq(&group.spec.selector);
        let started = Instant::now();
        let initial_delay = OnceLock::new();

        let result = poll_until(self.settings.poll_interval, self.settings.poll_timeout, || {
            let (selector, initial_delay) = (&selector, &initial_delay);
            async move {
                let ready = self.count_ready_pods(ns, selector).await?;
                if ready > 0 {
                    initial_delay.get_or_init(|| started.elapsed());
                }
                debug!(namespace = %ns, replica_group = %name, ready, desired, "polled pods");
                Ok::<_, ProbeError>(ready == desired)
            }
        })
        .await;

        match result {
            Ok(()) => Ok(Readiness {
                initial_delay: initial_delay.get().copied(),
            }),
            Err(PollError::Timeout(after)) => Err(ProbeError::Timeout {
                waiting_for: "pods to become ready",
                after,
            }),
            Err(PollError::Condition(e)) => Err(e),
        }
    }

    /// Poll until the cluster reports the group's observed replicas equal to desired.
    pub async fn wait_desired_replicas(&self, ns: &str, name: &str) -> ProbeResult<()> {
        let result = poll_until(self.settings.poll_interval, self.settings.poll_timeout, || async move {
            let group = self.client.get_replica_group(ns, name).await?;
            Ok::<_, ProbeError>(group.has_desired_replicas())
        })
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(PollError::Timeout(after)) => Err(ProbeError::Timeout {
                waiting_for: "desired replica count",
                after,
            }),
            Err(PollError::Condition(e)) => Err(e),
        }
    }

    async fn count_ready_pods(&self, ns: &str, selector: &LabelSelector) -> ProbeResult<usize> {
        let pods = self.client.list_pods(ns, selector).await?;
        let mut ready = 0;
        for pod in &pods {
            self.fail_on_crash_loop(ns, pod).await?;
            if self.pod_ready(pod).await {
                ready += 1;
            }
        }
        Ok(ready)
    }

    async fn fail_on_crash_loop(&self, ns: &str, pod: &Pod) -> ProbeResult<()> {
        let Some(status) = pod
            .status
            .container_statuses
            .iter()
            .find(|s| s.state.is_crash_loop())
        else {
            return Ok(());
        };

        let logs = match self
            .client
            .get_pod_logs(ns, &pod.meta.name, CRASH_LOG_TAIL, true)
            .await
        {
            Ok(logs) => logs,
            Err(e) => {
                warn!(namespace = %ns, pod = %pod.meta.name, error = %e, "could not fetch crash logs");
                format!("(logs unavailable: {e})")
            }
        };
        warn!(namespace = %ns, pod = %pod.meta.name, container = %status.name, "crash loop detected");
        Err(ProbeError::CrashLoop {
            pod: pod.meta.name.clone(),
            container: status.name.clone(),
            logs,
        })
    }

    async fn pod_ready(&self, pod: &Pod) -> bool {
        let statuses = &pod.status.container_statuses;
        if statuses.is_empty() || !statuses.iter().all(|s| s.state.is_running()) {
            return false;
        }
        // A container with no status yet is not running.
        if !pod
            .containers
            .iter()
            .all(|c| statuses.iter().any(|s| s.name == c.name))
        {
            return false;
        }
        let Some(port) = pod.first_port() else {
            return true;
        };
        if port.protocol == Protocol::Udp {
            return true;
        }
        let Some(ip) = pod.status.pod_ip.as_deref() else {
            return false;
        };
        self.dialer
            .dial(ip, port.container_port, self.settings.dial_timeout)
            .await
    }
}

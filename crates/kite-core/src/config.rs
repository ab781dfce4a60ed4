//! kite.toml configuration parser.
//!
//! Every section has defaults, so an empty file is a valid config. A
//! phase overlay (`<dir>/<phase>.toml`) can be merged over the base file
//! to carry per-environment differences.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::duration::{serde_opt_str, serde_str};
use crate::metadata::NotificationTarget;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KiteConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub cluster: ClusterConfig,
    pub gc: GcConfig,
    pub load_balancer: LoadBalancerConfig,
    pub status: StatusConfig,
    pub notification: NotificationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    /// Log viewer URL handed back to deploy callers. `{deploy_id}` is substituted.
    pub log_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            log_url: "/deploy_log/{deploy_id}".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn log_url_for(&self, deploy_id: u64) -> String {
        self.log_url.replace("{deploy_id}", &deploy_id.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    /// Start materialized pods as running. For an embedded cluster store
    /// with nothing scheduling real containers.
    pub start_pods_running: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/kite"),
            start_pods_running: false,
        }
    }
}

/// Rollout tuning and resource ceilings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    #[serde(with = "serde_str")]
    pub poll_interval: Duration,
    #[serde(with = "serde_str")]
    pub poll_timeout: Duration,
    /// Per-dial timeout when checking a pod's first TCP port.
    #[serde(with = "serde_str")]
    pub dial_timeout: Duration,
    #[serde(with = "serde_str")]
    pub min_initial_delay: Duration,
    #[serde(with = "serde_str")]
    pub max_initial_delay: Duration,
    pub max_replicas: u32,
    pub default_cpu: String,
    pub default_memory: String,
    pub max_cpu: String,
    pub max_memory: String,
    /// Namespaces the garbage collector never looks at.
    pub reserved_namespaces: Vec<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            poll_timeout: Duration::from_secs(300),
            dial_timeout: Duration::from_secs(10),
            min_initial_delay: Duration::from_secs(5),
            max_initial_delay: Duration::from_secs(60),
            max_replicas: 10,
            default_cpu: "100m".to_string(),
            default_memory: "128Mi".to_string(),
            max_cpu: "1".to_string(),
            max_memory: "1Gi".to_string(),
            reserved_namespaces: vec!["default".to_string(), "kube-system".to_string()],
        }
    }
}

impl ClusterConfig {
    /// Clamp a measured startup delay into `[min_initial_delay, max_initial_delay]`.
    pub fn clamp_initial_delay(&self, measured: Duration) -> Duration {
        measured.clamp(self.min_initial_delay, self.max_initial_delay.max(self.min_initial_delay))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// ReplicaGroups younger than this are never collected.
    #[serde(with = "serde_str")]
    pub retention: Duration,
    /// Periodic sweep interval. Unset disables the periodic sweep.
    #[serde(with = "serde_opt_str", skip_serializing_if = "Option::is_none")]
    pub interval: Option<Duration>,
    pub dry_run: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(72 * 3600),
            interval: None,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadBalancerConfig {
    pub driver: String,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            driver: "nginx".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// `log` or `github`.
    pub driver: String,
    pub api: String,
    /// Environment variable holding the API token.
    pub token_env: String,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            driver: "log".to_string(),
            api: "https://api.github.com".to_string(),
            token_env: "GITHUB_TOKEN".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Targets for system messages (sweep summaries and failures).
    pub system: Vec<NotificationTarget>,
}

impl KiteConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        Self::load(path, None)
    }

    /// Load `path`, then merge `<dir>/<phase>.toml` over it if a phase is given.
    pub fn load(path: &Path, phase: Option<&str>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let mut base: toml::Value = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;

        if let Some(phase) = phase {
            let overlay_path = path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(format!("{phase}.toml"));
            let overlay = std::fs::read_to_string(&overlay_path)
                .with_context(|| format!("reading phase config {}", overlay_path.display()))?;
            let overlay: toml::Value = toml::from_str(&overlay)
                .with_context(|| format!("parsing phase config {}", overlay_path.display()))?;
            merge(&mut base, overlay);
            tracing::debug!(%phase, path = %overlay_path.display(), "phase config merged");
        }

        let config: KiteConfig = base.try_into().context("invalid kite config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let config: KiteConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let c = &self.cluster;
        anyhow::ensure!(!c.poll_interval.is_zero(), "cluster.poll_interval must be positive");
        anyhow::ensure!(
            c.poll_timeout >= c.poll_interval,
            "cluster.poll_timeout must not be shorter than cluster.poll_interval"
        );
        anyhow::ensure!(
            c.min_initial_delay <= c.max_initial_delay,
            "cluster.min_initial_delay exceeds cluster.max_initial_delay"
        );
        anyhow::ensure!(c.max_replicas > 0, "cluster.max_replicas must be positive");
        anyhow::ensure!(
            self.gc.interval.is_none_or(|i| !i.is_zero()),
            "gc.interval must be positive"
        );
        Ok(())
    }
}

/// Deep-merge `overlay` into `base`; tables merge key by key, everything else is replaced.
fn merge(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = KiteConfig::from_toml_str("").unwrap();
        assert_eq!(config.cluster.poll_interval, Duration::from_secs(2));
        assert_eq!(config.gc.retention, Duration::from_secs(72 * 3600));
        assert!(config.gc.interval.is_none());
        assert_eq!(config.cluster.reserved_namespaces, vec!["default", "kube-system"]);
    }

    #[test]
    fn parses_durations() {
        let config = KiteConfig::from_toml_str(
            r#"
[cluster]
poll_interval = "500ms"
poll_timeout = "2m"

[gc]
retention = "1h"
interval = "30m"
"#,
        )
        .unwrap();
        assert_eq!(config.cluster.poll_interval, Duration::from_millis(500));
        assert_eq!(config.cluster.poll_timeout, Duration::from_secs(120));
        assert_eq!(config.gc.retention, Duration::from_secs(3600));
        assert_eq!(config.gc.interval, Some(Duration::from_secs(1800)));
    }

    #[test]
    fn invalid_retention_is_rejected() {
        let err = KiteConfig::from_toml_str("[gc]\nretention = \"forever\"\n");
        assert!(err.is_err());
    }

    #[test]
    fn overflowing_retention_is_rejected() {
        let err = KiteConfig::from_toml_str("[gc]\nretention = \"307445734561825861m\"\n");
        assert!(err.is_err());
    }

    #[test]
    fn zero_gc_interval_is_rejected() {
        let err = KiteConfig::from_toml_str("[gc]\ninterval = \"0s\"\n").unwrap_err();
        assert!(err.to_string().contains("gc.interval"));

        let config = KiteConfig::from_toml_str("[gc]\ninterval = \"10m\"\n").unwrap();
        assert_eq!(config.gc.interval, Some(Duration::from_secs(600)));
    }

    #[test]
    fn inverted_delay_range_is_rejected() {
        let err = KiteConfig::from_toml_str(
            "[cluster]\nmin_initial_delay = \"60s\"\nmax_initial_delay = \"5s\"\n",
        );
        assert!(err.is_err());
    }

    #[test]
    fn clamp_initial_delay() {
        let cluster = ClusterConfig::default();
        assert_eq!(cluster.clamp_initial_delay(Duration::from_secs(1)), Duration::from_secs(5));
        assert_eq!(cluster.clamp_initial_delay(Duration::from_secs(12)), Duration::from_secs(12));
        assert_eq!(cluster.clamp_initial_delay(Duration::from_secs(600)), Duration::from_secs(60));
    }

    #[test]
    fn phase_overlay_merges_tables() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("kite.toml");
        std::fs::write(
            &base,
            "[cluster]\nmax_replicas = 4\npoll_interval = \"1s\"\n[load_balancer]\ndriver = \"nginx\"\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("prod.toml"), "[cluster]\nmax_replicas = 20\n").unwrap();

        let config = KiteConfig::load(&base, Some("prod")).unwrap();
        assert_eq!(config.cluster.max_replicas, 20);
        assert_eq!(config.cluster.poll_interval, Duration::from_secs(1));
        assert_eq!(config.load_balancer.driver, "nginx");

        let plain = KiteConfig::from_file(&base).unwrap();
        assert_eq!(plain.cluster.max_replicas, 4);
    }

    #[test]
    fn serializes_back_to_toml() {
        let config = KiteConfig::default();
        let s = config.to_toml_string().unwrap();
        assert!(s.contains("poll_interval = \"2s\""));
        let back = KiteConfig::from_toml_str(&s).unwrap();
        assert_eq!(back.cluster.max_replicas, config.cluster.max_replicas);
    }

    #[test]
    fn log_url_substitution() {
        let server = ServerConfig {
            log_url: "https://logs.example.com/deploys/{deploy_id}".to_string(),
            ..Default::default()
        };
        assert_eq!(server.log_url_for(17), "https://logs.example.com/deploys/17");
    }
}

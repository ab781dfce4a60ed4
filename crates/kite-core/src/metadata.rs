//! Service metadata: the deployment configuration blob stored on each Service.
//!
//! The blob is JSON in the Service annotation [`METADATA_ANNOTATION`]. It
//! carries everything a Deploy needs that is not part of the revision:
//! replica count, ports, probe path, environment, and notification targets.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Service annotation key holding the JSON-encoded [`ServiceMetadata`].
pub const METADATA_ANNOTATION: &str = "kite/metadata";

/// Service annotation key holding load balancer details (`{"domain": ...}`).
pub const LOADBALANCER_ANNOTATION: &str = "loadbalancer";

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("invalid port {0:?}")]
    InvalidPort(String),

    #[error("port out of range: {0}")]
    PortOutOfRange(i64),

    #[error("container port required")]
    NoPorts,

    #[error("failed to encode metadata: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode metadata: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Where a notification should be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationTarget {
    /// Transport: `slack`, `webhook`, `log`.
    pub driver: String,
    pub endpoint: String,
    #[serde(alias = "enable")]
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
}

impl NotificationTarget {
    pub fn new(driver: &str, endpoint: &str) -> Self {
        Self {
            driver: driver.to_string(),
            endpoint: endpoint.to_string(),
            enabled: true,
            description: String::new(),
        }
    }
}

/// Per-Service deployment configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceMetadata {
    pub namespace: String,
    pub service: String,
    pub github_org: String,
    pub github_repo: String,
    pub git_branch: String,
    pub auto_deploy: bool,
    /// Comma-separated HTTP ports; the first one becomes the Service's port 80.
    pub http_port: String,
    /// Comma-separated plain TCP ports.
    pub tcp_port: String,
    /// Derived: HTTP ports followed by TCP ports.
    pub container_ports: Vec<u16>,
    pub probe_path: String,
    pub replicas: u32,
    /// `KEY=VALUE` lines.
    pub environment: String,
    pub notification: Vec<NotificationTarget>,
}

impl ServiceMetadata {
    /// Parse `environment` into a map. Comment and malformed lines are skipped.
    pub fn environment_map(&self) -> BTreeMap<String, String> {
        self.environment
            .lines()
            .filter(|line| !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.to_string(), v.trim().to_string()))
            .collect()
    }

    /// HTTP ports followed by TCP ports.
    pub fn resolve_ports(&self) -> Result<Vec<u16>, MetadataError> {
        let mut ports = parse_ports(&self.http_port)?;
        ports.extend(parse_ports(&self.tcp_port)?);
        Ok(ports)
    }

    /// Recompute `container_ports` and encode for the Service annotation.
    pub fn to_annotation(&mut self) -> Result<String, MetadataError> {
        let ports = self.resolve_ports()?;
        if !ports.is_empty() {
            self.container_ports = ports;
        }
        serde_json::to_string(self).map_err(MetadataError::Encode)
    }

    /// Decode an annotation, filling `container_ports` from the port strings
    /// when an older blob lacks them.
    pub fn from_annotation(raw: &str) -> Result<Self, MetadataError> {
        let mut meta: ServiceMetadata = serde_json::from_str(raw).map_err(MetadataError::Decode)?;
        if meta.container_ports.is_empty() {
            meta.container_ports = meta.resolve_ports()?;
        }
        Ok(meta)
    }

    pub fn enabled_targets(&self) -> impl Iterator<Item = &NotificationTarget> {
        self.notification.iter().filter(|t| t.enabled)
    }
}

/// Parse a comma-separated port list. Blank entries are skipped.
pub fn parse_ports(input: &str) -> Result<Vec<u16>, MetadataError> {
    let mut ports = Vec::new();
    for raw in input.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let port: i64 = raw
            .parse()
            .map_err(|_| MetadataError::InvalidPort(raw.to_string()))?;
        if !(1..=65535).contains(&port) {
            return Err(MetadataError::PortOutOfRange(port));
        }
        ports.push(port as u16);
    }
    Ok(ports)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ServiceMetadata {
        ServiceMetadata {
            namespace: "kakao".to_string(),
            service: "api".to_string(),
            github_org: "kakao".to_string(),
            github_repo: "api".to_string(),
            git_branch: "main".to_string(),
            http_port: "8080".to_string(),
            tcp_port: "9000, 9001".to_string(),
            probe_path: "/healthz".to_string(),
            replicas: 2,
            environment: "A=1\n# comment\nB= two \nbroken\nC=x=y".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn environment_map_skips_comments_and_malformed_lines() {
        let env = sample().environment_map();
        assert_eq!(env.len(), 3);
        assert_eq!(env["A"], "1");
        assert_eq!(env["B"], "two");
        assert_eq!(env["C"], "x=y");
    }

    #[test]
    fn ports_http_first() {
        assert_eq!(sample().resolve_ports().unwrap(), vec![8080, 9000, 9001]);
    }

    #[test]
    fn parse_ports_rejects_garbage() {
        assert!(matches!(parse_ports("80,abc"), Err(MetadataError::InvalidPort(_))));
        assert!(matches!(parse_ports("0"), Err(MetadataError::PortOutOfRange(0))));
        assert!(matches!(parse_ports("70000"), Err(MetadataError::PortOutOfRange(70000))));
        assert!(parse_ports(" , ").unwrap().is_empty());
    }

    #[test]
    fn annotation_roundtrip_fills_ports() {
        let mut meta = sample();
        let raw = meta.to_annotation().unwrap();
        assert_eq!(meta.container_ports, vec![8080, 9000, 9001]);
        let back = ServiceMetadata::from_annotation(&raw).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn legacy_blob_without_container_ports() {
        let raw = r#"{"service":"api","http_port":"80","replicas":1,
            "notification":[{"driver":"slack","endpoint":"http://hook","enable":true}]}"#;
        let meta = ServiceMetadata::from_annotation(raw).unwrap();
        assert_eq!(meta.container_ports, vec![80]);
        assert_eq!(meta.enabled_targets().count(), 1);
    }
}

//! Notification delivery.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use kite_core::NotificationTarget;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{SinkError, SinkResult};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivers a message to a list of targets. Never fails: disabled targets
/// are skipped, delivery errors are logged.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, targets: &[NotificationTarget], message: &str);
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    text: &'a str,
}

/// Posts `{"text": message}` to `slack` and `webhook` targets and writes
/// `log` targets to the tracing log.
pub struct WebhookNotifier {
    http: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new() -> SinkResult<Self> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self { http })
    }

    async fn post(&self, endpoint: &str, message: &str) -> SinkResult<()> {
        let response = self
            .http
            .post(endpoint)
            .json(&ChatMessage { text: message })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, targets: &[NotificationTarget], message: &str) {
        for target in targets.iter().filter(|t| t.enabled) {
            match target.driver.as_str() {
                "slack" | "webhook" => match self.post(&target.endpoint, message).await {
                    Ok(()) => debug!(driver = %target.driver, endpoint = %target.endpoint, "notification sent"),
                    Err(e) => warn!(driver = %target.driver, endpoint = %target.endpoint, error = %e, "notification failed"),
                },
                "log" => info!(endpoint = %target.endpoint, "{message}"),
                other => warn!(driver = %other, "unknown notification driver"),
            }
        }
    }
}

/// Records every call for inspection.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<(Vec<String>, String)>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages in the order they were sent.
    pub fn messages(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(_, message)| message.clone())
            .collect()
    }

    /// Endpoints of the enabled targets of each call.
    pub fn endpoints(&self) -> Vec<Vec<String>> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(endpoints, _)| endpoints.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(&self, targets: &[NotificationTarget], message: &str) {
        let endpoints = targets
            .iter()
            .filter(|t| t.enabled)
            .map(|t| t.endpoint.clone())
            .collect();
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((endpoints, message.to_string()));
    }
}

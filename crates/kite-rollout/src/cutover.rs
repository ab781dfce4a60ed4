//! Cutover switch: point a Service at one revision.

use std::sync::Arc;

use kite_cluster::{ClusterClient, Service};
use kite_core::labels::{LABEL_DEPLOY_ID, LABEL_SHA};
use kite_core::{DeployId, Labels};
use tracing::info;

use crate::error::{RolloutError, RolloutResult};

/// `base` refined to select exactly one revision.
pub fn revision_selector(base: &Labels, sha: &str, deploy_id: DeployId) -> Labels {
    base.clone()
        .with(LABEL_SHA, sha)
        .with(LABEL_DEPLOY_ID, deploy_id.to_string())
}

pub struct CutoverSwitch {
    client: Arc<dyn ClusterClient>,
}

impl CutoverSwitch {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }

    /// Rewrite the Service's `sha` and `deploy_id` selector keys. Every
    /// other selector key is left alone, and activating the revision that
    /// is already active writes the same selector again.
    ///
    /// Nothing checks that a matching ReplicaGroup exists; activating an
    /// absent revision leaves the Service with no endpoints.
    pub async fn activate(&self, ns: &str, service: &str, sha: &str, deploy_id: DeployId) -> RolloutResult<Service> {
        if sha.trim().is_empty() {
            return Err(RolloutError::InvalidInput("sha required".to_string()));
        }
        let mut svc = self.client.get_service(ns, service).await?;
        let previous = svc.spec.selector.clone();
        svc.spec.selector = revision_selector(&svc.spec.selector, sha, deploy_id);

        let updated = self.client.update_service(&svc).await?;
        info!(
            namespace = %ns,
            %service,
            from = %previous,
            to = %updated.spec.selector,
            "service cut over"
        );
        Ok(updated)
    }
}

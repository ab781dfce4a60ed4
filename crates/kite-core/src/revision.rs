//! Revision identity: one deployable unit.

use serde::{Deserialize, Serialize};

use crate::labels::{LABEL_BRANCH, LABEL_DEPLOY_ID, LABEL_SERVICE, LABEL_SHA, Labels};
use crate::naming;

/// External deployment sequence number issued by the status sink.
pub type DeployId = u64;

/// (repository, branch, commit SHA, deploy sequence number).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub repository: String,
    pub branch: String,
    pub sha: String,
    pub deploy_id: DeployId,
}

impl Revision {
    pub fn new(repository: &str, branch: &str, sha: &str, deploy_id: DeployId) -> Self {
        Self {
            repository: repository.to_string(),
            branch: branch.to_string(),
            sha: sha.to_string(),
            deploy_id,
        }
    }

    /// Labels shared by a Service and every revision deployed behind it.
    pub fn base_labels(repository: &str, branch: &str) -> Labels {
        Labels::new()
            .with(LABEL_SERVICE, naming::normalize_by_hyphen("", &[repository]))
            .with(LABEL_BRANCH, naming::normalize_git_branch("", &[branch]))
    }

    /// Base labels refined with `sha` and `deploy_id`.
    pub fn labels(&self) -> Labels {
        Self::base_labels(&self.repository, &self.branch)
            .with(LABEL_SHA, self.sha.clone())
            .with(LABEL_DEPLOY_ID, self.deploy_id.to_string())
    }

    pub fn generate_name(&self) -> String {
        naming::replica_group_generate_name(&self.repository, &self.branch, &self.sha)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_refine_base_labels() {
        let rev = Revision::new("My-Repo", "feature/x", "abc", 42);
        let labels = rev.labels();
        assert_eq!(labels.get(LABEL_SERVICE), Some("my-repo"));
        assert_eq!(labels.get(LABEL_BRANCH), Some("feature.x"));
        assert_eq!(labels.get(LABEL_SHA), Some("abc"));
        assert_eq!(labels.get(LABEL_DEPLOY_ID), Some("42"));
        assert!(labels.is_superset_of(&Revision::base_labels("My-Repo", "feature/x")));
    }

    #[test]
    fn generate_name_from_revision() {
        let rev = Revision::new("api", "main", "deadbeef", 1);
        assert_eq!(rev.generate_name(), "api-main-deadbeef");
    }
}

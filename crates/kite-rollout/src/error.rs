//! Error types for rollout operations.

use kite_cluster::ClusterError;
use kite_core::MetadataError;
use kite_health::ProbeError;
use kite_notify::SinkError;
use thiserror::Error;

pub type RolloutResult<T> = Result<T, RolloutError>;

#[derive(Debug, Error)]
pub enum RolloutError {
    /// Rejected before anything in the cluster was touched.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("service {namespace}/{name} already exists")]
    ServiceExists { namespace: String, name: String },

    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("multiple services found: {}", names.join(", "))]
    MultipleServices { names: Vec<String> },

    #[error("service {0} carries no deployment metadata")]
    MissingMetadata(String),

    /// Readiness gating failed; the new ReplicaGroup was deleted.
    #[error("replica group {replica_group} rolled back: {source}")]
    RolledBack {
        replica_group: String,
        #[source]
        source: ProbeError,
    },

    /// Readiness gating failed and so did deleting the new ReplicaGroup.
    #[error("replica group {replica_group} could not be rolled back after \"{cause}\": {source}")]
    RollbackFailed {
        replica_group: String,
        cause: String,
        #[source]
        source: ClusterError,
    },

    /// The group is serving but its readiness probe could not be tuned.
    #[error("failed to patch readiness probe on {replica_group}: {source}")]
    ProbePatch {
        replica_group: String,
        #[source]
        source: ClusterError,
    },

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("status sink: {0}")]
    Status(#[from] SinkError),
}

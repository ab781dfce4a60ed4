//! Error types for garbage collection.

use kite_cluster::ClusterError;
use thiserror::Error;

pub type GcResult<T> = Result<T, GcError>;

/// Every variant aborts the sweep. Deletions already made stay made.
#[derive(Debug, Error)]
pub enum GcError {
    #[error("failed to list namespaces: {0}")]
    ListNamespaces(#[source] ClusterError),

    #[error("failed to list replica groups in namespace {namespace}: {source}")]
    ListReplicaGroups {
        namespace: String,
        #[source]
        source: ClusterError,
    },

    #[error("failed to list services in namespace {namespace}: {source}")]
    ListServices {
        namespace: String,
        #[source]
        source: ClusterError,
    },

    #[error("failed to delete replica group {namespace}/{name}: {source}")]
    Delete {
        namespace: String,
        name: String,
        #[source]
        source: ClusterError,
    },
}

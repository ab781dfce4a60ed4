//! Error types for readiness probing.

use std::time::Duration;

use kite_cluster::ClusterError;
use thiserror::Error;

pub type ProbeResult<T> = Result<T, ProbeError>;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("timed out after {after:?} waiting for {waiting_for}")]
    Timeout {
        waiting_for: &'static str,
        after: Duration,
    },

    /// A container is restarting in a loop. `logs` holds the tail of its
    /// previous instance's output.
    #[error("pod {pod} container {container} is crash looping\n{logs}")]
    CrashLoop {
        pod: String,
        container: String,
        logs: String,
    },

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

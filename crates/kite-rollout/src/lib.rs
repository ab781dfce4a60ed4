//! kite-rollout: getting a revision live.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator::deploy(metadata, sha, image, deploy id?)
//!   ├── StatusSink        pending … exactly one terminal state
//!   ├── Notifier          started / success / failed
//!   ├── WorkloadEngine    create ReplicaGroup → ReadinessProber → patch probe
//!   │                     (any readiness failure deletes the group)
//!   └── ServiceRegistry   upsert Service with the revision selector
//!
//! CutoverSwitch::activate   re-point a Service at an existing revision
//! ServiceRegistry           register / settings / scale / teardown
//! ```

pub mod cutover;
pub mod error;
pub mod orchestrator;
pub mod services;
pub mod workload;

pub use cutover::{CutoverSwitch, revision_selector};
pub use error::{RolloutError, RolloutResult};
pub use orchestrator::{DeployPhase, DeployReport, DeployRequest, Orchestrator};
pub use services::{RegistrySettings, ServiceRegistry};
pub use workload::{UpsertRequest, WorkloadEngine};

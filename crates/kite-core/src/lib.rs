//! kite-core: shared types for the kite deployment control plane.
//!
//! Everything that more than one subsystem needs to agree on lives here:
//!
//! - **`labels`**: label sets and the canonical label signature used to
//!   join Services to ReplicaGroups
//! - **`naming`**: normalization of org/repo/branch names into cluster names
//! - **`revision`**: the (repository, branch, sha, deploy id) identity
//! - **`metadata`**: the per-Service deployment configuration blob
//! - **`config`**: `kite.toml` parsing
//! - **`duration`**: human duration strings (`"5s"`, `"72h"`)

pub mod config;
pub mod duration;
pub mod labels;
pub mod metadata;
pub mod naming;
pub mod revision;

pub use config::KiteConfig;
pub use labels::Labels;
pub use metadata::{MetadataError, NotificationTarget, ServiceMetadata};
pub use revision::{DeployId, Revision};

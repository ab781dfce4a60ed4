//! kite-health: readiness gating for freshly created ReplicaGroups.
//!
//! # Architecture
//!
//! ```text
//! ReadinessProber
//!   ├── wait_pods_ready()       ← poll_until(interval, timeout)
//!   │   ├── list pods by the group's selector
//!   │   ├── containers running?  crash loop → fetch previous logs, fail now
//!   │   ├── PortDialer on the first TCP port (UDP counts as ready)
//!   │   └── first ready pod → initial delay measured once
//!   └── wait_desired_replicas() ← poll_until(interval, timeout)
//! ```
//!
//! Polling is the only waiting primitive. Nothing outside the poll loop
//! can stop it early; only a crash loop ends it before the deadline.

pub mod dialer;
pub mod error;
pub mod poll;
pub mod prober;

pub use dialer::{PortDialer, StaticDialer, TcpDialer};
pub use error::{ProbeError, ProbeResult};
pub use poll::{PollError, poll_until};
pub use prober::{ProbeSettings, Readiness, ReadinessProber};

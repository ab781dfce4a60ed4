//! kite-notify: the two outbound sinks of a deploy.
//!
//! - [`StatusSink`] records deployment attempts and their state
//!   transitions with source control (`pending` → `success` | `failure`).
//! - [`Notifier`] fans a human-readable message out to the notification
//!   targets configured on a Service. Delivery is best effort: disabled
//!   targets are skipped and failures are logged, never retried.

pub mod error;
pub mod notifier;
pub mod status;

pub use error::{SinkError, SinkResult};
pub use notifier::{MemoryNotifier, Notifier, WebhookNotifier};
pub use status::{DeploymentState, GitHubStatusSink, LogStatusSink, MemoryStatusSink, StatusEvent, StatusSink};

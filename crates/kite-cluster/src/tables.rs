//! redb table definitions for the cluster store.
//!
//! Namespaced objects are keyed by `{namespace}/{name}`; values are JSON.

use redb::TableDefinition;

/// Namespaces keyed by `{name}`.
pub const NAMESPACES: TableDefinition<&str, &[u8]> = TableDefinition::new("namespaces");

/// Services keyed by `{namespace}/{name}`.
pub const SERVICES: TableDefinition<&str, &[u8]> = TableDefinition::new("services");

/// ReplicaGroups keyed by `{namespace}/{name}`.
pub const REPLICA_GROUPS: TableDefinition<&str, &[u8]> = TableDefinition::new("replica_groups");

/// Pods keyed by `{namespace}/{name}`.
pub const PODS: TableDefinition<&str, &[u8]> = TableDefinition::new("pods");

/// Pod log lines keyed by `{namespace}/{pod}#current` or `#previous`.
pub const POD_LOGS: TableDefinition<&str, &[u8]> = TableDefinition::new("pod_logs");

/// Monotonic counters (name suffixes, pod IPs) keyed by counter name.
pub const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

//! kite-gc: garbage collection of orphaned ReplicaGroups.
//!
//! A ReplicaGroup is orphaned when no Service in its namespace selects
//! exactly its label set. Orphans older than the retention TTL are
//! deleted together with their pods; younger ones are left alone so a
//! revision that has not been cut over yet survives.
//!
//! The collector runs one-shot ([`GarbageCollector::sweep`]), detached
//! ([`GarbageCollector::spawn_sweep`]) or on a fixed interval until shut
//! down ([`GarbageCollector::run`]).

pub mod collector;
pub mod error;

pub use collector::{GarbageCollector, GcReport, GcSettings};
pub use error::{GcError, GcResult};

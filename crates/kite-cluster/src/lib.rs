//! kite-cluster: the cluster contract the control plane is written against.
//!
//! [`ClusterClient`] is the only way the rest of kite touches cluster
//! state. It covers four resource kinds (Namespace, Service, ReplicaGroup,
//! Pod), each addressed by namespace + name and listable by a
//! [`LabelSelector`].
//!
//! [`ClusterStore`] implements the contract on top of
//! [redb](https://docs.rs/redb). It keeps resource versions for
//! read-modify-write conflict detection and plays the part of the
//! replica controller: pods are materialized when a ReplicaGroup is
//! created or scaled.

pub mod cascade;
pub mod client;
pub mod error;
pub mod selector;
pub mod store;
pub mod tables;
pub mod types;

pub use client::ClusterClient;
pub use error::{ClusterError, ClusterResult};
pub use selector::LabelSelector;
pub use store::{ClusterStore, Fault};
pub use types::*;

//! The cluster contract.

use async_trait::async_trait;

use crate::error::ClusterResult;
use crate::selector::LabelSelector;
use crate::types::{Namespace, Pod, ReplicaGroup, Service};

/// CRUD and list access to cluster objects.
///
/// Updates are read-modify-write: callers pass back an object they read,
/// and the cluster rejects it with [`crate::ClusterError::Conflict`] if its
/// `resource_version` is stale.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn list_namespaces(&self) -> ClusterResult<Vec<Namespace>>;
    async fn get_namespace(&self, name: &str) -> ClusterResult<Namespace>;
    async fn create_namespace(&self, name: &str) -> ClusterResult<Namespace>;
    /// Deletes the namespace and everything in it.
    async fn delete_namespace(&self, name: &str) -> ClusterResult<()>;

    async fn list_services(&self, ns: &str, selector: &LabelSelector) -> ClusterResult<Vec<Service>>;
    async fn get_service(&self, ns: &str, name: &str) -> ClusterResult<Service>;
    async fn create_service(&self, service: &Service) -> ClusterResult<Service>;
    async fn update_service(&self, service: &Service) -> ClusterResult<Service>;
    async fn delete_service(&self, ns: &str, name: &str) -> ClusterResult<()>;

    async fn list_replica_groups(
        &self,
        ns: &str,
        selector: &LabelSelector,
    ) -> ClusterResult<Vec<ReplicaGroup>>;
    async fn get_replica_group(&self, ns: &str, name: &str) -> ClusterResult<ReplicaGroup>;
    async fn create_replica_group(&self, group: &ReplicaGroup) -> ClusterResult<ReplicaGroup>;
    async fn update_replica_group(&self, group: &ReplicaGroup) -> ClusterResult<ReplicaGroup>;
    /// Deletes only the group; its pods are left to [`crate::cascade`].
    async fn delete_replica_group(&self, ns: &str, name: &str) -> ClusterResult<()>;
    async fn scale_replica_group(
        &self,
        ns: &str,
        name: &str,
        replicas: u32,
    ) -> ClusterResult<ReplicaGroup>;

    async fn list_pods(&self, ns: &str, selector: &LabelSelector) -> ClusterResult<Vec<Pod>>;
    /// Last `tail_lines` log lines of a pod. `previous` selects the prior
    /// container instance, which is what explains a crash loop.
    async fn get_pod_logs(
        &self,
        ns: &str,
        pod: &str,
        tail_lines: usize,
        previous: bool,
    ) -> ClusterResult<String>;
    async fn delete_pod(&self, ns: &str, name: &str) -> ClusterResult<()>;
}

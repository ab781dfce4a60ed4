//! Cascading deletes.
//!
//! Deleting a ReplicaGroup through the client removes only the group
//! object. These helpers also remove the pods its selector matches, which
//! is what rollback, garbage collection and teardown all need.

use kite_core::Labels;
use tracing::{debug, warn};

use crate::client::ClusterClient;
use crate::error::ClusterResult;
use crate::selector::LabelSelector;

/// Delete a ReplicaGroup and its pods. Returns the number of pods removed.
pub async fn delete_replica_group(
    client: &dyn ClusterClient,
    ns: &str,
    name: &str,
) -> ClusterResult<usize> {
    let group = client.get_replica_group(ns, name).await?;
    client.delete_replica_group(ns, name).await?;

    let pods = client
        .list_pods(ns, &LabelSelector::eq(&group.spec.selector))
        .await?;
    let mut removed = 0;
    for pod in pods {
        match client.delete_pod(ns, &pod.meta.name).await {
            Ok(()) => removed += 1,
            // Already gone is what we wanted.
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                warn!(namespace = %ns, pod = %pod.meta.name, error = %e, "pod delete failed");
                return Err(e);
            }
        }
    }
    debug!(namespace = %ns, replica_group = %name, pods = removed, "replica group deleted with pods");
    Ok(removed)
}

/// Delete every ReplicaGroup whose labels include `labels`, with their pods.
/// Returns the names of the deleted groups.
pub async fn delete_replica_groups_matching(
    client: &dyn ClusterClient,
    ns: &str,
    labels: &Labels,
) -> ClusterResult<Vec<String>> {
    let groups = client
        .list_replica_groups(ns, &LabelSelector::eq(labels))
        .await?;
    let mut deleted = Vec::with_capacity(groups.len());
    for group in groups {
        delete_replica_group(client, ns, &group.meta.name).await?;
        deleted.push(group.meta.name);
    }
    Ok(deleted)
}

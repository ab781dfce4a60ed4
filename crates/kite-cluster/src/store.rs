//! ClusterStore: redb-backed implementation of [`ClusterClient`].
//!
//! Objects are JSON-serialized into `&[u8]` value columns keyed by
//! `{namespace}/{name}`. Every write runs in a single redb write
//! transaction, so a create or scale and the pods it materializes commit
//! together. Supports both on-disk and in-memory backends (the latter for
//! testing).
//!
//! The store also plays the replica controller: creating or scaling a
//! ReplicaGroup adds or removes its pods, which start out waiting in
//! `ContainerCreating` with an assigned IP. Moving them along (running,
//! crash-looping) is up to whoever drives the store, see the
//! "simulation hooks" section.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, Table, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::client::ClusterClient;
use crate::error::{ClusterError, ClusterResult};
use crate::selector::LabelSelector;
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `ClusterError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| ClusterError::$variant(e.to_string())
    };
}

type JsonTable<'txn> = Table<'txn, &'static str, &'static [u8]>;

/// Waiting reason of a freshly materialized container.
pub const CONTAINER_CREATING: &str = "ContainerCreating";

/// Operations that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Fault {
    ListServices,
    UpdateService,
    ListReplicaGroups,
    CreateReplicaGroup,
    UpdateReplicaGroup,
    DeleteReplicaGroup,
    ListPods,
}

/// Thread-safe cluster store backed by redb.
#[derive(Clone)]
pub struct ClusterStore {
    db: Arc<Database>,
    faults: Arc<Mutex<BTreeSet<Fault>>>,
    start_running: Arc<AtomicBool>,
}

impl ClusterStore {
    /// Open (or create) a persistent cluster store at the given path.
    pub fn open(path: &Path) -> ClusterResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_db(db);
        store.ensure_tables()?;
        debug!(?path, "cluster store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory cluster store.
    pub fn open_in_memory() -> ClusterResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_db(db);
        store.ensure_tables()?;
        debug!("in-memory cluster store opened");
        Ok(store)
    }

    fn from_db(db: Database) -> Self {
        Self {
            db: Arc::new(db),
            faults: Arc::new(Mutex::new(BTreeSet::new())),
            start_running: Arc::new(AtomicBool::new(false)),
        }
    }

    fn ensure_tables(&self) -> ClusterResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(NAMESPACES).map_err(map_err!(Table))?;
        txn.open_table(SERVICES).map_err(map_err!(Table))?;
        txn.open_table(REPLICA_GROUPS).map_err(map_err!(Table))?;
        txn.open_table(PODS).map_err(map_err!(Table))?;
        txn.open_table(POD_LOGS).map_err(map_err!(Table))?;
        txn.open_table(COUNTERS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Fault injection ────────────────────────────────────────────

    /// Make every subsequent call of `fault`'s operation fail until [`Self::disarm`].
    pub fn arm(&self, fault: Fault) {
        self.faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(fault);
    }

    pub fn disarm(&self, fault: Fault) {
        self.faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&fault);
    }

    fn check(&self, fault: Fault) -> ClusterResult<()> {
        let armed = self
            .faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&fault);
        if armed {
            return Err(ClusterError::Injected(format!("{fault:?}")));
        }
        Ok(())
    }

    // ── Simulation hooks ───────────────────────────────────────────

    /// When set, pods materialized from now on start with every container
    /// running instead of waiting in [`CONTAINER_CREATING`].
    pub fn set_start_pods_running(&self, running: bool) {
        self.start_running.store(running, Ordering::SeqCst);
    }

    fn initial_container_state(&self) -> ContainerState {
        if self.start_running.load(Ordering::SeqCst) {
            ContainerState::running()
        } else {
            ContainerState::waiting(CONTAINER_CREATING)
        }
    }

    /// Set the state of every container in a pod.
    pub fn set_container_state(&self, ns: &str, pod: &str, state: ContainerState) -> ClusterResult<()> {
        let key = format!("{ns}/{pod}");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(PODS).map_err(map_err!(Table))?;
            let mut current: Pod = load(&table, &key)?.ok_or_else(|| not_found("pod", &key))?;
            for status in &mut current.status.container_statuses {
                if status.state.is_crash_loop() || matches!(status.state, ContainerState::Terminated { .. }) {
                    status.restart_count += 1;
                }
                status.state = state.clone();
            }
            save(&mut table, &key, &current)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, ?state, "container state set");
        Ok(())
    }

    /// Append log lines to a pod's current or previous container instance.
    pub fn push_pod_logs(&self, ns: &str, pod: &str, previous: bool, lines: &[&str]) -> ClusterResult<()> {
        let key = log_key(ns, pod, previous);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(POD_LOGS).map_err(map_err!(Table))?;
            let mut existing: Vec<String> = load(&table, &key)?.unwrap_or_default();
            existing.extend(lines.iter().map(|l| l.to_string()));
            save(&mut table, &key, &existing)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Override the observed replica count of a group, as a stuck controller would report it.
    pub fn set_observed_replicas(&self, ns: &str, name: &str, replicas: u32) -> ClusterResult<()> {
        self.modify_replica_group(ns, name, |group| group.status.replicas = replicas)
    }

    /// Rewrite a group's creation time.
    pub fn set_replica_group_created_at(&self, ns: &str, name: &str, created_at: Timestamp) -> ClusterResult<()> {
        self.modify_replica_group(ns, name, |group| group.meta.created_at = created_at)
    }

    fn modify_replica_group(&self, ns: &str, name: &str, f: impl FnOnce(&mut ReplicaGroup)) -> ClusterResult<()> {
        let key = format!("{ns}/{name}");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(REPLICA_GROUPS).map_err(map_err!(Table))?;
            let mut group: ReplicaGroup =
                load(&table, &key)?.ok_or_else(|| not_found("replicagroup", &key))?;
            f(&mut group);
            save(&mut table, &key, &group)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Internals ──────────────────────────────────────────────────

    fn read_one<T: DeserializeOwned>(
        &self,
        def: redb::TableDefinition<'static, &'static str, &'static [u8]>,
        kind: &'static str,
        key: &str,
    ) -> ClusterResult<T> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        load(&table, key)?.ok_or_else(|| not_found(kind, key))
    }

    fn read_all<T: DeserializeOwned>(
        &self,
        def: redb::TableDefinition<'static, &'static str, &'static [u8]>,
        prefix: &str,
    ) -> ClusterResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        Ok(scan(&table, prefix)?.into_iter().map(|(_, v)| v).collect())
    }

    fn remove_one(
        &self,
        def: redb::TableDefinition<'static, &'static str, &'static [u8]>,
        kind: &'static str,
        key: &str,
    ) -> ClusterResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            let existed = table.remove(key).map_err(map_err!(Write))?.is_some();
            if !existed {
                return Err(not_found(kind, key));
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(kind, %key, "deleted");
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for ClusterStore {
    // ── Namespaces ─────────────────────────────────────────────────

    async fn list_namespaces(&self) -> ClusterResult<Vec<Namespace>> {
        self.read_all(NAMESPACES, "")
    }

    async fn get_namespace(&self, name: &str) -> ClusterResult<Namespace> {
        self.read_one(NAMESPACES, "namespace", name)
    }

    async fn create_namespace(&self, name: &str) -> ClusterResult<Namespace> {
        if name.is_empty() || name.contains('/') {
            return Err(ClusterError::Invalid(format!("namespace name {name:?}")));
        }
        let namespace = Namespace {
            name: name.to_string(),
            labels: Default::default(),
            created_at: epoch_secs(),
        };
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(NAMESPACES).map_err(map_err!(Table))?;
            if load::<Namespace>(&table, name)?.is_some() {
                return Err(ClusterError::AlreadyExists {
                    kind: "namespace",
                    key: name.to_string(),
                });
            }
            save(&mut table, name, &namespace)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(namespace = %name, "namespace created");
        Ok(namespace)
    }

    async fn delete_namespace(&self, name: &str) -> ClusterResult<()> {
        let prefix = format!("{name}/");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(NAMESPACES).map_err(map_err!(Table))?;
            if table.remove(name).map_err(map_err!(Write))?.is_none() {
                return Err(not_found("namespace", name));
            }
            for def in [SERVICES, REPLICA_GROUPS, PODS, POD_LOGS] {
                let mut table = txn.open_table(def).map_err(map_err!(Table))?;
                let keys = scan_keys(&table, &prefix)?;
                for key in keys {
                    table.remove(key.as_str()).map_err(map_err!(Write))?;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(namespace = %name, "namespace deleted");
        Ok(())
    }

    // ── Services ───────────────────────────────────────────────────

    async fn list_services(&self, ns: &str, selector: &LabelSelector) -> ClusterResult<Vec<Service>> {
        self.check(Fault::ListServices)?;
        let services: Vec<Service> = self.read_all(SERVICES, &format!("{ns}/"))?;
        Ok(services
            .into_iter()
            .filter(|s| selector.matches(&s.meta.labels))
            .collect())
    }

    async fn get_service(&self, ns: &str, name: &str) -> ClusterResult<Service> {
        self.read_one(SERVICES, "service", &format!("{ns}/{name}"))
    }

    async fn create_service(&self, service: &Service) -> ClusterResult<Service> {
        let mut service = service.clone();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            require_namespace(&txn, &service.meta.namespace)?;
            assign_name(&txn, &mut service.meta)?;
            let key = service.meta.key();
            let mut table = txn.open_table(SERVICES).map_err(map_err!(Table))?;
            if load::<Service>(&table, &key)?.is_some() {
                return Err(ClusterError::AlreadyExists { kind: "service", key });
            }
            service.meta.resource_version = 1;
            service.meta.created_at = epoch_secs();
            save(&mut table, &key, &service)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(key = %service.meta.key(), "service created");
        Ok(service)
    }

    async fn update_service(&self, service: &Service) -> ClusterResult<Service> {
        self.check(Fault::UpdateService)?;
        let mut service = service.clone();
        let key = service.meta.key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SERVICES).map_err(map_err!(Table))?;
            let current: Service = load(&table, &key)?.ok_or_else(|| not_found("service", &key))?;
            check_version("service", &key, service.meta.resource_version, current.meta.resource_version)?;
            service.meta.resource_version = current.meta.resource_version + 1;
            service.meta.created_at = current.meta.created_at;
            save(&mut table, &key, &service)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, version = service.meta.resource_version, "service updated");
        Ok(service)
    }

    async fn delete_service(&self, ns: &str, name: &str) -> ClusterResult<()> {
        self.remove_one(SERVICES, "service", &format!("{ns}/{name}"))
    }

    // ── ReplicaGroups ──────────────────────────────────────────────

    async fn list_replica_groups(
        &self,
        ns: &str,
        selector: &LabelSelector,
    ) -> ClusterResult<Vec<ReplicaGroup>> {
        self.check(Fault::ListReplicaGroups)?;
        let groups: Vec<ReplicaGroup> = self.read_all(REPLICA_GROUPS, &format!("{ns}/"))?;
        Ok(groups
            .into_iter()
            .filter(|g| selector.matches(&g.meta.labels))
            .collect())
    }

    async fn get_replica_group(&self, ns: &str, name: &str) -> ClusterResult<ReplicaGroup> {
        self.read_one(REPLICA_GROUPS, "replicagroup", &format!("{ns}/{name}"))
    }

    async fn create_replica_group(&self, group: &ReplicaGroup) -> ClusterResult<ReplicaGroup> {
        self.check(Fault::CreateReplicaGroup)?;
        let mut group = group.clone();
        if group.spec.template.containers.is_empty() {
            return Err(ClusterError::Invalid("pod template has no containers".to_string()));
        }
        if group.spec.selector.is_empty() {
            group.spec.selector = group.spec.template.labels.clone();
        }
        if !group.spec.template.labels.is_superset_of(&group.spec.selector) {
            return Err(ClusterError::Invalid(format!(
                "selector {} does not match template labels {}",
                group.spec.selector, group.spec.template.labels
            )));
        }
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            require_namespace(&txn, &group.meta.namespace)?;
            assign_name(&txn, &mut group.meta)?;
            let key = group.meta.key();
            let mut table = txn.open_table(REPLICA_GROUPS).map_err(map_err!(Table))?;
            if load::<ReplicaGroup>(&table, &key)?.is_some() {
                return Err(ClusterError::AlreadyExists {
                    kind: "replicagroup",
                    key,
                });
            }
            group.meta.resource_version = 1;
            group.meta.created_at = epoch_secs();
            group.status.replicas = reconcile_pods(&txn, &group, &self.initial_container_state())?;
            save(&mut table, &key, &group)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(key = %group.meta.key(), replicas = group.spec.replicas, "replica group created");
        Ok(group)
    }

    async fn update_replica_group(&self, group: &ReplicaGroup) -> ClusterResult<ReplicaGroup> {
        self.check(Fault::UpdateReplicaGroup)?;
        let mut group = group.clone();
        let key = group.meta.key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(REPLICA_GROUPS).map_err(map_err!(Table))?;
            let current: ReplicaGroup =
                load(&table, &key)?.ok_or_else(|| not_found("replicagroup", &key))?;
            check_version("replicagroup", &key, group.meta.resource_version, current.meta.resource_version)?;
            group.meta.resource_version = current.meta.resource_version + 1;
            group.meta.created_at = current.meta.created_at;
            group.status = current.status;
            if group.spec.replicas != current.spec.replicas {
                group.status.replicas = reconcile_pods(&txn, &group, &self.initial_container_state())?;
            }
            save(&mut table, &key, &group)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, version = group.meta.resource_version, "replica group updated");
        Ok(group)
    }

    async fn delete_replica_group(&self, ns: &str, name: &str) -> ClusterResult<()> {
        self.check(Fault::DeleteReplicaGroup)?;
        self.remove_one(REPLICA_GROUPS, "replicagroup", &format!("{ns}/{name}"))
    }

    async fn scale_replica_group(
        &self,
        ns: &str,
        name: &str,
        replicas: u32,
    ) -> ClusterResult<ReplicaGroup> {
        let key = format!("{ns}/{name}");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let group = {
            let mut table = txn.open_table(REPLICA_GROUPS).map_err(map_err!(Table))?;
            let mut group: ReplicaGroup =
                load(&table, &key)?.ok_or_else(|| not_found("replicagroup", &key))?;
            group.spec.replicas = replicas;
            group.meta.resource_version += 1;
            group.status.replicas = reconcile_pods(&txn, &group, &self.initial_container_state())?;
            save(&mut table, &key, &group)?;
            group
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, replicas, "replica group scaled");
        Ok(group)
    }

    // ── Pods ───────────────────────────────────────────────────────

    async fn list_pods(&self, ns: &str, selector: &LabelSelector) -> ClusterResult<Vec<Pod>> {
        self.check(Fault::ListPods)?;
        let pods: Vec<Pod> = self.read_all(PODS, &format!("{ns}/"))?;
        Ok(pods
            .into_iter()
            .filter(|p| selector.matches(&p.meta.labels))
            .collect())
    }

    async fn get_pod_logs(
        &self,
        ns: &str,
        pod: &str,
        tail_lines: usize,
        previous: bool,
    ) -> ClusterResult<String> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let pods = txn.open_table(PODS).map_err(map_err!(Table))?;
        let pod_key = format!("{ns}/{pod}");
        if load::<Pod>(&pods, &pod_key)?.is_none() {
            return Err(not_found("pod", &pod_key));
        }
        let logs = txn.open_table(POD_LOGS).map_err(map_err!(Table))?;
        let lines: Vec<String> = load(&logs, &log_key(ns, pod, previous))?.unwrap_or_default();
        let start = lines.len().saturating_sub(tail_lines);
        Ok(lines[start..].join("\n"))
    }

    async fn delete_pod(&self, ns: &str, name: &str) -> ClusterResult<()> {
        let key = format!("{ns}/{name}");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(PODS).map_err(map_err!(Table))?;
            if table.remove(key.as_str()).map_err(map_err!(Write))?.is_none() {
                return Err(not_found("pod", &key));
            }
            let mut logs = txn.open_table(POD_LOGS).map_err(map_err!(Table))?;
            for previous in [false, true] {
                logs.remove(log_key(ns, name, previous).as_str())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "pod deleted");
        Ok(())
    }
}

// ── Table helpers ──────────────────────────────────────────────────

fn load<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> ClusterResult<Option<T>> {
    match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => serde_json::from_slice(guard.value())
            .map(Some)
            .map_err(map_err!(Deserialize)),
        None => Ok(None),
    }
}

fn scan<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    prefix: &str,
) -> ClusterResult<Vec<(String, T)>> {
    let mut results = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (key, value) = entry.map_err(map_err!(Read))?;
        if key.value().starts_with(prefix) {
            let decoded: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push((key.value().to_string(), decoded));
        }
    }
    Ok(results)
}

fn scan_keys(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    prefix: &str,
) -> ClusterResult<Vec<String>> {
    let mut keys = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (key, _) = entry.map_err(map_err!(Read))?;
        if key.value().starts_with(prefix) {
            keys.push(key.value().to_string());
        }
    }
    Ok(keys)
}

fn save<T: Serialize>(table: &mut JsonTable<'_>, key: &str, value: &T) -> ClusterResult<()> {
    let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
    table
        .insert(key, bytes.as_slice())
        .map_err(map_err!(Write))?;
    Ok(())
}

fn not_found(kind: &'static str, key: &str) -> ClusterError {
    ClusterError::NotFound {
        kind,
        key: key.to_string(),
    }
}

fn check_version(kind: &'static str, key: &str, have: u64, current: u64) -> ClusterResult<()> {
    if have != current {
        return Err(ClusterError::Conflict {
            kind,
            key: key.to_string(),
            have,
            current,
        });
    }
    Ok(())
}

fn log_key(ns: &str, pod: &str, previous: bool) -> String {
    let instance = if previous { "previous" } else { "current" };
    format!("{ns}/{pod}#{instance}")
}

fn require_namespace(txn: &WriteTransaction, ns: &str) -> ClusterResult<()> {
    let table = txn.open_table(NAMESPACES).map_err(map_err!(Table))?;
    match load::<Namespace>(&table, ns)? {
        Some(_) => Ok(()),
        None => Err(not_found("namespace", ns)),
    }
}

fn next_counter(txn: &WriteTransaction, name: &str) -> ClusterResult<u64> {
    let mut table = txn.open_table(COUNTERS).map_err(map_err!(Table))?;
    let next = table
        .get(name)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value())
        .unwrap_or(0)
        + 1;
    table.insert(name, next).map_err(map_err!(Write))?;
    Ok(next)
}

/// Five characters derived from a counter; distinct for the first 27^5 values.
fn name_suffix(n: u64) -> String {
    const ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";
    let mut n = n.wrapping_mul(2_654_435_761) % 27u64.pow(5);
    (0..5)
        .map(|_| {
            let c = ALPHABET[(n % 27) as usize] as char;
            n /= 27;
            c
        })
        .collect()
}

fn assign_name(txn: &WriteTransaction, meta: &mut ObjectMeta) -> ClusterResult<()> {
    if !meta.name.is_empty() {
        return Ok(());
    }
    if meta.generate_name.is_empty() {
        return Err(ClusterError::Invalid(
            "name or generate_name is required".to_string(),
        ));
    }
    meta.name = format!("{}{}", meta.generate_name, name_suffix(next_counter(txn, "names")?));
    Ok(())
}

/// Bring the group's pod set to `spec.replicas`. Returns the resulting pod count.
fn reconcile_pods(txn: &WriteTransaction, group: &ReplicaGroup, initial: &ContainerState) -> ClusterResult<u32> {
    let mut table = txn.open_table(PODS).map_err(map_err!(Table))?;
    let prefix = format!("{}/", group.meta.namespace);
    let mut owned: Vec<String> = scan::<Pod>(&table, &prefix)?
        .into_iter()
        .filter(|(_, pod)| pod.owner.as_deref() == Some(group.meta.name.as_str()))
        .map(|(key, _)| key)
        .collect();
    owned.sort();

    let desired = group.spec.replicas as usize;
    while owned.len() > desired {
        if let Some(key) = owned.pop() {
            table.remove(key.as_str()).map_err(map_err!(Write))?;
        }
    }
    while owned.len() < desired {
        let name = format!("{}-{}", group.meta.name, name_suffix(next_counter(txn, "names")?));
        let ip = next_counter(txn, "pod_ips")?;
        let pod = Pod {
            meta: ObjectMeta {
                name: name.clone(),
                namespace: group.meta.namespace.clone(),
                labels: group.spec.template.labels.clone(),
                resource_version: 1,
                created_at: epoch_secs(),
                ..Default::default()
            },
            owner: Some(group.meta.name.clone()),
            containers: group.spec.template.containers.clone(),
            status: PodStatus {
                pod_ip: Some(format!("10.244.{}.{}", (ip / 250) % 250, ip % 250 + 1)),
                container_statuses: group
                    .spec
                    .template
                    .containers
                    .iter()
                    .map(|c| ContainerStatus {
                        name: c.name.clone(),
                        state: initial.clone(),
                        restart_count: 0,
                    })
                    .collect(),
            },
        };
        let key = pod.meta.key();
        save(&mut table, &key, &pod)?;
        owned.push(key);
    }
    Ok(owned.len() as u32)
}

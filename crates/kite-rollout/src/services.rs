//! Service registry: the lifecycle of the routing objects revisions are
//! deployed behind.
//!
//! A Service is identified by its base labels (`service`, `branch`) and
//! carries its deployment configuration as a JSON annotation. Objects
//! labelled `type` belong to the cluster's own machinery and are never
//! matched here.

use std::sync::Arc;

use kite_cluster::{
    ClusterClient, ClusterError, LabelSelector, ObjectMeta, Protocol, ReplicaGroup, Service, ServicePort, ServiceSpec,
    SessionAffinity, cascade,
};
use kite_core::labels::{LABEL_DEPLOY_ID, LABEL_LOADBALANCER, LABEL_SHA, LABEL_TYPE};
use kite_core::metadata::METADATA_ANNOTATION;
use kite_core::{KiteConfig, Labels, MetadataError, Revision, ServiceMetadata, naming};
use tracing::{debug, info};

use crate::error::{RolloutError, RolloutResult};

/// Longest accepted service name.
pub const SERVICE_NAME_MAX: usize = 24;

/// Cluster port the first container port is published on.
pub const PRIMARY_SERVICE_PORT: u16 = 80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySettings {
    pub max_replicas: u32,
    /// Stamped on every Service as the `loadbalancer` label.
    pub load_balancer: String,
    /// Namespaces that can never be deleted through the registry.
    pub reserved_namespaces: Vec<String>,
}

impl From<&KiteConfig> for RegistrySettings {
    fn from(config: &KiteConfig) -> Self {
        Self {
            max_replicas: config.cluster.max_replicas,
            load_balancer: config.load_balancer.driver.clone(),
            reserved_namespaces: config.cluster.reserved_namespaces.clone(),
        }
    }
}

/// Service ports for a container port list: the first is published on
/// port 80, the rest on themselves.
pub fn service_ports(container_ports: &[u16]) -> Vec<ServicePort> {
    container_ports
        .iter()
        .enumerate()
        .map(|(i, &target)| {
            let port = if i == 0 { PRIMARY_SERVICE_PORT } else { target };
            ServicePort {
                name: format!("port{port}"),
                port,
                target_port: target,
                protocol: Protocol::Tcp,
            }
        })
        .collect()
}

pub struct ServiceRegistry {
    client: Arc<dyn ClusterClient>,
    settings: RegistrySettings,
}

impl ServiceRegistry {
    pub fn new(client: Arc<dyn ClusterClient>, settings: RegistrySettings) -> Self {
        Self { client, settings }
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    /// Create the Service for a new (org, repo, branch), creating the
    /// org's namespace on first use. The selector starts out as the base
    /// labels, so nothing is routed until the first cutover.
    pub async fn register(&self, mut meta: ServiceMetadata) -> RolloutResult<Service> {
        self.check_replicas(meta.replicas, 1)?;
        let ports = meta.resolve_ports()?;
        if ports.is_empty() {
            return Err(MetadataError::NoPorts.into());
        }
        check_service_name(&meta.service)?;

        let ns = naming::namespace_for_org(&meta.github_org);
        match self.client.get_service(&ns, &meta.service).await {
            Ok(_) => {
                return Err(RolloutError::ServiceExists {
                    namespace: ns,
                    name: meta.service,
                });
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        self.ensure_namespace(&ns).await?;

        meta.namespace = ns.clone();
        let annotation = meta.to_annotation()?;
        let base = Revision::base_labels(&meta.github_repo, &meta.git_branch);
        let svc = self
            .upsert_service(&ns, &meta.service, &base, &base, Some(annotation), &ports)
            .await?;
        info!(namespace = %ns, service = %svc.meta.name, "service registered");
        Ok(svc)
    }

    /// Create or update the single Service carrying `labels`.
    ///
    /// A new Service is named `name`; an existing one keeps its name and
    /// gets its ports and selector replaced, plus its metadata annotation
    /// when one is given.
    pub async fn upsert_service(
        &self,
        ns: &str,
        name: &str,
        labels: &Labels,
        selector: &Labels,
        annotation: Option<String>,
        ports: &[u16],
    ) -> RolloutResult<Service> {
        let labels = labels
            .clone()
            .with(LABEL_LOADBALANCER, self.settings.load_balancer.clone());
        let ports = service_ports(ports);

        let mut existing = self
            .client
            .list_services(ns, &LabelSelector::eq(&labels).without(LABEL_TYPE))
            .await?;
        if existing.len() > 1 {
            return Err(RolloutError::MultipleServices {
                names: existing.into_iter().map(|s| s.meta.name).collect(),
            });
        }

        match existing.pop() {
            None => {
                let mut meta = ObjectMeta::named(ns, name);
                meta.labels = labels;
                if let Some(annotation) = annotation {
                    meta.annotations.insert(METADATA_ANNOTATION.to_string(), annotation);
                }
                let svc = Service {
                    meta,
                    spec: ServiceSpec {
                        selector: selector.clone(),
                        ports,
                        session_affinity: SessionAffinity::ClientIp,
                    },
                };
                let created = self.client.create_service(&svc).await?;
                info!(namespace = %ns, service = %created.meta.name, selector = %created.spec.selector, "service created");
                Ok(created)
            }
            Some(mut svc) => {
                if let Some(annotation) = annotation {
                    svc.meta.annotations.insert(METADATA_ANNOTATION.to_string(), annotation);
                }
                svc.spec.ports = ports;
                svc.spec.selector = selector.clone();
                let updated = self.client.update_service(&svc).await?;
                info!(namespace = %ns, service = %updated.meta.name, selector = %updated.spec.selector, "service updated");
                Ok(updated)
            }
        }
    }

    /// The Service and its decoded metadata.
    pub async fn get(&self, ns: &str, name: &str) -> RolloutResult<(Service, ServiceMetadata)> {
        let svc = self.client.get_service(ns, name).await?;
        let meta = decode_metadata(&svc)?;
        Ok((svc, meta))
    }

    /// Look a Service up by the source-control coordinates it was registered with.
    pub async fn find(&self, org: &str, repo: &str, branch: &str) -> RolloutResult<(Service, ServiceMetadata)> {
        let ns = naming::namespace_for_org(org);
        let base = Revision::base_labels(repo, branch);
        let mut found = self
            .client
            .list_services(&ns, &LabelSelector::eq(&base).without(LABEL_TYPE))
            .await?;
        match found.len() {
            0 => Err(RolloutError::ServiceNotFound(format!("{org}/{repo}@{branch}"))),
            1 => {
                let svc = found.remove(0);
                let meta = decode_metadata(&svc)?;
                Ok((svc, meta))
            }
            _ => Err(RolloutError::MultipleServices {
                names: found.into_iter().map(|s| s.meta.name).collect(),
            }),
        }
    }

    /// Replace the Service's metadata blob. Namespace and service name in
    /// the blob are forced to the Service's own.
    pub async fn update_settings(&self, ns: &str, name: &str, mut meta: ServiceMetadata) -> RolloutResult<Service> {
        self.check_replicas(meta.replicas, 1)?;
        let mut svc = self.client.get_service(ns, name).await?;
        meta.namespace = ns.to_string();
        meta.service = name.to_string();
        svc.meta
            .annotations
            .insert(METADATA_ANNOTATION.to_string(), meta.to_annotation()?);
        let updated = self.client.update_service(&svc).await?;
        debug!(namespace = %ns, service = %name, replicas = meta.replicas, "settings updated");
        Ok(updated)
    }

    /// Scale one of the Service's ReplicaGroups. Scaling to zero tears the
    /// group down with its pods and leaves the metadata alone; any other
    /// count becomes the Service's replica count for future deploys.
    pub async fn scale(
        &self,
        ns: &str,
        service: &str,
        replica_group: &str,
        replicas: u32,
    ) -> RolloutResult<Option<ReplicaGroup>> {
        self.check_replicas(replicas, 0)?;
        if replicas == 0 {
            let pods = cascade::delete_replica_group(self.client.as_ref(), ns, replica_group).await?;
            info!(namespace = %ns, %service, %replica_group, pods, "replica group torn down");
            return Ok(None);
        }

        let group = self
            .client
            .scale_replica_group(ns, replica_group, replicas)
            .await?;
        let (mut svc, mut meta) = self.get(ns, service).await?;
        meta.replicas = replicas;
        svc.meta
            .annotations
            .insert(METADATA_ANNOTATION.to_string(), meta.to_annotation()?);
        self.client.update_service(&svc).await?;
        info!(namespace = %ns, %service, %replica_group, replicas, "replica group scaled");
        Ok(Some(group))
    }

    /// Delete the Service and every ReplicaGroup deployed behind it.
    /// Returns the names of the deleted groups.
    pub async fn delete_service(&self, ns: &str, name: &str) -> RolloutResult<Vec<String>> {
        let svc = self.client.get_service(ns, name).await?;
        let base = svc.spec.selector.without(&[LABEL_SHA, LABEL_DEPLOY_ID]);
        self.client.delete_service(ns, name).await?;

        let deleted = if base.is_empty() {
            Vec::new()
        } else {
            cascade::delete_replica_groups_matching(self.client.as_ref(), ns, &base).await?
        };
        info!(namespace = %ns, service = %name, replica_groups = deleted.len(), "service deleted");
        Ok(deleted)
    }

    /// Delete every Service in `ns` (cascading), then the namespace.
    pub async fn delete_namespace(&self, ns: &str) -> RolloutResult<()> {
        if self.settings.reserved_namespaces.iter().any(|r| r == ns) {
            return Err(RolloutError::InvalidInput(format!("namespace {ns} is reserved")));
        }
        let services = self
            .client
            .list_services(ns, &LabelSelector::everything().without(LABEL_TYPE))
            .await?;
        for svc in services {
            self.delete_service(ns, &svc.meta.name).await?;
        }
        self.client.delete_namespace(ns).await?;
        info!(namespace = %ns, "namespace deleted");
        Ok(())
    }

    fn check_replicas(&self, replicas: u32, min: u32) -> RolloutResult<()> {
        if replicas < min || replicas > self.settings.max_replicas {
            return Err(RolloutError::InvalidInput(format!(
                "replicas must be between {min} and {}, got {replicas}",
                self.settings.max_replicas
            )));
        }
        Ok(())
    }

    async fn ensure_namespace(&self, ns: &str) -> RolloutResult<()> {
        match self.client.get_namespace(ns).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => match self.client.create_namespace(ns).await {
                Ok(_) => {
                    info!(namespace = %ns, "namespace created");
                    Ok(())
                }
                // Lost a race with a concurrent register.
                Err(ClusterError::AlreadyExists { .. }) => Ok(()),
                Err(e) => Err(e.into()),
            },
            Err(e) => Err(e.into()),
        }
    }
}

fn check_service_name(name: &str) -> RolloutResult<()> {
    let starts_with_letter = name.chars().next().is_some_and(|c| c.is_ascii_alphabetic());
    if !starts_with_letter || name.len() > SERVICE_NAME_MAX {
        return Err(RolloutError::InvalidInput(format!(
            "service name {name:?} must start with a letter and be at most {SERVICE_NAME_MAX} characters"
        )));
    }
    Ok(())
}

fn decode_metadata(svc: &Service) -> RolloutResult<ServiceMetadata> {
    let raw = svc
        .meta
        .annotations
        .get(METADATA_ANNOTATION)
        .ok_or_else(|| RolloutError::MissingMetadata(svc.meta.key()))?;
    Ok(ServiceMetadata::from_annotation(raw)?)
}

//! Cluster state queries: service listing and endpoint resolution.
//!
//! This module is the only one that talks to the Kubernetes API. The rest of
//! the crate consumes it through the [`ClusterView`] trait so the
//! reconciliation core can run against fakes in tests.
//!
//! # How It Works
//!
//! 1. Services are listed across all namespaces in a single call
//! 2. For each exposed port, the service's `Endpoints` object is fetched by
//!    name and namespace
//! 3. Each endpoint subset is matched against the port's declared target
//!    (numeric or named) and every ready address is collected as `ip:port`
//!
//! The two-step read means the endpoint view can lag the service view when
//! the cluster changes mid-cycle; convergence happens on the next cycle.

use std::path::Path;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{EndpointSubset, Endpoints, Service, ServicePort};
use kube::api::ListParams;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};

use crate::error::QueryError;

/// Port target declared by a service, either numeric or named.
///
/// Kubernetes allows a service port's `targetPort` to reference a container
/// port by number or by name; an absent target defaults to the service port
/// number itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PortTarget {
    /// A numeric container port.
    Number(i32),
    /// A named container port (resolved against the endpoint subset's ports).
    Name(String),
}

impl From<i32> for PortTarget {
    fn from(port: i32) -> Self {
        Self::Number(port)
    }
}

impl From<&str> for PortTarget {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<&ServicePort> for PortTarget {
    fn from(port: &ServicePort) -> Self {
        use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

        match &port.target_port {
            Some(IntOrString::Int(n)) => Self::Number(*n),
            Some(IntOrString::String(name)) => Self::Name(name.clone()),
            // targetPort defaults to the service port number when omitted.
            None => Self::Number(port.port),
        }
    }
}

/// Live backends resolved for a single service port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortBackends {
    /// The resolved numeric container port.
    pub port: i32,
    /// Every ready backend as `address:port`, in subset encounter order.
    pub addresses: Vec<String>,
}

/// Read-only view of the cluster state consumed by the reconciliation core.
#[async_trait]
pub trait ClusterView: Send + Sync {
    /// Lists every service across all namespaces.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::ListServices`] if the API call fails.
    async fn services(&self) -> Result<Vec<Service>, QueryError>;

    /// Resolves the live backends for one service port.
    ///
    /// Returns `None` when no endpoints object exists, its identity does not
    /// match the requested service, or no subset carries a port matching
    /// `target` with at least one ready address.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::GetEndpoints`] if the API call fails; a missing
    /// endpoints object is `Ok(None)`, not an error.
    async fn backends(
        &self,
        name: &str,
        namespace: &str,
        target: &PortTarget,
    ) -> Result<Option<PortBackends>, QueryError>;
}

/// [`ClusterView`] backed by a real Kubernetes client.
#[derive(Clone)]
pub struct KubeClusterView {
    client: Client,
}

impl KubeClusterView {
    /// Wraps an already constructed client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterView for KubeClusterView {
    async fn services(&self) -> Result<Vec<Service>, QueryError> {
        let api: Api<Service> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(QueryError::ListServices)?;
        Ok(list.items)
    }

    async fn backends(
        &self,
        name: &str,
        namespace: &str,
        target: &PortTarget,
    ) -> Result<Option<PortBackends>, QueryError> {
        let api: Api<Endpoints> = Api::namespaced(self.client.clone(), namespace);
        let endpoints = api
            .get_opt(name)
            .await
            .map_err(|source| QueryError::GetEndpoints {
                namespace: namespace.to_string(),
                name: name.to_string(),
                source,
            })?;

        Ok(endpoints
            .as_ref()
            .and_then(|ep| resolve_backends(ep, name, namespace, target)))
    }
}

/// Builds a Kubernetes client from a kubeconfig file.
///
/// Read once at startup; any failure here is fatal to the process.
///
/// # Errors
///
/// Fails if the kubeconfig cannot be read or parsed, or if the client cannot
/// be constructed from it.
pub async fn client_from_kubeconfig(path: &Path) -> anyhow::Result<Client> {
    use anyhow::Context;

    let kubeconfig = Kubeconfig::read_from(path)
        .with_context(|| format!("failed to read kubeconfig {}", path.display()))?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .context("failed to interpret kubeconfig")?;
    let client = Client::try_from(config).context("failed to construct cluster client")?;
    Ok(client)
}

/// Resolves the backends an endpoints object provides for one port target.
///
/// A response whose metadata does not match the requested name and namespace
/// is treated as "no endpoints found" rather than an error; a stale or
/// mismatched lookup must never contribute backends to another service.
///
/// The target is resolved to a single numeric port across all subsets before
/// any backend is collected; a named target that maps to more than one
/// distinct number is ambiguous and drops the port entirely, so a record can
/// never declare one `target_port` while routing to another.
#[must_use]
pub fn resolve_backends(
    endpoints: &Endpoints,
    name: &str,
    namespace: &str,
    target: &PortTarget,
) -> Option<PortBackends> {
    if endpoints.metadata.name.as_deref() != Some(name)
        || endpoints.metadata.namespace.as_deref() != Some(namespace)
    {
        tracing::debug!(
            expected = %format!("{namespace}/{name}"),
            "endpoints identity mismatch, treating as no endpoints"
        );
        return None;
    }

    let subsets = endpoints.subsets.as_deref().unwrap_or_default();

    let mut resolved_port = None;
    for subset in subsets {
        let Some(port) = subset_port(subset, target) else {
            continue;
        };
        match resolved_port {
            None => resolved_port = Some(port),
            Some(existing) if existing != port => {
                tracing::debug!(
                    requested = ?target,
                    first = existing,
                    second = port,
                    "ambiguous port resolution, dropping port"
                );
                return None;
            }
            Some(_) => {}
        }
    }
    let port = resolved_port?;

    let mut addresses = Vec::new();
    for subset in subsets {
        if subset_port(subset, target) != Some(port) {
            continue;
        }
        // Only subset.addresses are ready; not_ready_addresses are excluded.
        for addr in subset.addresses.as_deref().unwrap_or_default() {
            let ip = &addr.ip;
            addresses.push(format!("{ip}:{port}"));
        }
    }

    if addresses.is_empty() {
        return None;
    }

    Some(PortBackends { port, addresses })
}

/// Finds the subset's endpoint port matching the target, if any.
fn subset_port(subset: &EndpointSubset, target: &PortTarget) -> Option<i32> {
    let ports = subset.ports.as_deref().unwrap_or_default();
    match target {
        PortTarget::Number(n) => ports.iter().find(|p| p.port == *n).map(|p| p.port),
        PortTarget::Name(name) => ports
            .iter()
            .find(|p| p.name.as_deref() == Some(name.as_str()))
            .map(|p| p.port),
    }
}

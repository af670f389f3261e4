//! Candidate construction and change detection.
//!
//! The candidate set is the normalized desired state: one [`ExposureRecord`]
//! per (service, exposed port) pair that is eligible for external exposure
//! and has at least one live backend. Each cycle builds a fresh set from
//! scratch; records are never mutated after construction.

use k8s_openapi::api::core::v1::Service;
use serde::Serialize;
use tracing::debug;

use crate::error::QueryError;
use crate::k8s::{ClusterView, PortTarget};

/// One proxy rule: a service port exposed on a load-balancer address, routed
/// to its resolved backends.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExposureRecord {
    /// Deterministic identifier, `namespace_serviceName_port`. Stable across
    /// cycles for the same logical exposure, and the template's unique key
    /// per backend rule.
    pub name: String,
    /// Namespace of the owning service.
    pub namespace: String,
    /// Externally assigned load-balancer address.
    pub load_balancer_address: String,
    /// Port exposed on the load-balancer address.
    pub exposed_port: i32,
    /// Container port the backends listen on, resolved from the service's
    /// declared target.
    pub target_port: i32,
    /// Ready backends as `address:port`; never empty.
    pub backends: Vec<String>,
}

/// Derives the deterministic rule name for a service port.
#[must_use]
pub fn rule_name(namespace: &str, service: &str, port: i32) -> String {
    format!("{namespace}_{service}_{port}")
}

/// Builds the candidate set from a raw service listing.
///
/// Services that are not `LoadBalancer` typed or have no assigned address are
/// rejected; ports with no resolvable ready backends are dropped. Each
/// rejection is logged. Records are emitted in listing encounter order.
///
/// # Errors
///
/// Propagates [`QueryError`] from backend lookups; the caller decides whether
/// that is fatal (first cycle) or skips the tick (steady state).
pub async fn build<V>(view: &V, services: &[Service]) -> Result<Vec<ExposureRecord>, QueryError>
where
    V: ClusterView + ?Sized,
{
    let mut records = Vec::new();

    for service in services {
        let Some(name) = service.metadata.name.as_deref() else {
            continue;
        };
        let Some(namespace) = service.metadata.namespace.as_deref() else {
            continue;
        };
        let Some(spec) = service.spec.as_ref() else {
            continue;
        };

        debug!(
            service = %format!("{namespace}/{name}"),
            kind = spec.type_.as_deref().unwrap_or(""),
            "service candidate"
        );

        if spec.type_.as_deref() != Some("LoadBalancer") {
            debug!(service = name, "dropped candidate: not a LoadBalancer service");
            continue;
        }

        let Some(address) = spec.load_balancer_ip.as_deref().filter(|ip| !ip.is_empty()) else {
            debug!(service = name, "dropped candidate: no load balancer address assigned");
            continue;
        };

        for port in spec.ports.as_deref().unwrap_or_default() {
            let target = PortTarget::from(port);
            let Some(backends) = view.backends(name, namespace, &target).await? else {
                debug!(
                    service = name,
                    port = port.port,
                    "dropped port: no ready backends"
                );
                continue;
            };

            let record = ExposureRecord {
                name: rule_name(namespace, name, port.port),
                namespace: namespace.to_string(),
                load_balancer_address: address.to_string(),
                exposed_port: port.port,
                target_port: backends.port,
                backends: backends.addresses,
            };

            debug!(rule = %record.name, backends = ?record.backends, "candidate accepted");
            records.push(record);
        }
    }

    Ok(records)
}

/// Reports whether the candidate set differs from the previously applied one.
///
/// Deep structural equality over the full ordered sequence: every field and
/// every backend entry, in order. Reordering with identical content counts as
/// a change, so the rendered configuration always mirrors the latest listing
/// order exactly.
#[must_use]
pub fn changed(previous: &[ExposureRecord], current: &[ExposureRecord]) -> bool {
    previous != current
}

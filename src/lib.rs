#![deny(missing_docs)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Kubernetes `LoadBalancer` service discovery with templated proxy
//! configuration and reload.
//!
//! This crate is a reconciliation controller for clusters whose external
//! load balancing is handled by a proxy outside the cluster. It discovers
//! services of type `LoadBalancer` with an assigned external address,
//! resolves their live backends from `Endpoints`, and on every material
//! change fully re-renders a templated configuration file and triggers an
//! external reload command.
//!
//! # How It Works
//!
//! 1. List services across all namespaces and keep those eligible for
//!    external exposure
//! 2. Resolve each exposed port to its ready `address:port` backends
//! 3. Compare the resulting candidate set against the last applied one
//! 4. On change, render the template, atomically replace the output file,
//!    and invoke the reload command
//!
//! The loop runs on a fixed interval with a synchronous first pass; the
//! first cycle's fetch failure is fatal, later failures skip the tick.
//!
//! # Usage
//!
//! ```ignore
//! use std::time::Duration;
//!
//! use kube_lb_sync::apply::{CommandReload, ConfigApplier, JinjaRenderer};
//! use kube_lb_sync::k8s::{KubeClusterView, client_from_kubeconfig};
//! use kube_lb_sync::sync::Reconciler;
//!
//! let client = client_from_kubeconfig("/root/.kube/config".as_ref()).await?;
//! let applier = ConfigApplier::new(
//!     "config.tmpl".into(),
//!     "config.conf".into(),
//!     JinjaRenderer::new(),
//!     CommandReload::new("./reload.sh".into(), Duration::from_secs(30)),
//! );
//! Reconciler::new(KubeClusterView::new(client), applier, Duration::from_secs(10))
//!     .run()
//!     .await?;
//! ```

pub mod apply;
pub mod candidate;
pub mod error;
pub mod k8s;
pub mod sync;

pub use candidate::{ExposureRecord, changed};
pub use k8s::{ClusterView, KubeClusterView, PortTarget};
pub use sync::Reconciler;

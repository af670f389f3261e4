//! Error taxonomy for the reconciliation pipeline.
//!
//! Errors are split by the stage that produces them so the scheduler can
//! distinguish fatal startup failures from cycle-local ones. Endpoint lookups
//! that return nothing (missing object, mismatched identity, no matching
//! port) are not errors at all; they surface as absent backends.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures while querying the cluster API.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Listing services across all namespaces failed.
    #[error("failed to list services: {0}")]
    ListServices(#[source] kube::Error),

    /// Fetching the endpoints object for a service failed.
    #[error("failed to fetch endpoints for {namespace}/{name}: {source}")]
    GetEndpoints {
        /// Namespace of the service whose endpoints were requested.
        namespace: String,
        /// Name of the service whose endpoints were requested.
        name: String,
        /// Underlying client error.
        #[source]
        source: kube::Error,
    },
}

/// Failure while rendering the configuration template.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The template text failed to parse or render.
    #[error("template render failed: {0}")]
    Template(#[from] minijinja::Error),
}

/// Failures while applying a rendered configuration.
///
/// Reload failures are deliberately absent: by the time the reload hook runs
/// the configuration file is already updated, so a failed reload is logged
/// rather than reported as an apply error.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The template file could not be read.
    #[error("failed to read template {path}: {source}")]
    ReadTemplate {
        /// Path of the template file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Rendering the template against the candidate set failed.
    #[error(transparent)]
    Render(#[from] RenderError),

    /// Writing or replacing the output file failed.
    #[error("failed to write configuration {path}: {source}")]
    WriteConfig {
        /// Path of the output file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Failures while invoking the external reload command.
#[derive(Debug, Error)]
pub enum ReloadError {
    /// The reload command could not be launched.
    #[error("failed to launch reload command {command}: {source}")]
    Launch {
        /// Path of the configured reload executable.
        command: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The reload command exceeded its allotted time and was killed.
    #[error("reload command timed out after {0:?}")]
    TimedOut(Duration),
}

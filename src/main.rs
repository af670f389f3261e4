//! Command-line entry point: flag parsing, logging setup, kubeconfig
//! loading, and wiring of the reconciliation loop.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use kube_lb_sync::apply::{CommandReload, ConfigApplier, JinjaRenderer};
use kube_lb_sync::k8s::{KubeClusterView, client_from_kubeconfig};
use kube_lb_sync::sync::Reconciler;

/// Discovers LoadBalancer services and keeps a proxy configuration in sync.
#[derive(Debug, Parser)]
#[command(name = "kube-lb-sync", version, about)]
struct Args {
    /// Path to the cluster access configuration.
    ///
    /// Defaults to `$HOME/.kube/config` when unset.
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Template file to render the proxy configuration from.
    #[arg(long, default_value = "config.tmpl")]
    template: PathBuf,

    /// Configuration file to write.
    #[arg(long, default_value = "config.conf")]
    output: PathBuf,

    /// Command to run after a configuration rewrite, invoked with no
    /// arguments.
    #[arg(long, default_value = "./reload.sh")]
    reload_command: PathBuf,

    /// Seconds between reconciliation cycles.
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    sync_period: u64,

    /// Seconds to wait for the reload command before killing it.
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    reload_timeout: u64,

    /// Log at debug level (RUST_LOG overrides).
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn default_kubeconfig() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".kube").join("config"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let kubeconfig = args
        .kubeconfig
        .or_else(default_kubeconfig)
        .context("no kubeconfig path: set --kubeconfig, KUBECONFIG, or HOME")?;
    let client = client_from_kubeconfig(&kubeconfig).await?;

    let applier = ConfigApplier::new(
        args.template,
        args.output,
        JinjaRenderer::new(),
        CommandReload::new(args.reload_command, Duration::from_secs(args.reload_timeout)),
    );
    let reconciler = Reconciler::new(
        KubeClusterView::new(client),
        applier,
        Duration::from_secs(args.sync_period),
    );

    reconciler
        .run()
        .await
        .context("initial reconciliation failed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_defaults() {
        let args = Args::try_parse_from(["kube-lb-sync"]).unwrap();

        assert_eq!(args.sync_period, 10);
        assert_eq!(args.reload_timeout, 30);
        assert!(!args.verbose);
    }

    #[test]
    fn args_reject_zero_sync_period() {
        // A zero interval would panic in tokio::time::interval.
        assert!(Args::try_parse_from(["kube-lb-sync", "--sync-period", "0"]).is_err());
    }

    #[test]
    fn args_reject_zero_reload_timeout() {
        assert!(Args::try_parse_from(["kube-lb-sync", "--reload-timeout", "0"]).is_err());
    }
}

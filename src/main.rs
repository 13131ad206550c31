//! Nebula Operator - reconciles NebulaCluster resources

use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use nebula_operator::config::{ControllerConfig, LogFormat};
use nebula_operator::controller::{error_policy, reconcile, Context};
use nebula_operator::crd::NebulaCluster;
use nebula_operator::retry::{retry_with_backoff, RetryConfig};
use nebula_operator::FIELD_MANAGER;

/// Nebula Operator - drives NebulaGraph clusters toward their declared state
#[derive(Parser, Debug)]
#[command(name = "nebula-operator", version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    controller: ControllerConfig,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Installs or updates the NebulaCluster CRD, then watches NebulaClusters
    /// and their StatefulSets until a shutdown signal arrives.
    Controller(ControllerConfig),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = match cli.command {
        Some(Commands::Controller(config)) => config,
        None => cli.controller,
    };

    init_tracing(config.log_format);

    if cli.crd {
        // Generate CRD YAML
        let crd = serde_yaml::to_string(&NebulaCluster::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    run_controller(config).await
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init(),
    }
}

/// Ensure the NebulaCluster CRD is installed
///
/// The operator installs its own CRD on startup using server-side apply so
/// the CRD version always matches the operator version.
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();
    let crd = NebulaCluster::crd();
    let patch = Patch::Apply(&crd);
    let name = NebulaCluster::crd_name();

    tracing::info!(crd = name, "Installing NebulaCluster CRD...");
    retry_with_backoff(&RetryConfig::with_max_attempts(5), "install_crd", || {
        crds.patch(name, &params, &patch)
    })
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install NebulaCluster CRD: {}", e))?;

    tracing::info!("NebulaCluster CRD installed/updated");
    Ok(())
}

/// Run the NebulaCluster controller until a shutdown signal arrives
async fn run_controller(config: ControllerConfig) -> anyhow::Result<()> {
    tracing::info!("Nebula operator starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crd_installed(&client).await?;

    let (clusters, statefulsets): (Api<NebulaCluster>, Api<StatefulSet>) =
        match config.namespace.as_deref() {
            Some(ns) => {
                tracing::info!(namespace = ns, "Watching a single namespace");
                (
                    Api::namespaced(client.clone(), ns),
                    Api::namespaced(client.clone(), ns),
                )
            }
            None => (Api::all(client.clone()), Api::all(client.clone())),
        };

    let ctx = Arc::new(Context::builder(client).config(config).build());

    tracing::info!("Starting NebulaCluster controller...");
    Controller::new(clusters, WatcherConfig::default())
        .owns(statefulsets, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "Cluster reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Cluster reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("Nebula operator shutting down");
    Ok(())
}

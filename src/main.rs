//! pgcluster operator - reconciles PostgresCluster resources

use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tokio_util::sync::CancellationToken;

use pgcluster::config::OperatorConfig;
use pgcluster::controller::{error_policy, reconcile, Context};
use pgcluster::crd::PostgresCluster;
use pgcluster::retry::{retry_with_backoff, RetryConfig};
use pgcluster::telemetry::init_telemetry;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

/// pgcluster - Kubernetes operator for PostgresCluster resources
#[derive(Parser, Debug)]
#[command(name = "pgcluster-operator", version, about, long_about = None)]
struct Cli {
    /// Print the PostgresCluster CRD manifest and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    config: OperatorConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // kube's rustls client has no provider of its own
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        anyhow::bail!("failed to install aws-lc-rs crypto provider: {:?}", e);
    }

    if cli.crd {
        let crd = serde_yaml::to_string(&PostgresCluster::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry(cli.config.telemetry())?;
    run_controller(cli.config).await
}

/// Run the PostgresCluster controller until a shutdown signal
async fn run_controller(config: OperatorConfig) -> anyhow::Result<()> {
    tracing::info!("starting pgcluster operator");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create kube client: {}", e))?;

    ensure_crd_installed(&client).await?;

    let shutdown = CancellationToken::new();
    let ctx = Arc::new(
        Context::builder(client.clone())
            .config(&config)
            .shutdown(shutdown.clone())
            .build(),
    );

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received, cancelling in-flight passes");
                shutdown.cancel();
            }
        }
    });

    let watcher = || WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);
    let clusters: Api<PostgresCluster> = Api::all(client.clone());

    Controller::new(clusters, watcher())
        .owns(Api::<Service>::all(client.clone()), watcher())
        .owns(Api::<StatefulSet>::all(client.clone()), watcher())
        .owns(Api::<Deployment>::all(client.clone()), watcher())
        .owns(Api::<CronJob>::all(client), watcher())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| {
            match result {
                Ok(action) => tracing::debug!(?action, "PostgresCluster reconciliation completed"),
                Err(e) => tracing::error!(error = ?e, "PostgresCluster reconciliation error"),
            }
            std::future::ready(())
        })
        .await;

    tracing::info!("controller stopped");
    Ok(())
}

/// Install or update the PostgresCluster CRD using server-side apply
///
/// Retried with backoff since the API server may still be starting.
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(pgcluster::FIELD_MANAGER).force();
    let crd = PostgresCluster::crd();
    let patch = Patch::Apply(&crd);
    let name = PostgresCluster::crd_name();

    tracing::info!(crd = name, "installing CRD");
    retry_with_backoff(
        &RetryConfig::with_max_attempts(5),
        "install CRD",
        |_: &kube::Error| true,
        || crds.patch(name, &params, &patch),
    )
    .await
    .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", name, e))?;

    tracing::info!(crd = name, "CRD installed/updated");
    Ok(())
}

//! Xelon Cloud Controller Manager

use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use xelon_ccm::{
    api::{self, AppState},
    config::{ControllerConfig, RunArgs},
    controllers::{Context, NodeController, ServiceController},
    load_balancer::LoadBalancers,
    node_cache::NodeCache,
    observability::{init_metrics, init_tracing, shutdown_tracing, TracingConfig},
    patcher::KubeServiceStore,
    version,
};

#[derive(Parser)]
#[command(name = "xelon-ccm")]
#[command(about = "Kubernetes cloud controller manager for Xelon")]
#[command(version = version::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the service and node controllers
    Run(RunArgs),
    /// Print build information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("{}", version::build_info());
            Ok(())
        }
        Commands::Run(args) => {
            init_tracing(&TracingConfig::from_env())
                .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;
            let result = run(args).await;
            if let Err(e) = &result {
                error!(error = %e, "Controller manager stopped");
            }
            shutdown_tracing();
            result
        }
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    info!(
        version = %version::full_version(),
        cloud_id = %args.cloud_id,
        kubernetes_cluster_id = %args.kubernetes_cluster_id,
        "Starting xelon-ccm"
    );

    let metrics_state = init_metrics()
        .map_err(|e| anyhow::anyhow!("failed to initialize metrics: {e}"))?;
    let config = ControllerConfig::from_env();

    if args.client_id.as_deref().unwrap_or_default().is_empty() {
        warn!("XELON_CLIENT_ID is not set, API requests are sent without a client id");
    }
    let xelon = xelon_api::Client::new(&args.token, args.client_options())
        .context("failed to build Xelon API client")?;
    let tenant = xelon
        .current_tenant()
        .await
        .context("failed to fetch current Xelon tenant")?;
    info!(tenant_id = %tenant.tenant_id, tenant = %tenant.name, base_url = %xelon.base_url(), "Connected to Xelon");

    let client = kube::Client::try_default()
        .await
        .context("failed to connect to Kubernetes")?;
    info!("Connected to Kubernetes");

    let cloud = Arc::new(xelon);
    let load_balancers = LoadBalancers::new(
        cloud.clone(),
        Arc::new(KubeServiceStore::new(client.clone())),
        args.kubernetes_cluster_id.clone(),
    )
    .with_provisioning_retry(config.provisioning_retry);
    let nodes = NodeCache::new(cloud, args.kubernetes_cluster_id.clone(), config.node_cache_ttl);
    let ctx = Arc::new(Context::new(client.clone(), load_balancers, nodes, config));

    let state = AppState::new(Some(metrics_state));
    state.set_ready(true);

    tokio::select! {
        _ = ServiceController::run(client.clone(), ctx.clone()) => {
            warn!("Service controller stopped");
        }
        _ = NodeController::run(client, ctx) => {
            warn!("Node controller stopped");
        }
        result = api::serve(args.metrics_addr, state) => {
            result.context("health and metrics server failed")?;
        }
    }

    Ok(())
}

//! Netplane
//!
//! VLAN cluster network control plane. `manager` runs the cluster-wide
//! controllers, `agent` runs on every node and programs its devices.

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use kube::CustomResourceExt;
use netplane_core::{ClusterNetwork, VlanConfig, VlanStatus};
use netplane_operator::{
    config::{AgentArgs, ManagerArgs},
    controllers::{
        AgentController, AgentHandler, Context, ManagerHandler, VlanConfigController,
        VlanStatusController,
    },
    store::{KubeStore, ObjectStore},
    telemetry::{init_tracing, LogFormat},
};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "netplane")]
#[command(about = "Cluster network control plane for VLAN uplinks")]
struct Cli {
    /// Log output format
    #[arg(long, global = true, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print CRD manifests to stdout
    Crds,
    /// Run the management plane controllers
    Manager(ManagerArgs),
    /// Run the node agent
    Agent(AgentArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Crds => print_crds(),
        Commands::Manager(args) => {
            init_tracing(cli.log_format)?;
            run_manager(args).await
        }
        Commands::Agent(args) => {
            init_tracing(cli.log_format)?;
            run_agent(args).await
        }
    }
}

fn print_crds() -> anyhow::Result<()> {
    for crd in [VlanConfig::crd(), VlanStatus::crd(), ClusterNetwork::crd()] {
        println!("---");
        println!("{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}

async fn connect() -> anyhow::Result<kube::Client> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("failed to install rustls crypto provider"))?;

    let client = kube::Client::try_default().await?;
    info!("Connected to Kubernetes");
    Ok(client)
}

async fn run_manager(args: ManagerArgs) -> anyhow::Result<()> {
    info!("Starting netplane manager");

    let client = connect().await?;
    let store: Arc<dyn ObjectStore> = Arc::new(KubeStore::new(client.clone()));
    let ctx = Arc::new(Context::new(
        client,
        ManagerHandler::new(store),
        args.settings,
    ));

    tokio::select! {
        _ = VlanConfigController::run(ctx.clone()) => {}
        _ = VlanStatusController::run(ctx.clone()) => {}
    }

    Ok(())
}

async fn run_agent(args: AgentArgs) -> anyhow::Result<()> {
    info!(node = %args.node_name, driver = ?args.driver, "Starting netplane agent");

    let client = connect().await?;
    let store: Arc<dyn ObjectStore> = Arc::new(KubeStore::new(client.clone()));
    let handler = AgentHandler::new(&args.node_name, store, args.device_controller());
    let ctx = Arc::new(Context::new(client, handler, args.settings));

    AgentController::run(ctx).await;

    Ok(())
}

mod agent;
mod artifacts;
mod handlers;
mod liveness;
mod reconcile;
mod tasks;

use agent::Agent;
use agent_core::EnvConfig;
use agent_firewall::FirewallProgrammer;
use agent_render::RendererCatalog;
use agent_store::{KvClient, KvEndpoint};
use agent_supervisor::supervisorctl::SupervisorctlAdapter;
use agent_telemetry::AgentMetrics;
use clap::Parser;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

const SUPERVISOR_CONF_DIR: &str = "/etc/supervisor/conf.d";

#[derive(Parser, Debug)]
#[command(name = "node-agent", version, about = "Per-node control-plane agent for the overlay-network appliance")]
struct Cli {
    /// Log level, overridden by RUST_LOG if set.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Run a single reconcile pass and exit, instead of starting the
    /// background task set.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    agent_telemetry::init_logging(&cli.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "node-agent starting");

    let config = EnvConfig::load().map_err(|e| {
        error!(error = %e, "missing or malformed required environment configuration");
        e
    })?;

    let endpoint = KvEndpoint {
        endpoints: config.etcd_endpoints(),
        ca_path: config.etcd_ca.clone(),
        cert_path: config.etcd_cert.clone(),
        key_path: config.etcd_key.clone(),
        username: config.etcd_user.clone(),
        password: config.etcd_pass.clone(),
    };

    let kv = KvClient::connect(endpoint.clone())
        .await
        .map_err(|e| anyhow::anyhow!("fatal startup error: could not connect to etcd: {e}"))?;

    let mut catalog = RendererCatalog::new();
    agent_renderers::register_all(&mut catalog);
    info!(renderers = catalog.len(), "renderer catalog ready");

    let supervisor = Arc::new(SupervisorctlAdapter::new(SUPERVISOR_CONF_DIR));
    let firewall = FirewallProgrammer::new();
    let metrics = AgentMetrics::new()?;

    let agent = Arc::new(Agent::new(config, kv, catalog, supervisor, firewall, metrics));

    if cli.once {
        reconcile::reconcile_once(&agent).await?;
        info!("single reconcile pass complete");
        return Ok(());
    }

    tasks::spawn_all(Arc::clone(&agent), endpoint);
    info!("background task set started");

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigusr1 = signal(SignalKind::user_defined1())?;

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down");
                break;
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down");
                break;
            }
            _ = sigusr1.recv() => {
                agent.request_force_reconcile();
            }
        }
    }

    info!(metrics = %agent.metrics.gather_text(), "node-agent stopped");
    Ok(())
}

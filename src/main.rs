//! Entry point: CLI argument parsing, startup logging/error-reporting setup,
//! signal wiring and assembling `AgentOptions` before handing off to
//! `agent::run`.

mod agent;
mod config;
mod identity;
mod protocol;

use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{eyre, Result};
use tokio::sync::oneshot;
use tracing::info;
use tracing_subscriber::EnvFilter;

use agent::adapter::{EchoAdapter, ExecutionAdapter};
use config::{load_file_defaults, AgentOptions};
use identity::AgentIdentity;

/// Exposes named host functions and instances as an MQTT-addressable RPC service.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// Broker URL, e.g. mqtt://localhost:1883 or mqtts://broker.example.com
    #[arg(long)]
    broker: Option<String>,

    /// Logical namespace all of this agent's topics are rooted at.
    #[arg(long)]
    domain: Option<String>,

    /// Agent name; generated from host facts when omitted.
    #[arg(long)]
    agent: Option<String>,

    /// Function name to expose in addition to the built-in lifecycle calls. May be repeated.
    #[arg(long = "function")]
    functions: Vec<String>,

    #[arg(long, env = "MQTT_RPC_AGENT_USERNAME")]
    username: Option<String>,

    #[arg(long, env = "MQTT_RPC_AGENT_PASSWORD")]
    password: Option<String>,

    #[arg(long, env = "MQTT_RPC_AGENT_TOKEN")]
    token: Option<String>,
}

fn main() -> Result<()> {
    setup()?;

    let cli = Cli::parse();
    let defaults = load_file_defaults();

    let broker = cli
        .broker
        .or(defaults.broker)
        .ok_or_else(|| eyre!("no broker url given (pass --broker or set it in agent.toml)"))?;
    let domain = cli
        .domain
        .or(defaults.domain)
        .ok_or_else(|| eyre!("no domain given (pass --domain or set it in agent.toml)"))?;
    let agent_name = cli.agent.or(defaults.agent);

    let mut functions = cli.functions;
    functions.extend(defaults.functions.unwrap_or_default());

    let mut options = AgentOptions::new(&broker, domain, agent_name, functions)?;
    options.username = cli.username.or(defaults.username);
    options.password = cli.password.or(defaults.password);
    options.token = cli.token.or(defaults.token);

    let identity = AgentIdentity::derive(&options.domain, options.agent.as_deref());
    info!(
        domain = %options.domain,
        agent = %options.agent.clone().unwrap_or_else(|| identity.agent_name.clone()),
        broker = %options.host,
        "resolved agent identity"
    );

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let adapter: Arc<dyn ExecutionAdapter> = Arc::new(EchoAdapter);

        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("received interrupt, shutting down");
            let _ = shutdown_tx.send(());
        });

        agent::run(options, identity, adapter, shutdown_rx).await;
    });

    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0");
    }
    color_eyre::install()?;

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    Ok(())
}

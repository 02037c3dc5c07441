//! # Hub
//!
//! The IoT hub executable.
//!
//! ```text
//! hub serve --config hub.toml
//! hub agent-token --config hub.toml --client-id thermostat-agent
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hub_gateway::HubService;
use hub_node::{issue_agent_token, load_config, open_digitwin, run};
use hub_telemetry::init_logging;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "hub")]
#[command(about = "IoT hub runtime: digital twin directory and message router")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, short, global = true, env = "HUB_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the hub
    Serve,
    /// Print a long-lived token for an agent client
    AgentToken {
        /// Client id from the client store
        #[arg(long)]
        client_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Serve => {
            init_logging(&config.logging).context("initializing logging")?;
            info!(
                version = hub_gateway::VERSION,
                addr = %config.bind_addr(),
                storage = ?config.storage.backend,
                "hub starting"
            );
            let digitwin = open_digitwin(&config)?;
            let hub = HubService::new(config, digitwin).context("building hub")?;
            run(hub).await
        }
        Command::AgentToken { client_id } => {
            let token = issue_agent_token(config, &client_id)?;
            println!("{token}");
            Ok(())
        }
    }
}

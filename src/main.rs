use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use focustrack_lib::settings::{AgentSettings, ServerSettings};

#[derive(Parser)]
#[command(name = "focustrack", version, about = "Focus session capture and ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the ingestion server.
    Serve {
        #[arg(long, default_value = "focustrack-server.json")]
        config: PathBuf,
    },
    /// Capture focus sessions on this device and sync them.
    Agent {
        #[arg(long, default_value = "focustrack-agent.json")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    focustrack_lib::init_logging();

    match Cli::parse().command {
        Command::Serve { config } => {
            let settings = ServerSettings::load(&config)?;
            focustrack_lib::run_server(settings).await
        }
        Command::Agent { config } => {
            let settings = AgentSettings::load(&config)?;
            focustrack_lib::run_agent(settings).await
        }
    }
}

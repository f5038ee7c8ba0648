use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::prelude::*;

use agent_console::{ConsoleConfig, cli};

#[derive(Parser)]
#[command(name = "agentc")]
#[command(about = "Chat with a streaming agent service or attach to its terminal")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data directory (default: ~/.agentc)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Origin the service is reached through, e.g. https://agents.example.com
    #[arg(long, global = true)]
    origin: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat line by line on stdin/stdout
    Chat(SessionArgs),
    /// Attach this terminal to the agent's remote shell (Ctrl-] detaches)
    Terminal(SessionArgs),
}

#[derive(Parser)]
struct SessionArgs {
    /// Agent id to talk to (default: [agent] default in config.toml)
    #[arg(short, long)]
    agent: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so they never interleave with transcript output
    let default_directive = if cli.debug {
        "agentc=debug,agent_console=debug,agent_stream=debug,info"
    } else {
        "agentc=info,agent_console=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let config = ConsoleConfig::new(cli.data_dir)?;
    let mut file_config = config.load()?;
    if let Some(origin) = cli.origin {
        file_config.server.origin = origin;
    }

    match cli.command {
        Commands::Chat(args) => cli::chat::run(&file_config, args.agent).await,
        #[cfg(unix)]
        Commands::Terminal(args) => {
            cli::terminal::run(&file_config, args.agent).await?;
            Ok(())
        }
        #[cfg(not(unix))]
        Commands::Terminal(_) => anyhow::bail!("terminal attach is only supported on Unix"),
    }
}

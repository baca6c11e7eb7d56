//! Lobbyist - persistent SpringRTS lobby client
//!
//! Loads the TOML config, connects, logs in, joins the configured channels
//! and logs chat until interrupted.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use lobbyist_core::LobbyConfig;
use lobbyist_net::{Client, ClientOptions, EventBus, TcpConnector};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod responder;

use responder::Responder;

#[derive(Debug, Parser)]
#[command(name = "lobbyist", version, about = "Persistent SpringRTS lobby client")]
struct Args {
    /// Config file (defaults to <config dir>/lobbyist/lobbyist.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Answer channel messages regardless of the config's echo setting
    #[arg(long)]
    echo: bool,

    /// Log at debug level, including every line sent and received
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    tracing::info!("Starting lobbyist");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to create tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "lobbyist stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let path = match args.config {
        Some(path) => path,
        None => LobbyConfig::default_path()?,
    };
    let config = LobbyConfig::load(&path)?;
    tracing::info!(
        config = %path.display(),
        server = %format!("{}:{}", config.lobby.host, config.lobby.port),
        user = ?config.lobby.user,
        "Loaded config"
    );

    let bus = EventBus::new();
    Responder::new(args.echo || config.client.echo).install(&bus);

    let client = Client::connect(ClientOptions::from(&config), Arc::new(TcpConnector), bus).await?;
    tracing::info!(netid = %client.netid(), "Connected");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupted, shutting down");
    client.shutdown();
    Ok(())
}

#![deny(unsafe_code)]

//! lnprototest CLI: runs the proxy daemon and talks to it over its control
//! socket.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use lnprototest_config::{AppConfig, Network};
use lnprototest_core::rpc::{RpcClient, socket_path_from_config};
use lnprototest_core::{Daemon, logging};

/// lnprototest: drive one Lightning peer connection from a test harness.
#[derive(Parser)]
#[command(name = "lnprototest", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "lnprototest.toml")]
    config: PathBuf,

    /// Directory holding the control socket (overrides the config file).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Network selector (overrides the config file).
    #[arg(long, global = true)]
    network: Option<Network>,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon in the foreground.
    Start,

    /// Dial a node on 127.0.0.1 and print its greeting.
    Connect {
        /// Hex-encoded compressed public key of the node.
        node_id: String,
        /// Port the node listens on.
        port: u32,
    },

    /// Send one hex frame and print the node's reply.
    Send {
        /// Hex-encoded frame.
        msg: String,
    },

    /// Wait for the next frame from the node.
    Receive,

    /// Close the current peer connection.
    Disconnect,

    /// Show daemon identity, network and peer.
    Info,

    /// Stop a running daemon.
    Stop,

    /// Call any control method with raw JSON params.
    Call {
        method: String,
        /// Params as a JSON object or array.
        #[arg(long)]
        params: Option<String>,
    },

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli).await?;

    logging::init(&logging::default_filter(&config.logging.level, cli.verbose));

    match cli.command {
        Commands::Start => cmd_start(config).await?,
        Commands::Connect { node_id, port } => {
            let mut client = client(&config).await?;
            print_json(&client.connect_peer(&node_id, port).await?)?;
        }
        Commands::Send { msg } => {
            let mut client = client(&config).await?;
            print_json(&client.send(&msg).await?)?;
        }
        Commands::Receive => {
            let mut client = client(&config).await?;
            print_json(&client.receive().await?)?;
        }
        Commands::Disconnect => {
            let mut client = client(&config).await?;
            print_json(&client.disconnect().await?)?;
        }
        Commands::Info => {
            let mut client = client(&config).await?;
            print_json(&client.getinfo().await?)?;
        }
        Commands::Stop => {
            info!("Sending stop request to lnprototest daemon");
            let mut client = client(&config).await?;
            print_json(&client.stop().await?)?;
        }
        Commands::Call { method, params } => {
            let params = match params {
                Some(raw) => serde_json::from_str(&raw).context("--params is not valid JSON")?,
                None => Value::Null,
            };
            let mut client = client(&config).await?;
            print_json(&client.call_raw(&method, params).await?)?;
        }
        Commands::Config { show } => cmd_config(&cli.config, &config, show)?,
    }

    Ok(())
}

async fn cmd_start(config: AppConfig) -> Result<()> {
    info!("Starting lnprototest daemon");
    let daemon = Daemon::new(config)?;
    daemon.run().await?;
    Ok(())
}

fn cmd_config(config_path: &Path, config: &AppConfig, show: bool) -> Result<()> {
    if show {
        let toml_str = toml::to_string_pretty(config).context("failed to render config")?;
        println!("{toml_str}");
    } else {
        println!("Configuration at '{}' is valid.", config_path.display());
    }
    Ok(())
}

async fn client(config: &AppConfig) -> Result<RpcClient> {
    let socket = socket_path_from_config(config)?;
    Ok(RpcClient::connect(socket).await?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Load the config file (defaults if it does not exist), then apply flags.
async fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = if cli.config.exists() {
        AppConfig::load(&cli.config)
            .await
            .with_context(|| format!("failed to load {}", cli.config.display()))?
    } else {
        AppConfig::default()
    };

    if let Some(dir) = &cli.data_dir {
        config.daemon.data_dir = Some(dir.display().to_string());
    }
    if let Some(network) = cli.network {
        config.peer.network = network;
    }
    config.validate()?;
    Ok(config)
}

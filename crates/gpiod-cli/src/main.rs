#![deny(unsafe_code)]

//! gpiod CLI: runs the pipe daemon or the HTTP facade, and talks to a
//! running daemon.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gpiod_config::AppConfig;
use gpiod_core::client::PipeClient;
use gpiod_core::daemon::{PipeDaemon, shutdown_signal};
use gpiod_core::http::{self, HttpState};
use gpiod_core::protocol::Reply;

/// gpiod: digital I/O board access over named pipes and HTTP.
#[derive(Parser)]
#[command(name = "gpiod", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "gpiod.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the named-pipe daemon.
    Pipe,

    /// Run the HTTP facade.
    Http,

    /// Query the logical state of an input.
    Input {
        index: u8,
        #[command(flatten)]
        client: ClientArgs,
    },

    /// Drive an output.
    Output {
        index: u8,
        state: Level,
        #[command(flatten)]
        client: ClientArgs,
    },

    /// Switch a relay.
    Relay {
        index: u8,
        state: Level,
        #[command(flatten)]
        client: ClientArgs,
    },

    /// Send raw JSON to the daemon and print the first result.
    Send {
        json: String,
        #[command(flatten)]
        client: ClientArgs,
    },

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },

    /// Print version and build information.
    Version,
}

#[derive(Args)]
struct ClientArgs {
    /// How long to wait for the daemon, in milliseconds.
    #[arg(long, default_value_t = 2000)]
    timeout_ms: u64,
}

#[derive(Clone, Copy, ValueEnum)]
enum Level {
    On,
    Off,
}

impl From<Level> for bool {
    fn from(level: Level) -> bool {
        matches!(level, Level::On)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        println!("gpiod {}", gpiod_core::build_info::version_string());
        return Ok(());
    }

    let (config, found) = load_config(&cli.config).await?;
    init_tracing(cli.verbose, &config.logging.level);
    if !found {
        info!(path = %cli.config.display(), "Config file not found, using defaults");
    }

    match cli.command {
        Commands::Pipe => cmd_pipe(config).await?,
        Commands::Http => cmd_http(config).await?,
        Commands::Input { index, client } => {
            let state = pipe_client(&config, &client).query_input(index).await?;
            println!("{state}");
        }
        Commands::Output {
            index,
            state,
            client,
        } => {
            let ok = pipe_client(&config, &client)
                .set_output(index, state.into())
                .await?;
            println!("{ok}");
        }
        Commands::Relay {
            index,
            state,
            client,
        } => {
            let ok = pipe_client(&config, &client)
                .set_relay(index, state.into())
                .await?;
            println!("{ok}");
        }
        Commands::Send { json, client } => cmd_send(&config, &client, &json).await?,
        Commands::Config { show } => cmd_config(&config, &cli.config, show)?,
        Commands::Version => {}
    }

    Ok(())
}

/// `RUST_LOG` wins, then `-v` flags, then `logging.level`.
fn init_tracing(verbose: u8, configured: &str) {
    let filter = match verbose {
        0 => configured,
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn cmd_pipe(config: AppConfig) -> Result<()> {
    let hardware = gpiod_core::select_backend(&config.hardware);
    let daemon = PipeDaemon::new(config.pipes, hardware);
    daemon.run().await.context("pipe daemon failed")?;
    Ok(())
}

async fn cmd_http(config: AppConfig) -> Result<()> {
    let addr = format!("{}:{}", config.http.listen_addr, config.http.listen_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(
        version = %gpiod_core::build_info::version_string(),
        %addr,
        "gpiod HTTP facade starting"
    );

    let state = Arc::new(HttpState {
        hardware: gpiod_core::select_backend(&config.hardware),
        pins: config.hardware,
    });
    http::serve(listener, state, async {
        let signal = shutdown_signal().await;
        warn!(signal, "Signal received, initiating shutdown");
    })
    .await?;
    Ok(())
}

async fn cmd_send(config: &AppConfig, client: &ClientArgs, json: &str) -> Result<()> {
    let mut payload = json.trim_end().as_bytes().to_vec();
    payload.push(b'\n');
    let reply = pipe_client(config, client).send_raw(&payload).await?;
    println!("{}", serde_json::to_string(&reply)?);
    if let Reply::Error { error } = reply {
        anyhow::bail!("daemon rejected the message: {}", error.message);
    }
    Ok(())
}

fn cmd_config(config: &AppConfig, config_path: &Path, show: bool) -> Result<()> {
    if show {
        let toml_str = toml::to_string_pretty(config).context("failed to render config")?;
        println!("{toml_str}");
    } else {
        println!("Configuration at '{}' is valid.", config_path.display());
    }
    Ok(())
}

fn pipe_client(config: &AppConfig, args: &ClientArgs) -> PipeClient {
    PipeClient::from_config(&config.pipes).with_timeout(Duration::from_millis(args.timeout_ms))
}

/// Load `path`, or fall back to defaults when it does not exist.
async fn load_config(path: &Path) -> Result<(AppConfig, bool)> {
    if path.exists() {
        let config = AppConfig::load(path)
            .await
            .with_context(|| format!("failed to load {}", path.display()))?;
        Ok((config, true))
    } else {
        Ok((AppConfig::default(), false))
    }
}

//! `piggyback`: push stdin lines through a backend or print what arrives.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod backend;
mod commands;
mod error;

use backend::ConfiguredBackend;
use error::Error;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use piggyback_codec::Utf8Codec;
use piggyback_socket::{Settings, Socket, SocketMode, SocketOptions};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// TOML settings file
    #[arg(short, long, env = "PIGGYBACK_CONFIG")]
    config: Option<PathBuf>,

    /// Backend to use, overriding `[app] backend`
    #[arg(short, long, env = "PIGGYBACK_BACKEND")]
    backend: Option<String>,

    /// Most verbose level logged
    #[arg(long, default_value = "info", env = "PIGGYBACK_LOG_LEVEL")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, Subcommand)]
enum Command {
    /// Send each line of stdin
    Push {
        /// Publish under this topic instead of pushing
        #[arg(long)]
        topic: Option<String>,
    },

    /// Print received values
    Pull {
        /// Subscribe to this topic prefix instead of pulling; repeatable
        #[arg(long)]
        subscribe: Vec<String>,

        /// Exit after this many values
        #[arg(long)]
        count: Option<u64>,
    },

    /// Send each line of stdin and print it once it comes back
    Loopback,
}

fn open(
    settings: &Settings,
    backend: &str,
    mode: SocketMode,
    options: SocketOptions,
) -> Result<commands::TextSocket<ConfiguredBackend>, Error> {
    let backend = ConfiguredBackend::from_settings(settings, backend)?;
    Ok(Socket::new(backend, Utf8Codec, mode, options))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    tracing_subscriber::fmt().with_max_level(args.log_level).init();

    let settings = match &args.config {
        Some(path) => Settings::from_path(path)?,
        None => Settings::default(),
    };
    let backend = args
        .backend
        .as_deref()
        .or_else(|| settings.backend_name())
        .unwrap_or("memory")
        .to_string();

    let shutdown = CancellationToken::new();

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt signal");
        }
        signal_shutdown.cancel();
    });

    let options = settings
        .socket_options_for(&backend)?
        .with_parent(shutdown.clone());
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();

    info!("Using {} backend", backend);

    match args.command {
        Command::Push { topic } => {
            let mode = if topic.is_some() {
                SocketMode::Pub
            } else {
                SocketMode::Push
            };
            let socket = open(&settings, &backend, mode, options)?;
            commands::push(&socket, stdin, topic.as_deref(), &shutdown).await?;
        }
        Command::Pull { subscribe, count } => {
            let mode = if subscribe.is_empty() {
                SocketMode::Pull
            } else {
                SocketMode::Sub
            };
            let socket = open(&settings, &backend, mode, options)?;
            commands::pull(&socket, &mut stdout, &subscribe, count).await?;
        }
        Command::Loopback => {
            let push = open(&settings, &backend, SocketMode::Push, options.clone())?;
            let pull = open(&settings, &backend, SocketMode::Pull, options)?;
            commands::loopback(&push, &pull, stdin, &mut stdout, &shutdown).await?;
        }
    }

    Ok(())
}

// PeerLink Linux node: presence, call signaling, media streams, voice and text mailboxes.

mod commands;
mod config;
mod devices;
mod discovery;
mod framing;
mod media;
mod node;
mod signal;
mod signaling;
mod text;
mod voice;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::commands::{ConsoleCollaborator, Flow};
use crate::devices::HeadlessDevices;
use crate::node::Node;

/// Serverless LAN presence, calls, voice messages and chat
#[derive(Parser)]
#[command(name = "peerlink-linux")]
#[command(version, about, long_about = None)]
struct Args {
    /// Config file (default: ~/.config/peerlink/config.toml, then /etc/peerlink/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Display name announced to peers
    #[arg(short, long)]
    name: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if args.verbose { "debug" } else { "info" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut cfg = config::load(args.config.as_deref());
    if let Some(name) = args.name {
        cfg.display_name = name;
    }

    let node = Node::start(
        &cfg,
        Arc::new(ConsoleCollaborator),
        Arc::new(HeadlessDevices),
    )
    .await
    .context("starting node")?;
    println!("{} is online. Type 'help' for commands.", node.display_name());

    tokio::select! {
        _ = console(&node) => {}
        res = shutdown_signal() => res?,
    }

    info!("shutting down");
    node.shutdown().await;
    Ok(())
}

/// Read commands from stdin until `quit` or end of input.
async fn console(node: &Node) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(l)) => l,
            Ok(None) => {
                info!("stdin closed, running until signalled");
                return std::future::pending().await;
            }
            Err(e) => {
                error!(error = %e, "stdin read failed");
                return;
            }
        };
        let cmd = match commands::parse(&line) {
            Ok(Some(c)) => c,
            Ok(None) => continue,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };
        match commands::execute(node, cmd).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => return,
            Err(e) => println!("error: {:#}", e),
        }
    }
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}

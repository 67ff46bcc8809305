//! Command line interface for the Discord to Nostr bridge. Runs the bridge,
//! writes a configuration template, signs one-off notes, and verifies
//! signed notes.

mod bridge;
mod config;
mod content;
mod discord;
mod error;
mod event;
mod relay;
mod signer;

use std::{fs, path::Path, sync::Arc};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use config::Settings;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::{bridge::Bridge, discord::Gateway, event::UnsignedEvent, relay::Relay, signer::Signer};

/// Capacity of the gateway to bridge queue.
const EVENT_QUEUE: usize = 256;

/// Command line interface entry point.
#[derive(Parser)]
#[command(
    name = "cordstr",
    author,
    version,
    about = "Forward a Discord channel to a Nostr relay as signed notes"
)]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env")]
    env: String,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Write a configuration template to the `--env` path.
    Init,
    /// Connect to Discord and the relay and forward messages until interrupted.
    Run,
    /// Sign a single note and print it as JSON.
    Note {
        /// Message text; mention markers are stripped.
        text: String,
        /// Attachment URL appended on its own line (repeatable).
        #[arg(long = "attachment")]
        attachments: Vec<String>,
        /// Override the creation timestamp (Unix seconds).
        #[arg(long)]
        created_at: Option<u64>,
        /// Also send the note to the configured relay.
        #[arg(long)]
        publish: bool,
    },
    /// Check the id and signature of a note stored as JSON.
    Verify {
        /// Path to the note file.
        file: String,
    },
}

/// Execute the selected CLI subcommand.
async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Init => write_env_template(&cli.env)?,
        Commands::Run => {
            let cfg = Settings::from_env(&cli.env)?;
            run_bridge(cfg).await?;
        }
        Commands::Note {
            text,
            attachments,
            created_at,
            publish,
        } => {
            let cfg = Settings::from_env(&cli.env)?;
            let signer = load_signer(&cfg)?;
            let text = content::normalize(&text, &attachments);
            let mut unsigned = UnsignedEvent::text_note(cfg.nostr_pubkey.clone(), text);
            if let Some(ts) = created_at {
                unsigned = unsigned.with_created_at(ts);
            }
            let event = signer.sign(unsigned)?;
            println!("{}", serde_json::to_string(&event)?);
            if publish {
                let relay = Relay::new(cfg.nostr_relay_url.clone(), cfg.tor_socks.clone());
                let reply = relay.publish(&event).await?;
                relay.close().await;
                println!("{reply:?}");
            }
        }
        Commands::Verify { file } => {
            let data = fs::read_to_string(&file).with_context(|| format!("reading {file}"))?;
            let ev: event::Event = serde_json::from_str(&data)?;
            ev.verify().with_context(|| format!("note {} failed verification", ev.id))?;
            println!("ok {}", ev.id);
        }
    }
    Ok(())
}

/// Decode the secret key and warn if it does not match the configured author.
///
/// The key is decoded once here, so a malformed `NOSTR_PRIVKEY` stops `run`
/// and `note` at startup instead of failing each message with `KeyDecode`.
fn load_signer(cfg: &Settings) -> anyhow::Result<Signer> {
    let signer = Signer::from_hex(&cfg.nostr_privkey).context("NOSTR_PRIVKEY")?;
    if signer.public_key_hex() != cfg.nostr_pubkey {
        warn!(
            configured = %cfg.nostr_pubkey,
            derived = %signer.public_key_hex(),
            "NOSTR_PUBKEY does not match NOSTR_PRIVKEY; relays will reject these notes"
        );
    }
    Ok(signer)
}

/// Wire gateway, bridge and relay together and run until a shutdown signal.
async fn run_bridge(cfg: Settings) -> anyhow::Result<()> {
    let signer = load_signer(&cfg)?;
    let relay = Relay::new(cfg.nostr_relay_url.clone(), cfg.tor_socks.clone());
    if let Err(e) = relay.connect().await {
        warn!(error = %e, relay = %relay.url(), "relay unavailable; will retry on the next note");
    }
    let bridge = Arc::new(Bridge::new(
        cfg.discord_channel_id.clone(),
        cfg.nostr_pubkey.clone(),
        signer,
        relay,
    ));

    let (tx, rx) = mpsc::channel(EVENT_QUEUE);
    let dispatcher = tokio::spawn(crate::bridge::dispatch(bridge.clone(), rx));
    let mut gateway = Gateway::new(cfg.discord_gateway_url.clone(), cfg.discord_token.clone());

    info!(channel_id = %cfg.discord_channel_id, "bridge running, press Ctrl+C to exit");
    let result = tokio::select! {
        res = gateway.run(tx) => res,
        _ = shutdown_signal() => {
            info!("shutting down");
            Ok(())
        }
    };
    dispatcher.abort();
    bridge.relay().close().await;
    result
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Create a template `.env` at `path`, refusing to overwrite an existing file.
fn write_env_template(path: &str) -> anyhow::Result<()> {
    let env_path = Path::new(path);
    if env_path.exists() {
        bail!("{path} already exists");
    }
    if let Some(parent) = env_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(env_path, config::template())?;
    println!("wrote {path}; fill in the empty values before `cordstr run`");
    Ok(())
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cordstr=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run(cli).await
}

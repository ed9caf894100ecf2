//! CLI for cbcast
//!
//! Subcommands:
//! - `run`: start the lifecycle orchestrator and wait for Ctrl-C
//! - `demo`: drive one message through create/status/delete against
//!   in-process peers and print the snapshots

use clap::Parser;
use tracing::{error, info};

use cbcast::config::{Settings, load_config};
use cbcast::message::CbcMessage;
use cbcast::peer::ScriptedPeer;
use cbcast::persistence::Archive;
use cbcast::{Orchestrator, OrchestratorHandle, PeerSession, Registry};

#[derive(Parser)]
#[command(name = "cbcast")]
enum Command {
    /// Run the orchestrator until interrupted
    Run,
    /// Drive a demo message through its lifecycle
    Demo {
        /// Number of delivery peers
        #[arg(long, default_value_t = 3)]
        peers: usize,
        /// Message identifier
        #[arg(long, default_value_t = 42)]
        message_id: u16,
        /// Warning period in seconds (4294967295 disables auto-expiry)
        #[arg(long, default_value_t = cbcast::WARNING_PERIOD_NEVER)]
        warning_period: u32,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cmd = Command::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            cbcast::utils::logging::init("info");
            error!("Failed to load configuration: {}", e);
            return;
        }
    };
    cbcast::utils::logging::init(&settings.logging.level);

    let result = match cmd {
        Command::Run => run(settings).await,
        Command::Demo {
            peers,
            message_id,
            warning_period,
        } => demo(settings, peers, message_id, warning_period).await,
    };
    if let Err(e) = result {
        error!("cbcast failed: {}", e);
    }
}

fn build_registry(settings: &Settings) -> cbcast::Result<Registry> {
    if !settings.archive.enabled {
        return Ok(Registry::new());
    }
    let archive = Archive::open(&settings.archive.path, settings.archive.ttl_secs)?;
    info!(path = %settings.archive.path, "retired-message archive enabled");
    Ok(Registry::with_archive(archive))
}

async fn run(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let registry = build_registry(&settings)?;
    let (handle, worker) = Orchestrator::spawn(settings.lifecycle.clone(), registry);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Draining messages.");
    handle.shutdown().await?;
    worker.await?;
    Ok(())
}

async fn demo(
    settings: Settings,
    peers: usize,
    message_id: u16,
    warning_period: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let registry = build_registry(&settings)?;
    let (handle, worker) = Orchestrator::spawn(settings.lifecycle.clone(), registry);

    let sessions: Vec<Box<dyn PeerSession>> = (0..peers)
        .map(|i| ScriptedPeer::auto(&format!("bsc-{i}")).boxed())
        .collect();
    let message = CbcMessage::new("demo-cbe", message_id)
        .with_pages(vec!["This is a test broadcast".to_string()])
        .with_warning_period(warning_period);

    let created = handle.create(message, sessions).wait().await?;
    info!(code = created.code, text = %created.text, "create completed");
    print_snapshot(&handle, message_id).await?;

    let status = handle.status(message_id).wait().await?;
    info!(code = status.code, text = %status.text, "status completed");

    let deleted = handle.delete(message_id).wait().await?;
    info!(code = deleted.code, text = %deleted.text, "delete completed");

    for snapshot in handle.expired().await? {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }

    handle.shutdown().await?;
    worker.await?;
    Ok(())
}

async fn print_snapshot(
    handle: &OrchestratorHandle,
    message_id: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(snapshot) = handle.find(message_id).await? {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }
    Ok(())
}

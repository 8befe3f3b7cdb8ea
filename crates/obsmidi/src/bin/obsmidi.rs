//! obsmidi - control OBS Studio with MIDI via obs-websocket.
//!
//! Subcommands:
//! - `obsmidi list` - list MIDI input ports
//! - `obsmidi run` - run the MIDI / obs-websocket bridge

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use obsmidi::{midi_io, BridgeCallbacks, BridgeConfig, CloseSignal, MidirInput, ReadyInfo};

#[derive(Parser)]
#[command(name = "obsmidi")]
#[command(about = "Control OBS Studio with MIDI via obs-websocket")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List MIDI input ports
    List,

    /// Run the MIDI / obs-websocket bridge
    Run {
        /// MIDI input port name; omit to create a virtual port
        #[arg(short = 'p', long, env = "MIDI_PORT")]
        midi_port: Option<String>,

        /// obs-websocket port
        #[arg(long, env = "OBS_PORT", default_value_t = obsmidi::DEFAULT_OBS_PORT)]
        obs_port: u16,

        /// obs-websocket password
        #[arg(long, env = "OBS_PASSWORD")]
        obs_password: String,

        /// Log filter, e.g. `debug` or `obsmidi=trace`
        #[arg(long, env = "LOG_LEVEL", default_value = "info")]
        log_level: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::List => list_ports(),
        Commands::Run {
            midi_port,
            obs_port,
            obs_password,
            log_level,
        } => run_bridge(midi_port, obs_port, obs_password, &log_level).await,
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn list_ports() -> Result<()> {
    let ports = midi_io::list_input_ports().context("failed to enumerate MIDI ports")?;
    for port in ports {
        println!("{port}");
    }
    Ok(())
}

async fn run_bridge(
    midi_port: Option<String>,
    obs_port: u16,
    obs_password: String,
    log_level: &str,
) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = BridgeConfig::new(obs_port, obs_password);

    let close = CloseSignal::new();
    {
        let close = close.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                close.set();
            }
        });
    }

    let mut callbacks = BridgeCallbacks::default();
    callbacks.on_ready = Arc::new(|ready: &ReadyInfo| {
        info!("listening on MIDI port {}", ready.midi_port);
        for binding in &ready.triggers {
            info!("registered trigger {} -> {:?}", binding.trigger, binding.action);
        }
    });
    callbacks.on_obs_disconnect = Arc::new(|| warn!("OBS connection lost, reconnecting..."));
    callbacks.on_obs_reconnect = Arc::new(|| info!("OBS connection restored"));

    let opener = MidirInput::new(midi_port);
    obsmidi::run(config, opener, callbacks, close)
        .await
        .inspect_err(|e| error!("{e}"))?;
    Ok(())
}

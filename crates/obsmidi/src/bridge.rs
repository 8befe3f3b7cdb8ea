//! The supervised bridge runtime: composition, startup order, steady-state
//! supervision and teardown.
//!
//! Startup order is fixed: the MIDI input and the event pump (which
//! connects to OBS internally) meet the supervisor at a three-party start
//! gate; only then does the discovery walk run, and only after the walk
//! finishes does `on_ready` fire and MIDI dispatch open up. Teardown is
//! idempotent and runs on every exit path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::lifecycle::{CloseSignal, ErrorBucket, StartGate};
use crate::midi_io::{parse_midi_bytes, MidiInputOpener, MidiInputScope, MidiMessage};
use crate::obs::client::ObsClient;
use crate::obs::events::ObsEventPump;
use crate::obs::init::InitialQuery;
use crate::triggers::{Action, TriggerBinding, TriggerTable};

/// Handed to `on_ready` once startup has completed.
#[derive(Debug, Clone)]
pub struct ReadyInfo {
    /// Resolved MIDI input port name.
    pub midi_port: String,
    /// Snapshot of the registered bindings, in match order.
    pub triggers: Vec<TriggerBinding>,
}

/// Embedder callback surface. Callbacks may be invoked from arbitrary
/// tasks; defaults are no-ops.
#[derive(Clone)]
pub struct BridgeCallbacks {
    pub on_ready: Arc<dyn Fn(&ReadyInfo) + Send + Sync>,
    pub on_obs_disconnect: Arc<dyn Fn() + Send + Sync>,
    pub on_obs_reconnect: Arc<dyn Fn() + Send + Sync>,
}

impl Default for BridgeCallbacks {
    fn default() -> Self {
        Self {
            on_ready: Arc::new(|_| {}),
            on_obs_disconnect: Arc::new(|| {}),
            on_obs_reconnect: Arc::new(|| {}),
        }
    }
}

/// Run the bridge until the close signal is raised, a fatal error occurs,
/// or a supervised task dies. Returns `Ok(())` on a clean or externally
/// cancelled stop; startup failures may surface as an aggregate.
pub async fn run<O: MidiInputOpener>(
    config: BridgeConfig,
    opener: O,
    callbacks: BridgeCallbacks,
    close: CloseSignal,
) -> Result<(), BridgeError> {
    let bucket = ErrorBucket::new();
    let client = Arc::new(ObsClient::new(config.obs_port, config.obs_password.clone()));
    let table = Arc::new(TriggerTable::new());
    let gate = StartGate::new(3);
    let init = Arc::new(InitialQuery::new(client.clone(), table.clone()));
    let ready = Arc::new(AtomicBool::new(false));
    let midi_port_name = Arc::new(Mutex::new(None::<String>));

    let (midi_tx, midi_rx) = mpsc::unbounded_channel::<MidiMessage>();

    let mut pump = ObsEventPump::new(
        client.clone(),
        gate.clone(),
        close.clone(),
        callbacks.on_obs_disconnect.clone(),
        callbacks.on_obs_reconnect.clone(),
        config.poll_interval,
        config.reconnect_delay,
    );
    pump.add_handler(init.clone());

    let tasks: Vec<(&str, JoinHandle<()>)> = vec![
        (
            "midi input",
            spawn_midi(
                opener,
                midi_tx,
                gate.clone(),
                close.clone(),
                bucket.clone(),
                midi_port_name.clone(),
            ),
        ),
        (
            "action dispatcher",
            spawn_dispatcher(
                midi_rx,
                table.clone(),
                client.clone(),
                close.clone(),
                ready.clone(),
            ),
        ),
        ("event pump", spawn_pump(pump, bucket.clone(), close.clone())),
    ];

    let started = gate.wait().await.is_ok() && !close.is_set();

    if started {
        match init.send().await {
            Ok(()) => {
                while !init.is_done() {
                    if close.is_set() {
                        break;
                    }
                    sleep(config.poll_interval).await;
                }
            }
            Err(e) => {
                bucket.push(e);
                close.set();
            }
        }
    }

    if started && !close.is_set() {
        ready.store(true, Ordering::SeqCst);
        let port = midi_port_name
            .lock()
            .expect("port name poisoned")
            .clone()
            .unwrap_or_default();
        let ready_info = ReadyInfo {
            midi_port: port,
            triggers: table.snapshot(),
        };
        info!(
            "bridge ready on MIDI port {:?} with {} registered triggers",
            ready_info.midi_port,
            ready_info.triggers.len()
        );
        (callbacks.on_ready)(&ready_info);

        // steady state: wait for the close signal, watching task liveness
        loop {
            if close.is_set() {
                break;
            }
            if tasks.iter().any(|(_, handle)| handle.is_finished()) {
                warn!("a supervised task exited unexpectedly, shutting down");
                break;
            }
            sleep(config.poll_interval).await;
        }
    }

    // teardown: idempotent, runs on every exit path
    close.set();
    for (name, mut handle) in tasks {
        match timeout(config.shutdown_grace, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_panic() => {
                bucket.push(BridgeError::Internal(format!("{name} task panicked")))
            }
            Ok(Err(_)) => {}
            Err(_elapsed) => {
                warn!("{name} task did not stop within the grace period");
                handle.abort();
            }
        }
    }
    client.close(!bucket.is_empty()).await;

    match bucket.take_outcome() {
        None => Ok(()),
        Some(err) => Err(err),
    }
}

/// Hold the MIDI input scope open until the close signal. The driver
/// callback parses raw bytes and forwards them through the channel; parsing
/// and the channel send are both safe on the driver's thread.
fn spawn_midi<O: MidiInputOpener>(
    opener: O,
    midi_tx: mpsc::UnboundedSender<MidiMessage>,
    gate: Arc<StartGate>,
    close: CloseSignal,
    bucket: ErrorBucket,
    port_name: Arc<Mutex<Option<String>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let callback = Box::new(move |bytes: &[u8]| {
            if let Some(message) = parse_midi_bytes(bytes) {
                let _ = midi_tx.send(message);
            }
        });

        let scope = match opener.open(callback) {
            Ok(scope) => scope,
            Err(e) => {
                bucket.push(e.into());
                gate.abort();
                close.set();
                return;
            }
        };

        *port_name.lock().expect("port name poisoned") = Some(scope.port_name().to_string());
        info!("listening for MIDI messages on {}", scope.port_name());

        if gate.wait().await.is_ok() {
            close.wait().await;
        }
        // dropping the scope stops callbacks before the table goes away
        drop(scope);
        debug!("MIDI input stopped");
    })
}

/// Serialize trigger matches into OBS requests, in message order. Messages
/// seen before `on_ready` are dropped; the table is still being built.
fn spawn_dispatcher(
    mut midi_rx: mpsc::UnboundedReceiver<MidiMessage>,
    table: Arc<TriggerTable>,
    client: Arc<ObsClient>,
    close: CloseSignal,
    ready: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                _ = close.wait() => break,
                message = midi_rx.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            if !ready.load(Ordering::SeqCst) {
                debug!("dropping MIDI message received before startup completed: {message:?}");
                continue;
            }
            let Some(action) = table.find_action(&message) else {
                continue;
            };

            let result = match &action {
                Action::SwitchScene { scene_name } => {
                    info!("switch scene: {scene_name}");
                    client.set_current_program_scene(scene_name).await
                }
                Action::EnableFilter {
                    source_name,
                    filter_name,
                } => {
                    info!("show filter: {filter_name} on {source_name}");
                    client.enable_filter(source_name, filter_name).await
                }
            };
            if let Err(e) = result {
                warn!("dropping action while OBS is unavailable: {e}");
            }
        }
        debug!("action dispatcher stopped");
    })
}

/// Run the pump; a fatal pump error is pushed into the bucket and brings
/// the whole runtime down.
fn spawn_pump(pump: ObsEventPump, bucket: ErrorBucket, close: CloseSignal) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = pump.run().await {
            bucket.push(e);
            close.set();
        }
    })
}

//! MIDI to OBS Studio bridge over obs-websocket v5 (RPC v1).
//!
//! Triggers are encoded at the end of OBS scene and filter names
//! (`Scene1 :: CC9#1@1`); a startup walk over scenes, scene items and
//! source filters discovers them, after which incoming MIDI messages drive
//! scene switches and filter toggles. OBS's own object naming is the only
//! mapping configuration.

pub mod bridge;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod midi_io;
pub mod obs;
pub mod triggers;

pub use bridge::{run, BridgeCallbacks, ReadyInfo};
pub use config::{BridgeConfig, DEFAULT_OBS_PORT};
pub use error::{BridgeError, StartupErrors};
pub use lifecycle::CloseSignal;
pub use midi_io::{MidiInputOpener, MidiMessage, MidirInput};
pub use triggers::{Action, MidiTrigger, TriggerBinding, TriggerTable};

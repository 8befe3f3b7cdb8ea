//! MIDI input via midir.
//!
//! Raw driver bytes are parsed into [`MidiMessage`] values here. The wire
//! channel nibble is 0-based; everything above this module works with
//! 1-based channels, and this is the single place the translation happens.

use midir::{MidiInput, MidiInputConnection};
use thiserror::Error;
use tracing::{debug, info};

/// Client name registered with the MIDI system.
pub const MIDI_CLIENT_NAME: &str = "OBS MIDI";
/// Port name used when a virtual input port is created.
pub const VIRTUAL_PORT_NAME: &str = "Midi In";

/// A MIDI message the bridge reacts to. Channels are 1-based (`1..=16`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    ControlChange { channel: u8, control: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    NoteOn { channel: u8, note: u8, velocity: u8 },
}

/// Parse raw MIDI bytes. Message kinds the bridge does not react to parse
/// to `None`. Note-on with velocity 0 is kept as a note-on; it can only
/// match a trigger carrying an explicit `#0` velocity.
pub fn parse_midi_bytes(data: &[u8]) -> Option<MidiMessage> {
    let status = *data.first()?;
    // wire channels are 0-based, stored channels 1-based
    let channel = (status & 0x0F) + 1;

    match status & 0xF0 {
        0xB0 if data.len() >= 3 => Some(MidiMessage::ControlChange {
            channel,
            control: data[1],
            value: data[2],
        }),
        0xC0 if data.len() >= 2 => Some(MidiMessage::ProgramChange {
            channel,
            program: data[1],
        }),
        0x90 if data.len() >= 3 => Some(MidiMessage::NoteOn {
            channel,
            note: data[1],
            velocity: data[2],
        }),
        _ => {
            debug!("ignoring MIDI message type {:02X}", status);
            None
        }
    }
}

/// Error type for MIDI operations.
#[derive(Debug, Error)]
pub enum MidiError {
    #[error("failed to initialize MIDI: {0}")]
    InitFailed(String),

    #[error("MIDI port not found: {0}")]
    PortNotFound(String),

    #[error("MIDI connection failed: {0}")]
    ConnectionFailed(String),

    #[error("virtual MIDI ports are not supported on this platform")]
    VirtualUnsupported,
}

/// Callback receiving raw MIDI bytes. Invoked on the driver's thread, so it
/// must be safe to call from an arbitrary thread.
pub type MidiDelivery = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// An open MIDI input port. Dropping the scope synchronously stops further
/// callbacks and releases the port.
pub trait MidiInputScope: Send {
    /// Resolved name of the bound port.
    fn port_name(&self) -> &str;
}

/// Factory for a scoped MIDI input. Consumed on open so the driver resources
/// have exactly one owner.
pub trait MidiInputOpener: Send + 'static {
    type Scope: MidiInputScope;

    fn open(self, callback: MidiDelivery) -> Result<Self::Scope, MidiError>;
}

/// midir-backed opener. With an explicit port name it binds exactly that
/// port and fails if it is unavailable; without one it creates a virtual
/// port where the platform allows it.
pub struct MidirInput {
    port: Option<String>,
}

impl MidirInput {
    pub fn new(port: Option<String>) -> Self {
        Self { port }
    }

    #[cfg(unix)]
    fn open_virtual(
        midi_in: MidiInput,
        handler: impl FnMut(u64, &[u8], &mut ()) + Send + 'static,
    ) -> Result<MidirScope, MidiError> {
        use midir::os::unix::VirtualInput;

        let connection = midi_in
            .create_virtual(VIRTUAL_PORT_NAME, handler, ())
            .map_err(|e| MidiError::ConnectionFailed(e.to_string()))?;
        info!("opened virtual MIDI input: {VIRTUAL_PORT_NAME}");
        Ok(MidirScope {
            connection: Some(connection),
            port_name: VIRTUAL_PORT_NAME.to_string(),
        })
    }

    #[cfg(not(unix))]
    fn open_virtual(
        _midi_in: MidiInput,
        _handler: impl FnMut(u64, &[u8], &mut ()) + Send + 'static,
    ) -> Result<MidirScope, MidiError> {
        Err(MidiError::VirtualUnsupported)
    }
}

impl MidiInputOpener for MidirInput {
    type Scope = MidirScope;

    fn open(self, mut callback: MidiDelivery) -> Result<MidirScope, MidiError> {
        let midi_in =
            MidiInput::new(MIDI_CLIENT_NAME).map_err(|e| MidiError::InitFailed(e.to_string()))?;
        let handler = move |_timestamp: u64, data: &[u8], _: &mut ()| callback(data);

        match self.port {
            Some(name) => {
                let ports = midi_in.ports();
                let port = ports
                    .iter()
                    .find(|p| midi_in.port_name(p).map(|n| n == name).unwrap_or(false))
                    .ok_or_else(|| MidiError::PortNotFound(name.clone()))?;
                let connection = midi_in
                    .connect(port, &name, handler, ())
                    .map_err(|e| MidiError::ConnectionFailed(e.to_string()))?;
                info!("opened MIDI input: {name}");
                Ok(MidirScope {
                    connection: Some(connection),
                    port_name: name,
                })
            }
            None => Self::open_virtual(midi_in, handler),
        }
    }
}

/// Active midir connection; closing happens on drop.
pub struct MidirScope {
    connection: Option<MidiInputConnection<()>>,
    port_name: String,
}

impl MidiInputScope for MidirScope {
    fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl Drop for MidirScope {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
            info!("closed MIDI input: {}", self.port_name);
        }
    }
}

/// List available MIDI input port names.
pub fn list_input_ports() -> Result<Vec<String>, MidiError> {
    let midi_in =
        MidiInput::new(MIDI_CLIENT_NAME).map_err(|e| MidiError::InitFailed(e.to_string()))?;
    Ok(midi_in
        .ports()
        .iter()
        .filter_map(|p| midi_in.port_name(p).ok())
        .collect())
}

//! Error taxonomy for the bridge runtime.
//!
//! Components never propagate errors across task boundaries; they push into
//! the shared error bucket and set the close signal. The supervisor drains
//! the bucket during teardown and surfaces either the single captured error
//! or a [`StartupErrors`] aggregate.

use std::fmt;

use thiserror::Error;

use crate::midi_io::MidiError;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// The MIDI input port could not be opened. Fatal for startup.
    #[error("failed to open MIDI input: {0}")]
    MidiOpen(#[from] MidiError),

    /// The WebSocket TCP connection failed. Fatal on the first attempt,
    /// retried by the reconnect policy afterwards.
    #[error("failed to connect to OBS websocket: {0}")]
    Connect(tokio_tungstenite::tungstenite::Error),

    /// The authentication handshake was rejected. Fatal always, including
    /// during reconnects.
    #[error("OBS websocket authentication failed (close code {code})")]
    Auth { code: u16 },

    /// An established socket closed mid-session. Consumed by the reconnect
    /// policy; only surfaces when the runtime is already going down.
    #[error("OBS websocket connection closed")]
    Disconnected,

    /// Malformed frame, missing fields, or a failed response the discovery
    /// walk depends on.
    #[error("OBS protocol error: {0}")]
    Protocol(String),

    /// A supervised task died without reporting anything else.
    #[error("internal error: {0}")]
    Internal(String),

    /// Two or more failures captured before the runtime could settle.
    #[error("{0}")]
    Startup(StartupErrors),
}

/// Aggregate of startup-phase failures, e.g. a MIDI open failure and an OBS
/// connect failure happening in the same run.
#[derive(Debug)]
pub struct StartupErrors(pub Vec<BridgeError>);

impl fmt::Display for StartupErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors during startup: ", self.0.len())?;
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

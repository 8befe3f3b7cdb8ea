//! Runtime configuration for the bridge.

use std::time::Duration;

/// Default obs-websocket port.
pub const DEFAULT_OBS_PORT: u16 = 4455;

/// Everything the supervised runtime needs to come up.
///
/// The trigger mappings themselves are not configured here; they live in
/// OBS's scene and filter names and are discovered at startup. MIDI port
/// selection belongs to the input opener handed to `run`.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// obs-websocket TCP port on localhost.
    pub obs_port: u16,
    /// obs-websocket password.
    pub obs_password: String,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Bounded socket read poll; also the cadence at which blocking waits
    /// re-check the close signal.
    pub poll_interval: Duration,
    /// How long teardown waits for a supervised task before abandoning it.
    pub shutdown_grace: Duration,
}

impl BridgeConfig {
    pub fn new(obs_port: u16, obs_password: impl Into<String>) -> Self {
        Self {
            obs_port,
            obs_password: obs_password.into(),
            reconnect_delay: Duration::from_secs(2),
            poll_interval: Duration::from_millis(200),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

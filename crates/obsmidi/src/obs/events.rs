//! Event pump: drives the client receive loop after the start gate opens,
//! dispatches frames to handlers, and owns the reconnect policy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::BridgeError;
use crate::lifecycle::{CloseSignal, StartGate};
use crate::obs::client::ObsClient;
use crate::obs::protocol::{Frame, OP_REQUEST_RESPONSE};

/// Receives every frame the pump pulls. Dispatch happens on the pump task;
/// implementations may send follow-up requests through the client. An error
/// is fatal for the whole runtime.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    async fn on_frame(&self, frame: &Frame) -> Result<(), BridgeError>;
}

pub type PumpCallback = Arc<dyn Fn() + Send + Sync>;

pub struct ObsEventPump {
    client: Arc<ObsClient>,
    gate: Arc<StartGate>,
    close: CloseSignal,
    handlers: Vec<Arc<dyn FrameHandler>>,
    on_disconnect: PumpCallback,
    on_reconnect: PumpCallback,
    poll_interval: Duration,
    reconnect_delay: Duration,
}

enum PumpExit {
    Closed,
    Disconnected,
}

impl ObsEventPump {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<ObsClient>,
        gate: Arc<StartGate>,
        close: CloseSignal,
        on_disconnect: PumpCallback,
        on_reconnect: PumpCallback,
        poll_interval: Duration,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            client,
            gate,
            close,
            handlers: Vec::new(),
            on_disconnect,
            on_reconnect,
            poll_interval,
            reconnect_delay,
        }
    }

    pub fn add_handler(&mut self, handler: Arc<dyn FrameHandler>) {
        self.handlers.push(handler);
    }

    /// Connect, meet the start gate, then pump frames until the close
    /// signal or a fatal error. Disconnections are bridged transparently by
    /// the reconnect policy.
    pub async fn run(self) -> Result<(), BridgeError> {
        if let Err(e) = self.client.connect().await {
            self.gate.abort();
            return Err(e);
        }
        if self.gate.wait().await.is_err() {
            // a peer failed to start; the supervisor is already tearing down
            return Ok(());
        }
        info!("OBS event pump started");

        loop {
            match self.pump_until_disconnect().await? {
                PumpExit::Closed => break,
                PumpExit::Disconnected => {}
            }

            warn!("OBS websocket connection lost");
            (self.on_disconnect)();
            if !self.reconnect_with_backoff().await? {
                break;
            }
            info!("OBS websocket connection re-established");
            (self.on_reconnect)();
        }

        info!("OBS event pump stopped");
        Ok(())
    }

    async fn pump_until_disconnect(&self) -> Result<PumpExit, BridgeError> {
        loop {
            if self.close.is_set() {
                return Ok(PumpExit::Closed);
            }
            match self.client.poll_event(self.poll_interval).await {
                Ok(None) => continue,
                Ok(Some(frame)) => self.dispatch(frame).await?,
                Err(BridgeError::Disconnected) => return Ok(PumpExit::Disconnected),
                Err(e) => return Err(e),
            }
        }
    }

    async fn dispatch(&self, frame: Frame) -> Result<(), BridgeError> {
        for handler in &self.handlers {
            handler.on_frame(&frame).await?;
        }
        if frame.op == OP_REQUEST_RESPONSE {
            self.client.finish_response(&frame);
        }
        Ok(())
    }

    /// Fixed-delay retry loop. Returns `false` when the close signal went
    /// up while waiting. Authentication failures are fatal; everything else
    /// is logged and retried.
    async fn reconnect_with_backoff(&self) -> Result<bool, BridgeError> {
        loop {
            tokio::select! {
                _ = self.close.wait() => return Ok(false),
                _ = sleep(self.reconnect_delay) => {}
            }
            if self.close.is_set() {
                return Ok(false);
            }
            match self.client.reconnect().await {
                Ok(()) => return Ok(true),
                Err(e @ BridgeError::Auth { .. }) => return Err(e),
                Err(e) => warn!("OBS reconnect attempt failed: {e}"),
            }
        }
    }
}

//! Minimal obs-websocket v5 RPC v1 client: one outbound connection at a
//! time, fire-and-forget requests with uuid correlation, bounded event
//! polling, reconnect.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use uuid::Uuid;

use crate::error::BridgeError;
use crate::obs::protocol::{compute_auth, Frame, OP_IDENTIFY, OP_REQUEST};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Close code reported when the peer vanished without a close frame.
const CLOSE_ABNORMAL: u16 = 1006;

pub struct ObsClient {
    url: String,
    password: String,
    write: Mutex<Option<WsSink>>,
    read: Mutex<Option<WsStream>>,
    /// Request data by request id, kept until the successful response has
    /// been dispatched to consumers.
    pending_data: StdMutex<HashMap<String, Value>>,
    /// Request ids whose successful response has been dispatched.
    answered: StdMutex<HashSet<String>>,
}

impl ObsClient {
    pub fn new(port: u16, password: impl Into<String>) -> Self {
        Self {
            url: format!("ws://localhost:{port}/"),
            password: password.into(),
            write: Mutex::new(None),
            read: Mutex::new(None),
            pending_data: StdMutex::new(HashMap::new()),
            answered: StdMutex::new(HashSet::new()),
        }
    }

    /// Dial and authenticate. On success the connection halves are
    /// installed and the client can send and poll.
    pub async fn connect(&self) -> Result<(), BridgeError> {
        let (mut ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(BridgeError::Connect)?;

        let hello = Self::next_handshake_frame(&mut ws).await?;
        let auth = match hello.d.get("authentication") {
            Some(challenge) => Some(Self::answer_challenge(&self.password, challenge)?),
            None => None,
        };

        let mut identify = json!({ "rpcVersion": 1 });
        if let Some(auth) = auth {
            identify["authentication"] = Value::String(auth);
        }
        let frame = json!({ "op": OP_IDENTIFY, "d": identify });
        ws.send(Message::Text(frame.to_string()))
            .await
            .map_err(|_| BridgeError::Auth {
                code: CLOSE_ABNORMAL,
            })?;

        // Normally op 2 (Identified); a close instead means the password
        // was rejected.
        let _identified = Self::next_handshake_frame(&mut ws).await?;

        let (write, read) = ws.split();
        *self.write.lock().await = Some(write);
        *self.read.lock().await = Some(read);
        debug!("connected to {}", self.url);
        Ok(())
    }

    fn answer_challenge(password: &str, authentication: &Value) -> Result<String, BridgeError> {
        let salt = authentication
            .get("salt")
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::Protocol("hello frame missing authentication.salt".into()))?;
        let challenge = authentication
            .get("challenge")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                BridgeError::Protocol("hello frame missing authentication.challenge".into())
            })?;
        Ok(compute_auth(password, salt, challenge))
    }

    /// Read the next text frame during the handshake. A close here is an
    /// authentication failure carrying the close code.
    async fn next_handshake_frame(
        ws: &mut WebSocketStream<MaybeTlsStream<TcpStream>>,
    ) -> Result<Frame, BridgeError> {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(&text)
                        .map_err(|e| BridgeError::Protocol(format!("malformed frame: {e}")));
                }
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.map(|f| u16::from(f.code)).unwrap_or(CLOSE_ABNORMAL);
                    return Err(BridgeError::Auth { code });
                }
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => {
                    return Err(BridgeError::Auth {
                        code: CLOSE_ABNORMAL,
                    })
                }
            }
        }
    }

    /// Drop any open socket and dial again.
    pub async fn reconnect(&self) -> Result<(), BridgeError> {
        self.write.lock().await.take();
        self.read.lock().await.take();
        self.connect().await
    }

    /// Send a close frame: 1000 for an orderly stop, 1011 when the runtime
    /// is going down because of an error. No-op when already closed.
    pub async fn close(&self, error: bool) {
        self.read.lock().await.take();
        if let Some(mut write) = self.write.lock().await.take() {
            let code = if error {
                CloseCode::Error
            } else {
                CloseCode::Normal
            };
            let frame = CloseFrame {
                code,
                reason: "".into(),
            };
            if let Err(e) = write.send(Message::Close(Some(frame))).await {
                debug!("close frame not delivered: {e}");
            }
        }
    }

    /// Serialize and send an op-6 request; does not wait for the response.
    /// `request_data`, when present, is remembered under the returned id
    /// until the successful response has been dispatched.
    pub async fn send_request(
        &self,
        request_type: &str,
        request_data: Option<Value>,
    ) -> Result<String, BridgeError> {
        let request_id = Uuid::new_v4().to_string();
        let mut d = json!({ "requestType": request_type, "requestId": request_id });
        if let Some(data) = request_data {
            d["requestData"] = data.clone();
            self.pending_data
                .lock()
                .expect("pending map poisoned")
                .insert(request_id.clone(), data);
        }
        let text = json!({ "op": OP_REQUEST, "d": d }).to_string();

        let mut write = self.write.lock().await;
        let sink = write.as_mut().ok_or(BridgeError::Disconnected)?;
        sink.send(Message::Text(text))
            .await
            .map_err(|_| BridgeError::Disconnected)?;
        Ok(request_id)
    }

    pub async fn set_current_program_scene(&self, scene_name: &str) -> Result<(), BridgeError> {
        self.send_request(
            "SetCurrentProgramScene",
            Some(json!({ "sceneName": scene_name })),
        )
        .await
        .map(|_| ())
    }

    pub async fn enable_filter(
        &self,
        source_name: &str,
        filter_name: &str,
    ) -> Result<(), BridgeError> {
        self.send_request(
            "SetSourceFilterEnabled",
            Some(json!({
                "sourceName": source_name,
                "filterName": filter_name,
                "filterEnabled": true,
            })),
        )
        .await
        .map(|_| ())
    }

    /// Pull the next frame, waiting at most `poll` so callers can re-check
    /// the close signal. `Ok(None)` on timeout, `Disconnected` once the
    /// peer has closed the socket.
    pub async fn poll_event(&self, poll: Duration) -> Result<Option<Frame>, BridgeError> {
        let mut read = self.read.lock().await;
        let stream = read.as_mut().ok_or(BridgeError::Disconnected)?;

        let message = match timeout(poll, stream.next()).await {
            Err(_elapsed) => return Ok(None),
            Ok(None) => return Err(BridgeError::Disconnected),
            Ok(Some(Err(e))) => {
                debug!("websocket read error: {e}");
                return Err(BridgeError::Disconnected);
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| BridgeError::Protocol(format!("malformed frame: {e}"))),
            Message::Close(_) => Err(BridgeError::Disconnected),
            _ => Ok(None),
        }
    }

    /// Record a fully dispatched successful response: its id joins the
    /// answered set and its remembered request data is dropped.
    pub fn finish_response(&self, frame: &Frame) {
        if !frame.is_successful_response() {
            return;
        }
        if let Some(id) = frame.request_id() {
            self.answered
                .lock()
                .expect("answered set poisoned")
                .insert(id.to_string());
            self.forget_request_data(id);
        }
    }

    /// Drop the request data remembered for `request_id`.
    pub fn forget_request_data(&self, request_id: &str) {
        self.pending_data
            .lock()
            .expect("pending map poisoned")
            .remove(request_id);
    }

    /// Whether every id in the set has received a successful response.
    pub fn has_responses_for<'a>(&self, ids: impl IntoIterator<Item = &'a String>) -> bool {
        let answered = self.answered.lock().expect("answered set poisoned");
        ids.into_iter().all(|id| answered.contains(id))
    }

    /// The request data sent with `request_id`, while its response has not
    /// been dispatched yet.
    pub fn request_data(&self, request_id: &str) -> Option<Value> {
        self.pending_data
            .lock()
            .expect("pending map poisoned")
            .get(request_id)
            .cloned()
    }
}

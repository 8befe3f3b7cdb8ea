//! Initial discovery: walk OBS's scene, scene-item and source-filter graph
//! and populate the trigger table.
//!
//! Scene triggers are inserted inline while the scene list response is
//! handled, before any filter request for that scene has even been sent, so
//! scene switches always outrank filter toggles for the same trigger.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::error::BridgeError;
use crate::obs::client::ObsClient;
use crate::obs::events::FrameHandler;
use crate::obs::protocol::{
    Frame, SceneItemListData, SceneListData, SourceFilterListData, OP_REQUEST_RESPONSE,
};
use crate::triggers::{Action, MidiTrigger, TriggerTable};

pub const GET_SCENE_LIST: &str = "GetSceneList";
pub const GET_SCENE_ITEM_LIST: &str = "GetSceneItemList";
pub const GET_SOURCE_FILTER_LIST: &str = "GetSourceFilterList";

/// The discovery state machine. Driven entirely by pump dispatch; the
/// supervisor kicks it off with [`InitialQuery::send`] and polls
/// [`InitialQuery::is_done`].
pub struct InitialQuery {
    client: Arc<ObsClient>,
    table: Arc<TriggerTable>,
    /// Every request id the walk has issued.
    request_ids: Mutex<HashSet<String>>,
    started: AtomicBool,
}

impl InitialQuery {
    pub fn new(client: Arc<ObsClient>, table: Arc<TriggerTable>) -> Self {
        Self {
            client,
            table,
            request_ids: Mutex::new(HashSet::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Kick off the walk with the scene list request.
    pub async fn send(&self) -> Result<(), BridgeError> {
        let id = self.client.send_request(GET_SCENE_LIST, None).await?;
        self.record(id);
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// `true` once every request the walk has issued has been answered.
    pub fn is_done(&self) -> bool {
        if !self.started.load(Ordering::SeqCst) {
            return false;
        }
        let ids = self.request_ids.lock().expect("request id set poisoned");
        self.client.has_responses_for(ids.iter())
    }

    fn record(&self, id: String) {
        self.request_ids
            .lock()
            .expect("request id set poisoned")
            .insert(id);
    }

    async fn on_scene_list(&self, data: Value) -> Result<(), BridgeError> {
        let data: SceneListData = serde_json::from_value(data)
            .map_err(|e| BridgeError::Protocol(format!("bad {GET_SCENE_LIST} response: {e}")))?;

        for scene in data.scenes {
            if let Some(trigger) = MidiTrigger::parse_at_end_of(&scene.scene_name) {
                info!("detected scene trigger: {}", scene.scene_name);
                self.table.insert(
                    trigger,
                    Action::SwitchScene {
                        scene_name: scene.scene_name.clone(),
                    },
                );
            }

            let id = self
                .client
                .send_request(
                    GET_SCENE_ITEM_LIST,
                    Some(json!({ "sceneName": scene.scene_name })),
                )
                .await?;
            self.record(id);
        }
        Ok(())
    }

    async fn on_scene_item_list(&self, data: Value) -> Result<(), BridgeError> {
        let data: SceneItemListData = serde_json::from_value(data).map_err(|e| {
            BridgeError::Protocol(format!("bad {GET_SCENE_ITEM_LIST} response: {e}"))
        })?;

        for item in data.scene_items {
            let id = self
                .client
                .send_request(
                    GET_SOURCE_FILTER_LIST,
                    Some(json!({ "sourceName": item.source_name })),
                )
                .await?;
            self.record(id);
        }
        Ok(())
    }

    async fn on_source_filter_list(&self, frame: &Frame, data: Value) -> Result<(), BridgeError> {
        // correlate back to the source this filter list belongs to
        let source_name = frame
            .request_id()
            .and_then(|id| self.client.request_data(id))
            .and_then(|data| {
                data.get("sourceName")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .ok_or_else(|| {
                BridgeError::Protocol(format!(
                    "{GET_SOURCE_FILTER_LIST} response with no originating sourceName"
                ))
            })?;

        let data: SourceFilterListData = serde_json::from_value(data).map_err(|e| {
            BridgeError::Protocol(format!("bad {GET_SOURCE_FILTER_LIST} response: {e}"))
        })?;

        for filter in data.filters {
            if let Some(trigger) = MidiTrigger::parse_at_end_of(&filter.filter_name) {
                info!(
                    "detected filter trigger: {} on {}",
                    filter.filter_name, source_name
                );
                self.table.insert(
                    trigger,
                    Action::EnableFilter {
                        source_name: source_name.clone(),
                        filter_name: filter.filter_name,
                    },
                );
            }
        }
        Ok(())
    }
}

#[async_trait]
impl FrameHandler for InitialQuery {
    async fn on_frame(&self, frame: &Frame) -> Result<(), BridgeError> {
        if frame.op != OP_REQUEST_RESPONSE {
            return Ok(());
        }
        // the walk is the only sender of these request types, so dispatch
        // keys on the type rather than on id membership
        let request_type = match frame.request_type() {
            Some(t @ (GET_SCENE_LIST | GET_SCENE_ITEM_LIST | GET_SOURCE_FILTER_LIST)) => t,
            _ => return Ok(()),
        };
        if frame.is_failed_response() {
            return Err(BridgeError::Protocol(format!(
                "{request_type} failed during discovery"
            )));
        }

        let data = frame.response_data().cloned().unwrap_or_else(|| json!({}));
        match request_type {
            GET_SCENE_LIST => self.on_scene_list(data).await,
            GET_SCENE_ITEM_LIST => self.on_scene_item_list(data).await,
            _ => self.on_source_filter_list(frame, data).await,
        }
    }
}

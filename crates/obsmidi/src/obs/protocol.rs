//! obs-websocket v5 frame model and the RPC v1 authentication derivation.
//!
//! Only the opcodes the bridge speaks are modeled: Hello (0), Identify (1),
//! Identified (2), Request (6) and RequestResponse (7). Payloads stay as
//! `serde_json::Value` except for the discovery responses, which get typed
//! shapes.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

pub const OP_HELLO: u8 = 0;
pub const OP_IDENTIFY: u8 = 1;
pub const OP_IDENTIFIED: u8 = 2;
pub const OP_REQUEST: u8 = 6;
pub const OP_REQUEST_RESPONSE: u8 = 7;

/// A raw protocol frame: opcode plus data payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
}

impl Frame {
    pub fn request_id(&self) -> Option<&str> {
        self.d.get("requestId").and_then(Value::as_str)
    }

    pub fn request_type(&self) -> Option<&str> {
        self.d.get("requestType").and_then(Value::as_str)
    }

    /// `true` for op-7 frames whose requestStatus reports success.
    pub fn is_successful_response(&self) -> bool {
        self.op == OP_REQUEST_RESPONSE
            && self
                .d
                .pointer("/requestStatus/result")
                .and_then(Value::as_bool)
                .unwrap_or(false)
    }

    /// `true` for op-7 frames whose requestStatus is missing or reports
    /// failure.
    pub fn is_failed_response(&self) -> bool {
        self.op == OP_REQUEST_RESPONSE && !self.is_successful_response()
    }

    pub fn response_data(&self) -> Option<&Value> {
        self.d.get("responseData")
    }
}

/// Derive the Identify authentication string from the Hello parameters:
/// `base64(sha256(base64(sha256(password + salt)) + challenge))`, where the
/// inner digest is re-hashed as its base64 text.
pub fn compute_auth(password: &str, salt: &str, challenge: &str) -> String {
    let secret = STANDARD.encode(Sha256::digest(format!("{password}{salt}")));
    STANDARD.encode(Sha256::digest(format!("{secret}{challenge}")))
}

#[derive(Debug, Clone, Deserialize)]
pub struct SceneEntry {
    #[serde(rename = "sceneName")]
    pub scene_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SceneItemEntry {
    #[serde(rename = "sourceName")]
    pub source_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceFilterEntry {
    #[serde(rename = "filterName")]
    pub filter_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SceneListData {
    #[serde(default)]
    pub scenes: Vec<SceneEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SceneItemListData {
    #[serde(rename = "sceneItems", default)]
    pub scene_items: Vec<SceneItemEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceFilterListData {
    #[serde(default)]
    pub filters: Vec<SourceFilterEntry>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn auth_matches_known_vectors() {
        assert_eq!(
            compute_auth("test", "test", "test"),
            "6HSbGt7rMuSnLKJ8DYEaQRnEVpv7J/joGrFCjMhGuJA="
        );
        assert_eq!(
            compute_auth(
                "supersecret",
                "PZVbYpvAnZut2SS6JNJytDm9",
                "ztTBnnuqrqaKDzRM3xcVdbYm"
            ),
            "8feeOF01ujNBiQFBqMMiEb6/yB/tJDZyX2sosCp5zLU="
        );
    }

    #[test]
    fn successful_response_requires_result_true() {
        let ok: Frame = serde_json::from_value(json!({
            "op": 7,
            "d": { "requestId": "x", "requestStatus": { "result": true } }
        }))
        .unwrap();
        assert!(ok.is_successful_response());
        assert!(!ok.is_failed_response());

        let failed: Frame = serde_json::from_value(json!({
            "op": 7,
            "d": { "requestId": "x", "requestStatus": { "result": false, "code": 600 } }
        }))
        .unwrap();
        assert!(!failed.is_successful_response());
        assert!(failed.is_failed_response());

        let event: Frame = serde_json::from_value(json!({ "op": 5, "d": {} })).unwrap();
        assert!(!event.is_successful_response());
        assert!(!event.is_failed_response());
    }

    #[test]
    fn frame_accessors() {
        let frame: Frame = serde_json::from_value(json!({
            "op": 7,
            "d": {
                "requestId": "abc",
                "requestType": "GetSceneList",
                "requestStatus": { "result": true },
                "responseData": { "scenes": [ { "sceneName": "One", "sceneIndex": 0 } ] }
            }
        }))
        .unwrap();

        assert_eq!(frame.request_id(), Some("abc"));
        assert_eq!(frame.request_type(), Some("GetSceneList"));

        let data: SceneListData =
            serde_json::from_value(frame.response_data().unwrap().clone()).unwrap();
        assert_eq!(data.scenes.len(), 1);
        assert_eq!(data.scenes[0].scene_name, "One");
    }
}

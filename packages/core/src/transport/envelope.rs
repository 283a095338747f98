//! Wire envelopes exchanged with the channel relay
//!
//! Outbound frames have a fixed shape. Inbound frames do not: replies may
//! carry their correlation id at the top level, inside `message`, or not at
//! all, so they are kept as raw JSON and classified by [`super::matcher`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reserved command that establishes channel membership
pub const JOIN_COMMAND: &str = "join";

/// Discriminator of inbound progress notifications
pub const PROGRESS_UPDATE_TYPE: &str = "progress_update";

/// Key under which the correlation id is duplicated into params
pub const COMMAND_ID_PARAM: &str = "commandId";

/// Outbound frame type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeType {
    Join,
    Message,
}

/// Command body carried inside an outbound envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMessage {
    pub id: String,
    pub command: String,
    pub params: Value,
}

/// Outbound envelope
///
/// ```json
/// {
///   "id": "7c0e...",
///   "type": "message",
///   "channel": "abc",
///   "message": { "id": "7c0e...", "command": "get_selection", "params": { "commandId": "7c0e..." } }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EnvelopeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    pub message: CommandMessage,
}

impl OutboundEnvelope {
    /// Build the envelope for `command`
    ///
    /// Join frames address the channel being joined (taken from
    /// `params.channel`); every other frame echoes `current_channel`.
    pub fn new(id: &str, command: &str, params: Value, current_channel: Option<&str>) -> Self {
        let is_join = command == JOIN_COMMAND;

        let channel = if is_join {
            params
                .get("channel")
                .and_then(|c| c.as_str())
                .map(str::to_string)
        } else {
            current_channel.map(str::to_string)
        };

        Self {
            id: id.to_string(),
            kind: if is_join {
                EnvelopeType::Join
            } else {
                EnvelopeType::Message
            },
            channel,
            message: CommandMessage {
                id: id.to_string(),
                command: command.to_string(),
                params: with_command_id(params, id),
            },
        }
    }
}

/// Copy `params` into an object and stamp the correlation id into it
///
/// Non-object params are kept under a `value` key so the id can still ride
/// along for peers that only echo params back.
fn with_command_id(params: Value, id: &str) -> Value {
    let mut map = match params {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    };
    map.insert(COMMAND_ID_PARAM.to_string(), Value::String(id.to_string()));
    Value::Object(map)
}

/// Progress payload of a `progress_update` frame
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressData {
    #[serde(default)]
    pub command_type: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ProgressData {
    /// Extract `message.data` from a progress frame, tolerating missing fields
    pub fn from_frame(frame: &Value) -> Self {
        frame
            .get("message")
            .and_then(|m| m.get("data"))
            .and_then(|d| serde_json::from_value(d.clone()).ok())
            .unwrap_or_default()
    }
}

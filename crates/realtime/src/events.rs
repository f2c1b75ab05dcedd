//! Events the middle tier synthesizes toward the upstream, and the
//! server-enforced session payload they carry.

use serde::Serialize;
use serde_json::{Map, Value, json};

/// Events the middle tier sends upstream on its own behalf. This is a closed
/// set: everything else the upstream receives is a forwarded client frame.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub(crate) enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: Value },
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
    #[serde(rename = "response.create")]
    ResponseCreate,
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: FunctionCallOutput },
}

/// Conversation item feeding a tool result back to the model.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename = "function_call_output")]
pub(crate) struct FunctionCallOutput {
    pub call_id: String,
    pub output: String,
}

impl ClientEvent {
    pub(crate) fn to_json(&self) -> String {
        serde_json::to_string(self).expect("client events always serialize")
    }
}

/// Voice-activity-detection block configured into telephony sessions.
fn server_vad() -> Value {
    json!({
        "type": "server_vad",
        "threshold": 0.7,
        "prefix_padding_ms": 300,
        "silence_duration_ms": 500,
    })
}

/// The per-session snapshot of the server-enforced configuration. Immutable
/// once a session starts; the voice slot of the middle tier only affects
/// sessions accepted afterwards.
#[derive(Debug, Clone)]
pub(crate) struct SessionSettings {
    pub instructions: Option<String>,
    pub temperature: Option<f64>,
    pub max_response_output_tokens: Option<u32>,
    pub disable_audio: Option<bool>,
    pub voice: String,
    pub tool_choice: &'static str,
    pub tools: Vec<Value>,
}

impl SessionSettings {
    /// Overwrites the enforced fields of a `session` object, leaving any
    /// other client-provided fields alone. An optional with no server value
    /// is removed so client attempts to set it never reach the upstream.
    pub(crate) fn apply_to(&self, session: &mut Map<String, Value>) {
        session.insert("voice".into(), json!(self.voice));

        set_or_remove(session, "instructions", self.instructions.as_deref().map(|s| json!(s)));
        set_or_remove(session, "temperature", self.temperature.map(|t| json!(t)));
        set_or_remove(
            session,
            "max_response_output_tokens",
            self.max_response_output_tokens.map(|t| json!(t)),
        );
        set_or_remove(session, "disable_audio", self.disable_audio.map(|d| json!(d)));

        session.insert("tool_choice".into(), json!(self.tool_choice));
        session.insert("tools".into(), Value::Array(self.tools.clone()));
    }

    /// The full session payload synthesized for a fresh telephony stream,
    /// including the fixed voice-activity-detection block.
    pub(crate) fn telephony_session(&self) -> Value {
        let mut session = Map::new();
        self.apply_to(&mut session);
        session.insert("turn_detection".into(), server_vad());

        Value::Object(session)
    }
}

fn set_or_remove(session: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    match value {
        Some(value) => {
            session.insert(key.into(), value);
        }
        None => {
            session.remove(key);
        }
    }
}

//! The telephony media dialect and its mapping to the upstream realtime
//! dialect.
//!
//! The media gateway speaks `kind`-discriminated JSON; the upstream speaks
//! `type`-discriminated JSON. Both mappings are pure: everything without a
//! defined translation is dropped, audio payloads pass through opaquely as
//! base64 text.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::{ClientEvent, SessionSettings};

/// Events on the telephony media socket, discriminated by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind")]
pub(crate) enum TelephonyEvent {
    /// First frame of a media stream. The stream metadata itself is ignored;
    /// receiving it triggers the synthesized `session.update`.
    AudioMetadata,
    AudioData {
        #[serde(rename = "audioData")]
        audio_data: AudioPayload,
    },
    StopAudio {
        #[serde(rename = "audioData")]
        audio_data: Option<AudioPayload>,
        #[serde(rename = "stopAudio")]
        stop_audio: StopAudioSignal,
    },
}

/// Base64 audio chunk carried by `AudioData` frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct AudioPayload {
    pub data: String,
}

/// Marker object carried by barge-in frames; tells the gateway to discard
/// queued playback.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct StopAudioSignal {}

impl TelephonyEvent {
    fn stop_audio() -> Self {
        Self::StopAudio {
            audio_data: None,
            stop_audio: StopAudioSignal {},
        }
    }
}

/// Decodes a telephony frame. Frames that do not carry a known `kind` have
/// no upstream meaning and decode to `None`.
pub(crate) fn parse(frame: &str) -> Option<TelephonyEvent> {
    match serde_json::from_str(frame) {
        Ok(event) => Some(event),
        Err(err) => {
            log::debug!("dropping untranslatable telephony frame: {err}");
            None
        }
    }
}

/// Maps a telephony frame to the upstream dialect.
///
/// The initial metadata frame becomes the server-enforced `session.update`;
/// audio chunks become `input_audio_buffer.append`; everything else is
/// dropped.
pub(crate) fn to_upstream(event: TelephonyEvent, settings: &SessionSettings) -> Option<ClientEvent> {
    match event {
        TelephonyEvent::AudioMetadata => Some(ClientEvent::SessionUpdate {
            session: settings.telephony_session(),
        }),
        TelephonyEvent::AudioData { audio_data } => Some(ClientEvent::InputAudioBufferAppend {
            audio: audio_data.data,
        }),
        TelephonyEvent::StopAudio { .. } => None,
    }
}

/// Maps an upstream event to the telephony dialect.
///
/// Audio deltas become `AudioData` frames; detected speech becomes the
/// barge-in `StopAudio` signal; everything else is dropped for telephony
/// clients.
pub(crate) fn from_upstream(event: &Value) -> Option<TelephonyEvent> {
    match event.get("type").and_then(Value::as_str) {
        Some("response.audio.delta") => {
            let delta = event.get("delta").and_then(Value::as_str)?;

            Some(TelephonyEvent::AudioData {
                audio_data: AudioPayload {
                    data: delta.to_string(),
                },
            })
        }
        Some("input_audio_buffer.speech_started") => Some(TelephonyEvent::stop_audio()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn settings() -> SessionSettings {
        SessionSettings {
            instructions: None,
            temperature: None,
            max_response_output_tokens: None,
            disable_audio: None,
            voice: "alloy".into(),
            tool_choice: "none",
            tools: Vec::new(),
        }
    }

    #[test]
    fn audio_data_becomes_buffer_append() {
        let event = parse(r#"{"kind":"AudioData","audioData":{"data":"AAECAw=="}}"#).unwrap();
        let upstream = to_upstream(event, &settings()).unwrap();

        assert_eq!(
            upstream.to_json(),
            r#"{"type":"input_audio_buffer.append","audio":"AAECAw=="}"#
        );
    }

    #[test]
    fn audio_metadata_synthesizes_session_update() {
        let event = parse(r#"{"kind":"AudioMetadata","encoding":"PCM","sampleRate":24000}"#).unwrap();
        let upstream = to_upstream(event, &settings()).unwrap();
        let value: Value = serde_json::from_str(&upstream.to_json()).unwrap();

        assert_eq!(value["type"], json!("session.update"));
        assert_eq!(value["session"]["voice"], json!("alloy"));
        assert_eq!(value["session"]["tool_choice"], json!("none"));
        assert_eq!(value["session"]["turn_detection"]["type"], json!("server_vad"));
    }

    #[test]
    fn unknown_kinds_are_dropped() {
        assert_eq!(parse(r#"{"kind":"DtmfData","dtmfData":{"tone":"1"}}"#), None);
        assert_eq!(parse("not json"), None);
    }

    #[test]
    fn audio_delta_becomes_audio_data() {
        let event = from_upstream(&json!({"type": "response.audio.delta", "delta": "BAUGBw=="})).unwrap();

        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"kind":"AudioData","audioData":{"data":"BAUGBw=="}}"#
        );
    }

    #[test]
    fn speech_started_becomes_stop_audio() {
        let event = from_upstream(&json!({"type": "input_audio_buffer.speech_started"})).unwrap();

        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"kind":"StopAudio","audioData":null,"stopAudio":{}}"#
        );
    }

    #[test]
    fn other_upstream_events_have_no_telephony_form() {
        assert_eq!(from_upstream(&json!({"type": "response.done"})), None);
        assert_eq!(from_upstream(&json!({"type": "session.created"})), None);
    }

    #[test]
    fn audio_bytes_round_trip_exactly() {
        // to_upstream ∘ from_upstream restores the delta bytes.
        let delta = "c29tZSBvcGFxdWUgYXVkaW8=";
        let telephony = from_upstream(&json!({"type": "response.audio.delta", "delta": delta})).unwrap();

        let TelephonyEvent::AudioData { audio_data } = &telephony else {
            unreachable!("audio delta maps to AudioData");
        };
        assert_eq!(audio_data.data, delta);

        let upstream = to_upstream(telephony.clone(), &settings()).unwrap();
        let value: Value = serde_json::from_str(&upstream.to_json()).unwrap();
        assert_eq!(value["audio"], json!(delta));
    }
}

//! Named messages exchanged with the scanning service
//!
//! Every message travels as one JSON text frame:
//!
//! ```text
//! {"event": "start_scanning", "data": {"exam_id": 42, "template_id": 7}}
//! ```
//!
//! A missing or `null` `data` field decodes as an empty object, so payload-less
//! acknowledgements such as `{"event": "connected"}` are accepted.

use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};
use crate::models::RecognitionResult;

/// Raw envelope, used to normalise `data` before typed decoding
#[derive(Debug, Deserialize, Serialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

fn decode_envelope<T: serde::de::DeserializeOwned>(text: &str) -> ScanResult<T> {
    let mut envelope: Envelope = serde_json::from_str(text)?;
    if envelope.data.is_null() {
        envelope.data = serde_json::Value::Object(Default::default());
    }
    let event = envelope.event.clone();
    serde_json::from_value(serde_json::to_value(envelope)?)
        .map_err(|e| ScanError::Protocol(format!("bad '{}' message: {}", event, e)))
}

// =============================================================================
// Client -> service
// =============================================================================

/// Messages sent by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Begin a scanning session for an exam/template pair
    StartScanning { exam_id: i64, template_id: i64 },

    /// Submit one encoded frame for recognition
    CaptureFrame { frame: String, frame_id: u64 },

    /// Persist a recognition result
    SaveResult { result: RecognitionResult },

    /// Finish the session
    EndSession {},
}

/// Discriminant of [`OutboundMessage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutboundKind {
    StartScanning,
    CaptureFrame,
    SaveResult,
    EndSession,
}

impl OutboundKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboundKind::StartScanning => "start_scanning",
            OutboundKind::CaptureFrame => "capture_frame",
            OutboundKind::SaveResult => "save_result",
            OutboundKind::EndSession => "end_session",
        }
    }
}

impl std::fmt::Display for OutboundKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl OutboundMessage {
    pub fn kind(&self) -> OutboundKind {
        match self {
            OutboundMessage::StartScanning { .. } => OutboundKind::StartScanning,
            OutboundMessage::CaptureFrame { .. } => OutboundKind::CaptureFrame,
            OutboundMessage::SaveResult { .. } => OutboundKind::SaveResult,
            OutboundMessage::EndSession {} => OutboundKind::EndSession,
        }
    }

    /// Encode as a JSON text frame
    pub fn encode(&self) -> ScanResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a JSON text frame (service side)
    pub fn decode(text: &str) -> ScanResult<Self> {
        decode_envelope(text)
    }
}

// =============================================================================
// Service -> client
// =============================================================================

/// Messages sent by the scanning service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Connection accepted
    Connected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Session bound to an exam/template pair
    ScanningStarted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exam_id: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        template_id: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Recognition finished for one frame
    FrameProcessed {
        #[serde(default)]
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<RecognitionResult>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        frame_id: Option<u64>,
    },

    /// Save acknowledgement
    ResultSaved {
        #[serde(default)]
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Session closed by the service
    SessionEnded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Processing error; the session stays open
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Credentials rejected; the service will not serve this connection
    AuthError {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

/// Discriminant of [`InboundMessage`], used as the handler registration key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InboundKind {
    Connected,
    ScanningStarted,
    FrameProcessed,
    ResultSaved,
    SessionEnded,
    Error,
    AuthError,
}

impl InboundKind {
    /// All inbound message kinds
    pub const ALL: [InboundKind; 7] = [
        InboundKind::Connected,
        InboundKind::ScanningStarted,
        InboundKind::FrameProcessed,
        InboundKind::ResultSaved,
        InboundKind::SessionEnded,
        InboundKind::Error,
        InboundKind::AuthError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InboundKind::Connected => "connected",
            InboundKind::ScanningStarted => "scanning_started",
            InboundKind::FrameProcessed => "frame_processed",
            InboundKind::ResultSaved => "result_saved",
            InboundKind::SessionEnded => "session_ended",
            InboundKind::Error => "error",
            InboundKind::AuthError => "auth_error",
        }
    }
}

impl std::fmt::Display for InboundKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl InboundMessage {
    pub fn kind(&self) -> InboundKind {
        match self {
            InboundMessage::Connected { .. } => InboundKind::Connected,
            InboundMessage::ScanningStarted { .. } => InboundKind::ScanningStarted,
            InboundMessage::FrameProcessed { .. } => InboundKind::FrameProcessed,
            InboundMessage::ResultSaved { .. } => InboundKind::ResultSaved,
            InboundMessage::SessionEnded { .. } => InboundKind::SessionEnded,
            InboundMessage::Error { .. } => InboundKind::Error,
            InboundMessage::AuthError { .. } => InboundKind::AuthError,
        }
    }

    /// The free-text message carried by the payload, if any
    pub fn message(&self) -> Option<&str> {
        match self {
            InboundMessage::Connected { message, .. }
            | InboundMessage::ScanningStarted { message, .. }
            | InboundMessage::FrameProcessed { message, .. }
            | InboundMessage::ResultSaved { message, .. }
            | InboundMessage::SessionEnded { message }
            | InboundMessage::Error { message }
            | InboundMessage::AuthError { message } => message.as_deref(),
        }
    }

    /// Encode as a JSON text frame (service side)
    pub fn encode(&self) -> ScanResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a JSON text frame
    pub fn decode(text: &str) -> ScanResult<Self> {
        decode_envelope(text)
    }

    pub fn error(message: impl Into<String>) -> Self {
        InboundMessage::Error {
            message: Some(message.into()),
        }
    }

    pub fn auth_error(message: impl Into<String>) -> Self {
        InboundMessage::AuthError {
            message: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_start_scanning_wire_format() {
        let msg = OutboundMessage::StartScanning {
            exam_id: 42,
            template_id: 7,
        };
        let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"event": "start_scanning", "data": {"exam_id": 42, "template_id": 7}})
        );
    }

    #[test]
    fn test_end_session_carries_empty_object() {
        let value: serde_json::Value =
            serde_json::from_str(&OutboundMessage::EndSession {}.encode().unwrap()).unwrap();
        assert_eq!(value, serde_json::json!({"event": "end_session", "data": {}}));
    }

    #[test]
    fn test_decode_without_data() {
        let msg = InboundMessage::decode(r#"{"event":"connected"}"#).unwrap();
        assert_eq!(
            msg,
            InboundMessage::Connected {
                session_id: None,
                message: None
            }
        );

        let msg = OutboundMessage::decode(r#"{"event":"end_session","data":null}"#).unwrap();
        assert_eq!(msg, OutboundMessage::EndSession {});
    }

    #[test]
    fn test_decode_frame_processed() {
        let text = r#"{"event":"frame_processed","data":{"success":false,"message":"No sheet detected","frame_id":3}}"#;
        let msg = InboundMessage::decode(text).unwrap();
        assert_eq!(msg.kind(), InboundKind::FrameProcessed);
        assert_eq!(msg.message(), Some("No sheet detected"));
        match msg {
            InboundMessage::FrameProcessed {
                success,
                data,
                frame_id,
                ..
            } => {
                assert!(!success);
                assert!(data.is_none());
                assert_eq!(frame_id, Some(3));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_decode_unknown_event_fails() {
        let err = InboundMessage::decode(r#"{"event":"pong","data":{}}"#).unwrap_err();
        assert!(matches!(err, ScanError::Protocol(_)));
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(InboundMessage::decode("not json").is_err());
    }

    #[test]
    fn test_kind_names_match_wire_names() {
        for kind in InboundKind::ALL {
            let text = format!(r#"{{"event":"{}"}}"#, kind.as_str());
            assert_eq!(InboundMessage::decode(&text).unwrap().kind(), kind);
        }
    }
}

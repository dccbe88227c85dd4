//! Captured frames submitted for recognition

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One captured image sent for recognition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSubmission {
    /// Per-session frame number, echoed back with the result
    pub frame_id: u64,
    /// Encoded image (typically a base64 data URL)
    pub frame: String,
    /// When the frame was handed to the transport
    pub submitted_at: DateTime<Utc>,
}

impl FrameSubmission {
    pub fn new(frame_id: u64, frame: impl Into<String>) -> Self {
        Self {
            frame_id,
            frame: frame.into(),
            submitted_at: Utc::now(),
        }
    }
}

/// Build a `data:` URL from a MIME type and base64 payload
pub fn data_url(mime: &str, base64_payload: &str) -> String {
    format!("data:{};base64,{}", mime, base64_payload)
}

/// Strip a `data:<mime>;base64,` prefix, returning the raw base64 payload
pub fn strip_data_url(frame: &str) -> &str {
    if frame.starts_with("data:") {
        match frame.find(";base64,") {
            Some(pos) => &frame[pos + ";base64,".len()..],
            None => frame,
        }
    } else {
        frame
    }
}

//! Controller state and the snapshot published to observers

use eduscan_core::{ConnectionState, FrameSubmission, RecognitionResult};

/// Point-in-time view of a scanning session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanStatus {
    /// Transport connection state
    pub connection: ConnectionState,
    pub is_connected: bool,
    /// The service acknowledged `start_scanning`
    pub is_scanning: bool,
    /// A frame is awaiting its recognition result
    pub is_processing: bool,
    /// Id of the frame awaiting its result
    pub pending_frame: Option<u64>,
    /// Most recent recognition result
    pub last_result: Option<RecognitionResult>,
    /// Frame id `last_result` belongs to
    pub last_result_frame: Option<u64>,
    /// Most recent error surfaced to the user
    pub last_error: Option<String>,
    /// Session id assigned by the service
    pub session_id: Option<String>,
}

/// Mutable session state guarded by the controller
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub scanning: bool,
    pub pending_frame: Option<FrameSubmission>,
    pub next_frame_id: u64,
    pub last_result: Option<RecognitionResult>,
    pub last_result_frame: Option<u64>,
    pub last_error: Option<String>,
    pub session_id: Option<String>,
}

impl SessionState {
    /// Forget everything tied to the current session
    pub fn end(&mut self) {
        self.scanning = false;
        self.pending_frame = None;
        self.session_id = None;
    }

    pub fn snapshot(&self, connection: ConnectionState) -> ScanStatus {
        ScanStatus {
            connection,
            is_connected: connection.is_connected(),
            is_scanning: self.scanning,
            is_processing: self.pending_frame.is_some(),
            pending_frame: self.pending_frame.as_ref().map(|f| f.frame_id),
            last_result: self.last_result.clone(),
            last_result_frame: self.last_result_frame,
            last_error: self.last_error.clone(),
            session_id: self.session_id.clone(),
        }
    }
}

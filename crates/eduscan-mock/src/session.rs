//! Per-connection scanning state machine
//!
//! Kept free of any socket handling: each client message goes in, the
//! replies (and whether to close afterwards) come out.

use chrono::Utc;
use tracing::{debug, info};

use eduscan_core::{InboundMessage, OutboundMessage};

use crate::state::{MockState, SavedRecord};

/// What to send back for one client message
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reply {
    pub messages: Vec<InboundMessage>,
    /// Close the connection after sending `messages`
    pub close: bool,
}

impl Reply {
    fn one(message: InboundMessage) -> Self {
        Self {
            messages: vec![message],
            close: false,
        }
    }
}

/// One client's session
pub struct ScanSession {
    id: String,
    state: MockState,
    context: Option<(i64, i64)>,
    frames: u64,
}

impl ScanSession {
    pub fn new(state: MockState) -> Self {
        Self {
            id: state.next_session_id(),
            state,
            context: None,
            frames: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Exam/template pair of the running session, if started
    pub fn context(&self) -> Option<(i64, i64)> {
        self.context
    }

    /// Greeting sent once the connection is accepted
    pub fn greeting(&self) -> InboundMessage {
        InboundMessage::Connected {
            session_id: Some(self.id.clone()),
            message: Some("Connected to scanning service".into()),
        }
    }

    pub fn handle(&mut self, message: OutboundMessage) -> Reply {
        match message {
            OutboundMessage::StartScanning {
                exam_id,
                template_id,
            } => {
                if exam_id <= 0 || template_id <= 0 {
                    return Reply::one(InboundMessage::error(
                        "Exam and template ids must be positive",
                    ));
                }
                self.context = Some((exam_id, template_id));
                info!(session = %self.id, exam_id, template_id, "Scanning started");
                Reply::one(InboundMessage::ScanningStarted {
                    exam_id: Some(exam_id),
                    template_id: Some(template_id),
                    message: Some(format!("Scanning started for exam {}", exam_id)),
                })
            }

            OutboundMessage::CaptureFrame { frame, frame_id } => {
                if self.context.is_none() {
                    return Reply::one(InboundMessage::error("Session not started"));
                }
                self.frames += 1;
                let reply = match self.state.recognizer().recognize(&frame) {
                    Ok(result) => InboundMessage::FrameProcessed {
                        success: true,
                        message: result.message.clone(),
                        data: Some(result),
                        frame_id: Some(frame_id),
                    },
                    Err(e) => {
                        debug!(session = %self.id, frame_id, "Frame rejected: {}", e);
                        InboundMessage::FrameProcessed {
                            success: false,
                            message: Some(e.to_string()),
                            data: None,
                            frame_id: Some(frame_id),
                        }
                    }
                };
                Reply::one(reply)
            }

            OutboundMessage::SaveResult { result } => {
                let Some((exam_id, template_id)) = self.context else {
                    return Reply::one(InboundMessage::error("Session not started"));
                };
                let student = result
                    .student_id
                    .clone()
                    .unwrap_or_else(|| "unknown student".into());
                self.state.save(SavedRecord {
                    session_id: self.id.clone(),
                    exam_id,
                    template_id,
                    result,
                    saved_at: Utc::now(),
                });
                info!(session = %self.id, exam_id, %student, "Result saved");
                Reply::one(InboundMessage::ResultSaved {
                    success: true,
                    message: Some(format!("Result saved for {}", student)),
                })
            }

            OutboundMessage::EndSession {} => {
                info!(session = %self.id, frames = self.frames, "Session ended");
                self.context = None;
                Reply {
                    messages: vec![InboundMessage::SessionEnded {
                        message: Some("Scanning session ended".into()),
                    }],
                    close: true,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SHEET: &str = "data:image/jpeg;base64,/9j/4AAQSkZJRgABAQAAAQABAAA=";

    fn started() -> ScanSession {
        let mut session = ScanSession::new(MockState::default());
        session.handle(OutboundMessage::StartScanning {
            exam_id: 42,
            template_id: 7,
        });
        session
    }

    #[test]
    fn test_start_scanning() {
        let mut session = ScanSession::new(MockState::default());
        let reply = session.handle(OutboundMessage::StartScanning {
            exam_id: 42,
            template_id: 7,
        });

        assert!(!reply.close);
        assert!(matches!(
            reply.messages.as_slice(),
            [InboundMessage::ScanningStarted {
                exam_id: Some(42),
                template_id: Some(7),
                ..
            }]
        ));
        assert_eq!(session.context(), Some((42, 7)));
    }

    #[test]
    fn test_start_with_invalid_ids() {
        let mut session = ScanSession::new(MockState::default());
        let reply = session.handle(OutboundMessage::StartScanning {
            exam_id: 0,
            template_id: 7,
        });

        assert_eq!(reply.messages[0].kind().as_str(), "error");
        assert_eq!(session.context(), None);
    }

    #[test]
    fn test_capture_before_start() {
        let mut session = ScanSession::new(MockState::default());
        let reply = session.handle(OutboundMessage::CaptureFrame {
            frame: SHEET.into(),
            frame_id: 1,
        });

        assert_eq!(
            reply.messages,
            vec![InboundMessage::error("Session not started")]
        );
    }

    #[test]
    fn test_capture_echoes_frame_id() {
        let mut session = started();
        let reply = session.handle(OutboundMessage::CaptureFrame {
            frame: SHEET.into(),
            frame_id: 5,
        });

        match &reply.messages[0] {
            InboundMessage::FrameProcessed {
                success,
                data,
                frame_id,
                ..
            } => {
                assert!(*success);
                assert_eq!(*frame_id, Some(5));
                assert!(data.as_ref().unwrap().student_id.is_some());
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn test_empty_frame_fails_recognition() {
        let mut session = started();
        let reply = session.handle(OutboundMessage::CaptureFrame {
            frame: String::new(),
            frame_id: 1,
        });

        assert!(matches!(
            reply.messages.as_slice(),
            [InboundMessage::FrameProcessed {
                success: false,
                data: None,
                frame_id: Some(1),
                ..
            }]
        ));
    }

    #[test]
    fn test_save_result_is_stored() {
        let state = MockState::default();
        let mut session = ScanSession::new(state.clone());
        session.handle(OutboundMessage::StartScanning {
            exam_id: 3,
            template_id: 4,
        });

        let result = state.recognizer().recognize(SHEET).unwrap();
        let reply = session.handle(OutboundMessage::SaveResult {
            result: result.clone(),
        });

        assert!(matches!(
            reply.messages.as_slice(),
            [InboundMessage::ResultSaved { success: true, .. }]
        ));
        let saved = state.saved();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].exam_id, 3);
        assert_eq!(saved[0].template_id, 4);
        assert_eq!(saved[0].session_id, session.id());
        assert_eq!(saved[0].result.student_id, result.student_id);
    }

    #[test]
    fn test_end_session_closes() {
        let mut session = started();
        let reply = session.handle(OutboundMessage::EndSession {});

        assert!(reply.close);
        assert!(matches!(
            reply.messages.as_slice(),
            [InboundMessage::SessionEnded { .. }]
        ));
        assert_eq!(session.context(), None);
    }
}

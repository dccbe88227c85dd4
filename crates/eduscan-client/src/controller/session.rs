//! Scan session controller

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, instrument, warn};

use eduscan_core::{
    FrameSubmission, InboundKind, InboundMessage, OutboundMessage, RecognitionResult, SavedResult,
    ScanError, ScanResult, ScanningContext,
};

use super::state::{ScanStatus, SessionState};
use crate::config::{ScanConfig, TimeoutsConfig};
use crate::credentials::TokenSource;
use crate::notifier::{Notice, Notifier};
use crate::transport::{DisconnectReason, Slot, TransportSession};

/// Callback for each accepted recognition result
pub type ResultCallback = dyn Fn(&RecognitionResult) + Send + Sync;

/// Callback for each save acknowledgement
pub type SavedCallback = dyn Fn(&SavedResult) + Send + Sync;

struct Shared {
    transport: TransportSession,
    tokens: Arc<dyn TokenSource>,
    notifier: Arc<dyn Notifier>,
    timeouts: TimeoutsConfig,
    context: Mutex<ScanningContext>,
    state: Mutex<SessionState>,
    status: watch::Sender<ScanStatus>,
    on_result: Slot<ResultCallback>,
    on_saved: Slot<SavedCallback>,
}

/// Sequences a scanning session: start → capture loop → save → end
///
/// Owns its [`TransportSession`] exclusively. State changes are published as
/// [`ScanStatus`] snapshots; user-facing messages go to the [`Notifier`].
/// Dropping the controller closes the connection.
pub struct ScanSessionController {
    shared: Arc<Shared>,
}

impl ScanSessionController {
    /// Create a controller with its own transport
    pub fn new(
        config: &ScanConfig,
        tokens: Arc<dyn TokenSource>,
        notifier: Arc<dyn Notifier>,
    ) -> ScanResult<Self> {
        let transport = TransportSession::new(config, notifier.clone())?;
        let (status, _) = watch::channel(ScanStatus::default());

        let shared = Arc::new(Shared {
            transport,
            tokens,
            notifier,
            timeouts: config.timeouts.clone(),
            context: Mutex::new(ScanningContext::default()),
            state: Mutex::new(SessionState::default()),
            status,
            on_result: Slot::new(),
            on_saved: Slot::new(),
        });

        for kind in InboundKind::ALL {
            let weak = Arc::downgrade(&shared);
            shared.transport.on(kind, move |message| {
                if let Some(shared) = Weak::upgrade(&weak) {
                    shared.handle(message);
                }
            });
        }

        let weak = Arc::downgrade(&shared);
        shared.transport.on_disconnect(move |reason| {
            if let Some(shared) = Weak::upgrade(&weak) {
                shared.connection_lost(reason);
            }
        });

        Ok(Self { shared })
    }

    // =========================================================================
    // Context
    // =========================================================================

    /// Bind the exam/template pair used by the next `start_scanning`
    pub fn set_context(&self, exam_id: i64, template_id: i64) {
        *self.shared.context.lock() = ScanningContext::new(exam_id, template_id);
    }

    pub fn set_exam(&self, exam_id: Option<i64>) {
        self.shared.context.lock().exam_id = exam_id;
    }

    pub fn set_template(&self, template_id: Option<i64>) {
        self.shared.context.lock().template_id = template_id;
    }

    pub fn context(&self) -> ScanningContext {
        *self.shared.context.lock()
    }

    // =========================================================================
    // Callbacks
    // =========================================================================

    /// Replace the callback run for every accepted recognition result
    pub fn set_result_callback<F>(&self, callback: F)
    where
        F: Fn(&RecognitionResult) + Send + Sync + 'static,
    {
        self.shared.on_result.set(Arc::new(callback));
    }

    /// Replace the callback run for every save acknowledgement
    pub fn set_saved_callback<F>(&self, callback: F)
    where
        F: Fn(&SavedResult) + Send + Sync + 'static,
    {
        self.shared.on_saved.set(Arc::new(callback));
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Current status snapshot
    pub fn status(&self) -> ScanStatus {
        let state = self.shared.state.lock();
        state.snapshot(self.shared.transport.state())
    }

    /// Subscribe to status snapshots
    pub fn watch_status(&self) -> watch::Receiver<ScanStatus> {
        self.shared.status.subscribe()
    }

    /// Status snapshots as a stream
    pub fn status_stream(&self) -> WatchStream<ScanStatus> {
        WatchStream::new(self.watch_status())
    }

    pub fn is_connected(&self) -> bool {
        self.shared.transport.is_connected()
    }

    pub fn is_scanning(&self) -> bool {
        self.shared.state.lock().scanning
    }

    pub fn is_processing(&self) -> bool {
        self.shared.state.lock().pending_frame.is_some()
    }

    pub fn last_result(&self) -> Option<RecognitionResult> {
        self.shared.state.lock().last_result.clone()
    }

    /// The underlying transport
    pub fn transport(&self) -> &TransportSession {
        &self.shared.transport
    }

    // =========================================================================
    // Workflow
    // =========================================================================

    /// Start a scanning session for the bound exam/template pair
    ///
    /// Fails locally, without touching the network, when either identifier
    /// is missing. Connects first when needed and sends `start_scanning` only
    /// once the connection is confirmed. `is_scanning` turns true when the
    /// service acknowledges with `scanning_started`.
    #[instrument(skip(self))]
    pub async fn start_scanning(&self) -> ScanResult<()> {
        let context = self.context();
        let (exam_id, template_id) = context.require().map_err(|e| self.shared.reject(e))?;

        if !self.shared.transport.is_connected() {
            let token = self
                .shared
                .tokens
                .token()
                .filter(|token| !token.trim().is_empty())
                .ok_or_else(|| self.shared.reject(ScanError::MissingToken))?;

            self.shared.transport.connect(&token).await?;
            self.shared.publish_current();
        }

        self.shared
            .transport
            .wait_until_connected(self.shared.timeouts.connected_wait())
            .await
            .map_err(|e| self.shared.reject(e))?;

        {
            let mut state = self.shared.state.lock();
            state.last_error = None;
            self.shared.publish(&state);
        }
        self.shared.transport.send(&OutboundMessage::StartScanning {
            exam_id,
            template_id,
        })?;
        info!(exam_id, template_id, "Requested scanning session");

        Ok(())
    }

    /// Submit one encoded frame for recognition
    ///
    /// Requires an acknowledged session and no frame already in flight.
    /// Returns the frame id the result will carry.
    pub fn capture_frame(&self, frame: impl Into<String>) -> ScanResult<u64> {
        let mut state = self.shared.state.lock();

        let check = if !self.shared.transport.is_connected() || !state.scanning {
            Err(ScanError::SessionNotStarted)
        } else if let Some(pending) = &state.pending_frame {
            Err(ScanError::FrameInFlight(pending.frame_id))
        } else {
            Ok(())
        };
        if let Err(e) = check {
            drop(state);
            return Err(self.shared.reject(e));
        }

        let submission = FrameSubmission::new(state.next_frame_id + 1, frame);
        let frame_id = submission.frame_id;
        self.shared.transport.send(&OutboundMessage::CaptureFrame {
            frame: submission.frame.clone(),
            frame_id,
        })?;

        debug!(frame_id, bytes = submission.frame.len(), "Frame submitted");
        state.next_frame_id = frame_id;
        state.pending_frame = Some(submission);
        self.shared.publish(&state);

        Ok(frame_id)
    }

    /// Ask the service to persist a result (the last one when `None`)
    pub fn save_result(&self, result: Option<RecognitionResult>) -> ScanResult<()> {
        let result = result
            .or_else(|| self.last_result())
            .ok_or_else(|| self.shared.reject(ScanError::NoResult))?;

        if !self.shared.transport.is_connected() {
            return Err(self.shared.reject(ScanError::NotConnected));
        }

        self.shared
            .transport
            .send(&OutboundMessage::SaveResult { result })?;
        info!("Result submitted for saving");

        Ok(())
    }

    /// End the session and close the connection
    ///
    /// Sends `end_session`, waits up to the configured grace period for the
    /// service to acknowledge, then disconnects either way. Does nothing when
    /// no connection is open.
    #[instrument(skip(self))]
    pub async fn end_session(&self) -> ScanResult<()> {
        let connection = self.shared.transport.state();
        if !connection.is_active() {
            debug!("End session ignored: not connected");
            return Ok(());
        }

        if connection.is_connected()
            && self
                .shared
                .transport
                .send(&OutboundMessage::EndSession {})
                .is_ok()
        {
            let grace = self.shared.timeouts.end_session_grace();
            if !self.shared.transport.wait_until_disconnected(grace).await {
                debug!("No session_ended within {:?}, disconnecting", grace);
            }
        }

        self.shared.transport.disconnect("session ended by client");
        {
            let mut state = self.shared.state.lock();
            state.end();
            self.shared.publish(&state);
        }
        info!("Scanning session ended");

        Ok(())
    }

    // =========================================================================
    // Waiting helpers
    // =========================================================================

    /// Wait for the service to acknowledge `start_scanning`
    ///
    /// Fails with the service's message if it answers with `error` instead.
    pub async fn wait_until_scanning(&self, timeout: Duration) -> ScanResult<()> {
        let mut rx = self.watch_status();
        let settled = tokio::time::timeout(
            timeout,
            rx.wait_for(|s| s.is_scanning || !s.connection.is_active() || s.last_error.is_some()),
        )
        .await
        .map(|waited| waited.map(|status| status.clone()));
        match settled {
            Err(_) => Err(ScanError::Timeout("scanning_started")),
            Ok(Err(_)) => Err(ScanError::ConnectionFailed("controller dropped".into())),
            Ok(Ok(status)) if status.is_scanning => Ok(()),
            Ok(Ok(status)) => Err(status
                .last_error
                .clone()
                .map(ScanError::Remote)
                .unwrap_or_else(|| ScanError::ConnectionFailed("connection closed".into()))),
        }
    }

    /// Wait for the result of frame `frame_id`
    ///
    /// Resolves with the result even when recognition failed; inspect
    /// `success`. Errors if the service reported an error for the frame or the
    /// connection closed first.
    pub async fn wait_for_result(
        &self,
        frame_id: u64,
        timeout: Duration,
    ) -> ScanResult<RecognitionResult> {
        let mut rx = self.watch_status();
        let settled = tokio::time::timeout(
            timeout,
            rx.wait_for(|s| s.pending_frame != Some(frame_id) || !s.is_connected),
        )
        .await
        .map(|waited| waited.map(|status| status.clone()));
        match settled {
            Err(_) => Err(ScanError::Timeout("frame_processed")),
            Ok(Err(_)) => Err(ScanError::ConnectionFailed("controller dropped".into())),
            Ok(Ok(status)) => match (&status.last_result, status.last_result_frame) {
                (Some(result), Some(id)) if id == frame_id => Ok(result.clone()),
                _ if !status.is_connected => {
                    Err(ScanError::ConnectionFailed("connection closed".into()))
                }
                _ => Err(ScanError::Remote(
                    status
                        .last_error
                        .clone()
                        .unwrap_or_else(|| "Frame was not processed".into()),
                )),
            },
        }
    }
}

impl std::fmt::Debug for ScanSessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanSessionController")
            .field("transport", &self.shared.transport)
            .field("context", &self.context())
            .finish()
    }
}

impl Shared {
    /// Log and surface a locally rejected request
    fn reject(&self, err: ScanError) -> ScanError {
        warn!("{}", err);
        self.notifier.notify(Notice::from(&err));
        err
    }

    fn publish(&self, state: &SessionState) {
        self.status
            .send_replace(state.snapshot(self.transport.state()));
    }

    fn publish_current(&self) {
        let state = self.state.lock();
        self.publish(&state);
    }

    fn handle(&self, message: &InboundMessage) {
        match message {
            InboundMessage::Connected {
                session_id,
                message,
            } => {
                info!(session_id = ?session_id, "Scanning service acknowledged connection");
                {
                    let mut state = self.state.lock();
                    state.session_id = session_id.clone();
                    self.publish(&state);
                }
                self.notifier.notify(Notice::info(
                    message
                        .clone()
                        .unwrap_or_else(|| "Connected to scanning service".into()),
                ));
            }

            InboundMessage::ScanningStarted {
                exam_id,
                template_id,
                message,
            } => {
                info!(exam_id = ?exam_id, template_id = ?template_id, "Scanning started");
                {
                    let mut state = self.state.lock();
                    state.scanning = true;
                    state.pending_frame = None;
                    state.last_error = None;
                    self.publish(&state);
                }
                self.notifier.notify(Notice::success(
                    message.clone().unwrap_or_else(|| "Scanning started".into()),
                ));
            }

            InboundMessage::FrameProcessed {
                success,
                message,
                data,
                frame_id,
            } => self.frame_processed(*success, message.as_deref(), data.as_ref(), *frame_id),

            InboundMessage::ResultSaved { success, message } => {
                let saved = SavedResult {
                    success: *success,
                    message: message.clone().unwrap_or_else(|| {
                        if *success {
                            "Result saved".into()
                        } else {
                            "Failed to save result".into()
                        }
                    }),
                };
                info!(success = saved.success, "{}", saved.message);

                if let Some(callback) = self.on_saved.get() {
                    callback(&saved);
                }
                let notice = if saved.success {
                    Notice::success(saved.message)
                } else {
                    Notice::error(saved.message)
                };
                self.notifier.notify(notice);
            }

            InboundMessage::SessionEnded { message } => {
                info!("Session ended by scanning service");
                {
                    let mut state = self.state.lock();
                    state.end();
                    self.publish(&state);
                }
                self.notifier.notify(Notice::info(
                    message
                        .clone()
                        .unwrap_or_else(|| "Scanning session ended".into()),
                ));
                self.transport.disconnect("session ended");
                self.publish_current();
            }

            InboundMessage::Error { message } => {
                let text = message
                    .clone()
                    .unwrap_or_else(|| "Scanning service reported an error".into());
                warn!("Scanning service error: {}", text);
                {
                    let mut state = self.state.lock();
                    state.pending_frame = None;
                    state.last_error = Some(text.clone());
                    self.publish(&state);
                }
                self.notifier.notify(Notice::error(text));
            }

            InboundMessage::AuthError { message } => {
                let text = message
                    .clone()
                    .unwrap_or_else(|| "Authentication failed".into());
                warn!("Authentication rejected: {}", text);
                {
                    let mut state = self.state.lock();
                    state.end();
                    state.last_error = Some(text.clone());
                }
                self.transport.disconnect("authentication rejected");
                self.publish_current();
                self.notifier.notify(Notice::error(text));
            }
        }
    }

    fn frame_processed(
        &self,
        success: bool,
        message: Option<&str>,
        data: Option<&RecognitionResult>,
        frame_id: Option<u64>,
    ) {
        let accepted = {
            let mut state = self.state.lock();
            // Only results for an older frame are stale; any other id resolves
            // the outstanding frame
            let stale = match (frame_id, state.pending_frame.as_ref()) {
                (Some(id), Some(pending)) => id < pending.frame_id,
                (Some(id), None) => state.last_result_frame.is_some_and(|last| id < last),
                _ => false,
            };

            if stale {
                debug!(frame_id = ?frame_id, "Ignoring result for a superseded frame");
                None
            } else {
                let resolved = state
                    .pending_frame
                    .take()
                    .map(|pending| pending.frame_id)
                    .or(frame_id);

                let mut result = data.cloned().unwrap_or_default();
                result.success = success;
                if result.message.is_none() {
                    result.message = message.map(str::to_string);
                }
                if result.timestamp.is_none() {
                    result.timestamp = Some(Utc::now());
                }

                state.last_result = Some(result.clone());
                state.last_result_frame = resolved;
                state.last_error = if success {
                    None
                } else {
                    Some(
                        message
                            .unwrap_or("Answer sheet not recognised")
                            .to_string(),
                    )
                };
                self.publish(&state);
                Some(result)
            }
        };

        let Some(result) = accepted else {
            return;
        };
        debug!(success, frame_id = ?frame_id, "Frame processed");

        if let Some(callback) = self.on_result.get() {
            callback(&result);
        }

        let notice = if success {
            Notice::success(message.map(str::to_string).unwrap_or_else(|| {
                match result.student_id.as_deref() {
                    Some(student) => format!("Sheet recognised for student {}", student),
                    None => "Sheet recognised".to_string(),
                }
            }))
        } else {
            Notice::error(message.unwrap_or("Answer sheet not recognised"))
        };
        self.notifier.notify(notice);
    }

    fn connection_lost(&self, reason: &DisconnectReason) {
        debug!("Connection lost: {}", reason);
        let mut state = self.state.lock();
        state.end();
        state.last_error = Some(reason.to_string());
        self.publish(&state);
    }
}

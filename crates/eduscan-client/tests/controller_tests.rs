//! Scanning workflow tests against a scripted WebSocket service
//!
//! Each test starts a `RecordingService`, drives a `ScanSessionController`
//! against it and checks both the controller state and exactly which
//! messages reached the service.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

use eduscan_client::testing::{standard_reply, wait_for, RecordingService, TestServer};
use eduscan_client::{
    ChannelNotifier, ConnectionState, EnvToken, InboundMessage, Notice, OutboundKind,
    OutboundMessage, RecognitionResult, ScanError, ScanSessionController, StaticToken,
};

const WAIT: Duration = Duration::from_secs(3);

// =============================================================================
// Helpers
// =============================================================================

struct Harness {
    service: RecordingService,
    _server: TestServer,
    controller: ScanSessionController,
    notices: UnboundedReceiver<Notice>,
}

async fn harness(service: RecordingService) -> Harness {
    let server = TestServer::start(service.router()).await.unwrap();
    let (notifier, notices) = ChannelNotifier::new();
    let controller = ScanSessionController::new(
        &server.scan_config("/ws/scan"),
        Arc::new(StaticToken::new("secret")),
        Arc::new(notifier),
    )
    .unwrap();

    Harness {
        service,
        _server: server,
        controller,
        notices,
    }
}

/// Harness with an acknowledged session for exam 42 / template 7
async fn scanning(service: RecordingService) -> Harness {
    let h = harness(service).await;
    h.controller.set_context(42, 7);
    h.controller.start_scanning().await.unwrap();
    h.controller.wait_until_scanning(WAIT).await.unwrap();
    h
}

/// Wait for a notice whose message matches exactly
async fn expect_notice(notices: &mut UnboundedReceiver<Notice>, message: &str) -> Notice {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, notices.recv()).await {
            Ok(Some(notice)) if notice.message == message => return notice,
            Ok(Some(_)) => continue,
            _ => panic!("notice {:?} never arrived", message),
        }
    }
}

const FRAME: &str = "data:image/jpeg;base64,/9j/4AAQSkZJRgABAQAAAQABAAA=";

// =============================================================================
// Starting a session
// =============================================================================

#[tokio::test]
async fn test_start_without_exam_sends_nothing() {
    let mut h = harness(RecordingService::standard()).await;
    h.controller.set_template(Some(7));

    let err = h.controller.start_scanning().await.unwrap_err();
    assert_eq!(err, ScanError::MissingContext("exam"));

    let notice = h.notices.try_recv().unwrap();
    assert!(notice.is_error());
    assert_eq!(h.service.connections(), 0);
    assert!(h.service.received().is_empty());
    assert_eq!(h.controller.transport().state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_start_without_template_sends_nothing() {
    let h = harness(RecordingService::standard()).await;
    h.controller.set_exam(Some(42));

    let err = h.controller.start_scanning().await.unwrap_err();
    assert_eq!(err, ScanError::MissingContext("template"));
    assert_eq!(h.service.connections(), 0);
}

#[tokio::test]
async fn test_start_scanning_sends_context_once() {
    let h = harness(RecordingService::standard()).await;
    h.controller.set_context(42, 7);

    h.controller.start_scanning().await.unwrap();
    h.controller.wait_until_scanning(WAIT).await.unwrap();

    assert!(h.controller.is_connected());
    assert!(h.controller.is_scanning());
    assert_eq!(h.service.count(OutboundKind::StartScanning), 1);
    assert_eq!(
        h.service.received()[0],
        OutboundMessage::StartScanning {
            exam_id: 42,
            template_id: 7
        }
    );
    assert_eq!(h.controller.status().session_id.as_deref(), Some("test-session"));
}

#[tokio::test]
async fn test_start_refused_by_service() {
    let service = RecordingService::new(|message| match message {
        OutboundMessage::StartScanning { .. } => vec![InboundMessage::error("Exam 42 is closed")],
        other => standard_reply(other),
    });
    let h = harness(service).await;
    h.controller.set_context(42, 7);

    h.controller.start_scanning().await.unwrap();
    let err = h.controller.wait_until_scanning(WAIT).await.unwrap_err();

    assert_eq!(err, ScanError::Remote("Exam 42 is closed".into()));
    assert!(!h.controller.is_scanning());
    assert!(h.controller.is_connected());
}

#[tokio::test]
async fn test_start_without_token_fails_locally() {
    let server = TestServer::start(RecordingService::standard().router())
        .await
        .unwrap();
    let (notifier, mut notices) = ChannelNotifier::new();
    let controller = ScanSessionController::new(
        &server.scan_config("/ws/scan"),
        Arc::new(EnvToken::new("EDUSCAN_TOKEN_THAT_IS_NEVER_SET")),
        Arc::new(notifier),
    )
    .unwrap();
    controller.set_context(1, 1);

    let err = controller.start_scanning().await.unwrap_err();
    assert_eq!(err, ScanError::MissingToken);
    assert!(notices.try_recv().unwrap().is_error());
}

#[tokio::test]
async fn test_handshake_rejection_is_auth_error() {
    let router = axum::Router::new().route(
        "/ws/scan",
        axum::routing::get(|| async { axum::http::StatusCode::UNAUTHORIZED }),
    );
    let server = TestServer::start(router).await.unwrap();
    let (notifier, _notices) = ChannelNotifier::new();
    let controller = ScanSessionController::new(
        &server.scan_config("/ws/scan"),
        Arc::new(StaticToken::new("expired")),
        Arc::new(notifier),
    )
    .unwrap();
    controller.set_context(42, 7);

    let err = controller.start_scanning().await.unwrap_err();
    assert!(matches!(err, ScanError::AuthRejected(_)), "got {:?}", err);
    assert_eq!(controller.transport().state(), ConnectionState::Disconnected);

    // A failed start leaves the controller restartable
    let err = controller.start_scanning().await.unwrap_err();
    assert!(matches!(err, ScanError::AuthRejected(_)));
}

#[tokio::test]
async fn test_auth_error_message_is_surfaced_verbatim() {
    let service = RecordingService::new(|_| Vec::new())
        .with_greeting(vec![InboundMessage::auth_error("Invalid token")]);
    let mut h = harness(service).await;
    h.controller.set_context(42, 7);

    // Whether start fails depends on how quickly the rejection lands
    let _ = h.controller.start_scanning().await;

    let notice = expect_notice(&mut h.notices, "Invalid token").await;
    assert!(notice.is_error());
    assert!(
        h.controller
            .transport()
            .wait_until_disconnected(WAIT)
            .await
    );
    assert!(!h.controller.is_scanning());
}

// =============================================================================
// Transport
// =============================================================================

#[tokio::test]
async fn test_connect_twice_is_noop() {
    let h = harness(RecordingService::standard()).await;
    let transport = h.controller.transport();

    transport.connect("secret").await.unwrap();
    let first = transport.connection_id();
    transport.connect("secret").await.unwrap();

    assert_eq!(transport.state(), ConnectionState::Connected);
    assert_eq!(transport.connection_id(), first);
    assert!(wait_for(|| async { h.service.connections() == 1 }, WAIT).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.service.connections(), 1);
}

#[tokio::test]
async fn test_disconnect_twice() {
    let h = harness(RecordingService::standard()).await;
    let transport = h.controller.transport();
    transport.connect("secret").await.unwrap();

    transport.disconnect("first");
    assert_eq!(transport.state(), ConnectionState::Disconnected);
    transport.disconnect("second");
    assert_eq!(transport.state(), ConnectionState::Disconnected);
    assert_eq!(transport.connection_id(), None);
}

#[tokio::test]
async fn test_remote_close_clears_session() {
    let service = RecordingService::new(|message| match message {
        OutboundMessage::CaptureFrame { .. } => Vec::new(),
        other => standard_reply(other),
    })
    .with_close_after(OutboundKind::CaptureFrame);
    let h = scanning(service).await;

    let frame_id = h.controller.capture_frame(FRAME).unwrap();
    let err = h
        .controller
        .wait_for_result(frame_id, WAIT)
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::ConnectionFailed(_)), "got {:?}", err);

    assert!(h.controller.transport().wait_until_disconnected(WAIT).await);
    let status = h.controller.status();
    assert!(!status.is_scanning);
    assert!(!status.is_processing);
}

// =============================================================================
// Capturing frames
// =============================================================================

#[tokio::test]
async fn test_capture_before_start_is_rejected() {
    let h = harness(RecordingService::standard()).await;
    h.controller.transport().connect("secret").await.unwrap();

    let err = h.controller.capture_frame(FRAME).unwrap_err();
    assert_eq!(err, ScanError::SessionNotStarted);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.service.count(OutboundKind::CaptureFrame), 0);
}

#[tokio::test]
async fn test_capture_while_disconnected_is_rejected() {
    let h = harness(RecordingService::standard()).await;
    assert_eq!(
        h.controller.capture_frame(FRAME).unwrap_err(),
        ScanError::SessionNotStarted
    );
    assert_eq!(h.service.connections(), 0);
}

#[tokio::test]
async fn test_capture_round_trip() {
    let h = scanning(RecordingService::standard().with_reply_delay(Duration::from_millis(200))).await;

    let frame_id = h.controller.capture_frame(FRAME).unwrap();
    assert_eq!(frame_id, 1);
    assert!(h.controller.is_processing());

    let result = h.controller.wait_for_result(frame_id, WAIT).await.unwrap();
    assert!(result.success);
    assert_eq!(result.student_id.as_deref(), Some("S-001"));
    assert!(result.timestamp.is_some());
    assert!(!h.controller.is_processing());
    assert!(h.controller.is_scanning());

    assert_eq!(h.service.count(OutboundKind::CaptureFrame), 1);
    assert_eq!(
        h.service.received()[1],
        OutboundMessage::CaptureFrame {
            frame: FRAME.to_string(),
            frame_id: 1
        }
    );
}

#[tokio::test]
async fn test_second_capture_while_in_flight_is_rejected() {
    let h = scanning(RecordingService::standard().with_reply_delay(Duration::from_millis(200))).await;

    let first = h.controller.capture_frame(FRAME).unwrap();
    assert_eq!(
        h.controller.capture_frame(FRAME).unwrap_err(),
        ScanError::FrameInFlight(first)
    );

    h.controller.wait_for_result(first, WAIT).await.unwrap();
    let second = h.controller.capture_frame(FRAME).unwrap();
    assert_eq!(second, first + 1);
    h.controller.wait_for_result(second, WAIT).await.unwrap();
    assert_eq!(h.service.count(OutboundKind::CaptureFrame), 2);
}

#[tokio::test]
async fn test_failed_recognition_clears_processing() {
    let service = RecordingService::new(|message| match message {
        OutboundMessage::CaptureFrame { frame_id, .. } => vec![InboundMessage::FrameProcessed {
            success: false,
            message: Some("No answer sheet detected".into()),
            data: None,
            frame_id: Some(*frame_id),
        }],
        other => standard_reply(other),
    });
    let mut h = scanning(service).await;

    let frame_id = h.controller.capture_frame(FRAME).unwrap();
    let result = h.controller.wait_for_result(frame_id, WAIT).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.message.as_deref(), Some("No answer sheet detected"));
    assert!(!h.controller.is_processing());
    assert!(h.controller.is_scanning());
    expect_notice(&mut h.notices, "No answer sheet detected").await;
}

#[tokio::test]
async fn test_stale_result_is_ignored() {
    let service = RecordingService::new(|message| match message {
        OutboundMessage::CaptureFrame { frame_id, .. } => vec![
            InboundMessage::FrameProcessed {
                success: true,
                message: None,
                data: Some(RecognitionResult {
                    success: true,
                    student_id: Some("S-STALE".into()),
                    ..Default::default()
                }),
                frame_id: Some(frame_id - 1),
            },
            standard_reply(message).remove(0),
        ],
        other => standard_reply(other),
    });
    let h = scanning(service).await;

    let callbacks = Arc::new(AtomicUsize::new(0));
    let c = callbacks.clone();
    h.controller.set_result_callback(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });

    let frame_id = h.controller.capture_frame(FRAME).unwrap();
    let result = h.controller.wait_for_result(frame_id, WAIT).await.unwrap();

    assert_eq!(result.student_id.as_deref(), Some("S-001"));
    assert_eq!(
        h.controller.last_result().unwrap().student_id.as_deref(),
        Some("S-001")
    );
    assert!(wait_for(|| async { callbacks.load(Ordering::SeqCst) == 1 }, WAIT).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(callbacks.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unexpected_frame_id_resolves_pending_frame() {
    let service = RecordingService::new(|message| match message {
        OutboundMessage::CaptureFrame { frame_id, .. } => vec![InboundMessage::FrameProcessed {
            success: true,
            message: None,
            data: Some(RecognitionResult {
                success: true,
                student_id: Some("S-NEXT".into()),
                ..Default::default()
            }),
            frame_id: Some(frame_id + 1),
        }],
        other => standard_reply(other),
    });
    let h = scanning(service).await;

    let frame_id = h.controller.capture_frame(FRAME).unwrap();
    let result = h.controller.wait_for_result(frame_id, WAIT).await.unwrap();

    assert_eq!(result.student_id.as_deref(), Some("S-NEXT"));
    assert!(!h.controller.is_processing());
    assert_eq!(h.controller.status().last_result_frame, Some(frame_id));

    let next = h.controller.capture_frame(FRAME).unwrap();
    assert_eq!(next, frame_id + 1);
    h.controller.wait_for_result(next, WAIT).await.unwrap();
    assert_eq!(h.service.count(OutboundKind::CaptureFrame), 2);
}

#[tokio::test]
async fn test_remote_error_keeps_session_open() {
    let service = RecordingService::new(|message| match message {
        OutboundMessage::CaptureFrame { .. } => vec![InboundMessage::error("Sheet is upside down")],
        other => standard_reply(other),
    });
    let h = scanning(service).await;

    let frame_id = h.controller.capture_frame(FRAME).unwrap();
    let err = h
        .controller
        .wait_for_result(frame_id, WAIT)
        .await
        .unwrap_err();
    assert_eq!(err, ScanError::Remote("Sheet is upside down".into()));

    assert!(h.controller.is_scanning());
    assert!(!h.controller.is_processing());
    assert!(h.controller.is_connected());

    // The user can retry without restarting the session
    assert_eq!(h.controller.capture_frame(FRAME).unwrap(), frame_id + 1);
}

// =============================================================================
// Saving
// =============================================================================

#[tokio::test]
async fn test_save_without_result_is_rejected() {
    let h = scanning(RecordingService::standard()).await;

    assert_eq!(
        h.controller.save_result(None).unwrap_err(),
        ScanError::NoResult
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.service.count(OutboundKind::SaveResult), 0);
}

#[tokio::test]
async fn test_save_last_result() {
    let h = scanning(RecordingService::standard()).await;
    let (saved_tx, mut saved_rx) = tokio::sync::mpsc::unbounded_channel();
    h.controller.set_saved_callback(move |saved| {
        let _ = saved_tx.send(saved.clone());
    });

    let frame_id = h.controller.capture_frame(FRAME).unwrap();
    h.controller.wait_for_result(frame_id, WAIT).await.unwrap();
    h.controller.save_result(None).unwrap();

    let saved = tokio::time::timeout(WAIT, saved_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(saved.success);
    assert_eq!(saved.message, "Result saved");
    assert!(h.controller.is_scanning());

    match &h.service.received()[2] {
        OutboundMessage::SaveResult { result } => {
            assert_eq!(result.student_id.as_deref(), Some("S-001"))
        }
        other => panic!("unexpected message: {:?}", other),
    }
}

// =============================================================================
// Ending a session
// =============================================================================

#[tokio::test]
async fn test_end_session_when_disconnected_is_noop() {
    let h = harness(RecordingService::standard()).await;

    h.controller.end_session().await.unwrap();
    h.controller.end_session().await.unwrap();

    assert_eq!(h.service.connections(), 0);
    assert!(h.service.received().is_empty());
}

#[tokio::test]
async fn test_end_session() {
    let h = scanning(RecordingService::standard()).await;

    h.controller.end_session().await.unwrap();

    assert_eq!(h.controller.transport().state(), ConnectionState::Disconnected);
    assert!(!h.controller.is_scanning());
    assert!(wait_for(
        || async { h.service.count(OutboundKind::EndSession) == 1 },
        WAIT
    )
    .await);
}

#[tokio::test]
async fn test_end_session_without_ack_still_disconnects() {
    let service = RecordingService::new(|message| match message {
        OutboundMessage::EndSession {} => Vec::new(),
        other => standard_reply(other),
    });
    let h = scanning(service).await;

    let started = tokio::time::Instant::now();
    h.controller.end_session().await.unwrap();

    // scan_config() uses a 500ms grace period
    assert!(started.elapsed() >= Duration::from_millis(450));
    assert_eq!(h.controller.transport().state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_session_ended_by_service() {
    let service = RecordingService::new(|message| match message {
        OutboundMessage::StartScanning { .. } => {
            let mut replies = standard_reply(message);
            replies.push(InboundMessage::SessionEnded {
                message: Some("Exam closed".into()),
            });
            replies
        }
        other => standard_reply(other),
    });
    let mut h = harness(service).await;
    h.controller.set_context(42, 7);
    h.controller.start_scanning().await.unwrap();

    expect_notice(&mut h.notices, "Exam closed").await;
    assert!(h.controller.transport().wait_until_disconnected(WAIT).await);

    let status = h.controller.status();
    assert!(!status.is_scanning);
    assert!(!status.is_processing);

    // Restartable afterwards
    h.controller.start_scanning().await.unwrap();
    assert!(wait_for(|| async { h.service.connections() == 2 }, WAIT).await);
}

#[tokio::test]
async fn test_session_ended_clears_frame_in_flight() {
    let service = RecordingService::new(|message| match message {
        OutboundMessage::CaptureFrame { .. } => vec![InboundMessage::SessionEnded {
            message: Some("Exam closed".into()),
        }],
        other => standard_reply(other),
    })
    .with_greeting(vec![InboundMessage::Connected {
        session_id: Some("test-session".into()),
        message: None,
    }])
    .with_reply_delay(Duration::from_millis(200));
    let mut h = scanning(service).await;

    let frame_id = h.controller.capture_frame(FRAME).unwrap();
    assert!(h.controller.is_processing());

    assert!(h.controller.wait_for_result(frame_id, WAIT).await.is_err());
    expect_notice(&mut h.notices, "Exam closed").await;
    assert!(h.controller.transport().wait_until_disconnected(WAIT).await);

    let status = h.controller.status();
    assert!(!status.is_scanning);
    assert!(!status.is_processing);
    assert_eq!(status.pending_frame, None);
    assert_eq!(h.controller.last_result(), None);
}

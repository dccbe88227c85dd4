//! HTTP and WebSocket handlers

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{debug, info, warn};

use eduscan_core::{InboundMessage, OutboundMessage};

use crate::config::RejectMode;
use crate::session::{Reply, ScanSession};
use crate::state::{MockState, SavedRecord};

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub sessions: u64,
    pub saved_results: usize,
}

/// GET /health
pub async fn health(State(state): State<MockState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sessions: state.session_count(),
        saved_results: state.saved().len(),
    })
}

/// GET /results
pub async fn list_results(State(state): State<MockState>) -> Json<Vec<SavedRecord>> {
    Json(state.saved())
}

/// GET /ws/scan
pub async fn scan_socket(
    State(state): State<MockState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let authorized = bearer_token(&headers)
        .map(|token| state.is_authorized(token))
        .unwrap_or(false);

    if !authorized && state.config().reject_mode == RejectMode::Handshake {
        warn!("Rejecting scan connection at handshake: invalid token");
        return (StatusCode::UNAUTHORIZED, "Invalid token").into_response();
    }

    ws.on_upgrade(move |socket| async move {
        if authorized {
            serve(socket, state).await;
        } else {
            reject(socket).await;
        }
    })
}

/// Extract the token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
        Some(token.trim())
    } else {
        None
    }
}

async fn reject(mut socket: WebSocket) {
    warn!("Rejecting scan connection: invalid token");
    let _ = send(&mut socket, &InboundMessage::auth_error("Invalid token")).await;
    let _ = socket.send(Message::Close(None)).await;
}

async fn serve(mut socket: WebSocket, state: MockState) {
    let mut session = ScanSession::new(state);
    info!(session = %session.id(), "Scan connection accepted");

    if !send(&mut socket, &session.greeting()).await {
        return;
    }

    while let Some(frame) = socket.recv().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(session = %session.id(), "Socket error: {}", e);
                break;
            }
        };

        let reply = match OutboundMessage::decode(text.as_str()) {
            Ok(message) => {
                debug!(session = %session.id(), event = %message.kind(), "Received message");
                session.handle(message)
            }
            Err(e) => {
                warn!(session = %session.id(), "Undecodable message: {}", e);
                let mut reply = Reply::default();
                reply
                    .messages
                    .push(InboundMessage::error(format!("Invalid message: {}", e)));
                reply
            }
        };

        for message in &reply.messages {
            if !send(&mut socket, message).await {
                return;
            }
        }
        if reply.close {
            let _ = socket.send(Message::Close(None)).await;
            break;
        }
    }

    info!(session = %session.id(), "Scan connection closed");
}

async fn send(socket: &mut WebSocket, message: &InboundMessage) -> bool {
    match message.encode() {
        Ok(text) => socket.send(Message::Text(text.into())).await.is_ok(),
        Err(e) => {
            warn!("Failed to encode {}: {}", message.kind(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use rstest::rstest;

    #[rstest]
    #[case("Bearer dev-token", Some("dev-token"))]
    #[case("bearer dev-token", Some("dev-token"))]
    #[case("Basic dev-token", None)]
    #[case("Bearer ", None)]
    #[case("dev-token", None)]
    fn test_bearer_token(#[case] value: &str, #[case] expected: Option<&str>) {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        assert_eq!(bearer_token(&headers), expected);
    }

    #[test]
    fn test_missing_header() {
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}

use std::time::Duration;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parterre_domain::RequestState;
use parterre_queue::{Notification, NotificationKind, RequestRecord};
use serde_json::json;
use tokio::time::Instant;
use tracing::debug;

use crate::auth::CurrentUser;
use crate::error::AppError;
use crate::state::AppState;

type WsSender = SplitSink<WebSocket, Message>;
type WsReceiver = SplitStream<WebSocket>;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v2/ws/reservation/:request_id", get(reservation_updates))
        .route("/v2/ws/user/:user_id", get(user_updates))
}

/// Live updates for one queued request: current snapshot on open, then
/// every notification until a terminal message or idle timeout.
async fn reservation_updates(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(request_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    Ok(ws.on_upgrade(move |socket| reservation_socket(state, socket, request_id)))
}

async fn user_updates(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(user_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    if caller != user_id {
        return Err(AppError::Forbidden("cannot follow another user's updates".to_string()));
    }
    Ok(ws.on_upgrade(move |socket| user_socket(state, socket, user_id)))
}

async fn reservation_socket(state: AppState, socket: WebSocket, request_id: String) {
    let (mut sender, mut receiver) = socket.split();

    // Current snapshot first, so a late subscriber still sees where the
    // request stands.
    if let Ok(Some(record)) = state.queue.snapshot(&request_id).await {
        let terminal = record.state.is_terminal();
        if send_snapshot(&mut sender, &record).await.is_err() {
            return;
        }
        if terminal {
            let _ = sender.send(close_frame(1000, "request settled")).await;
            return;
        }
    }

    let (handle, mut updates) = state.hub.subscribe_request(&request_id);
    let idle_limit = Duration::from_secs(state.settings.connection_idle_timeout_seconds);
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(notification) => {
                    let terminal = is_terminal_kind(notification.kind);
                    if send_notification(&mut sender, &notification).await.is_err() {
                        break;
                    }
                    if terminal {
                        let _ = sender.send(close_frame(1000, "request settled")).await;
                        break;
                    }
                }
                None => {
                    // The hub dropped us for falling behind.
                    let _ = sender.send(close_frame(1008, "SlowConsumer")).await;
                    break;
                }
            },
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(message)) => {
                        last_activity = Instant::now();
                        if handle_client_message(&mut sender, message).await.is_err() {
                            break;
                        }
                    }
                    _ => break,
                }
            }
            () = tokio::time::sleep_until(last_activity + idle_limit) => {
                debug!(%request_id, "closing idle reservation socket");
                let _ = sender.send(close_frame(1000, "idle timeout")).await;
                break;
            }
        }
    }

    handle.cancel();
}

/// All updates for one user's requests. Stays open across requests; closes
/// on idle timeout or disconnect.
async fn user_socket(state: AppState, socket: WebSocket, user_id: String) {
    let (mut sender, mut receiver) = socket.split();

    let (handle, mut updates) = state.hub.subscribe_user(&user_id);
    let idle_limit = Duration::from_secs(state.settings.connection_idle_timeout_seconds);
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(notification) => {
                    if send_notification(&mut sender, &notification).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = sender.send(close_frame(1008, "SlowConsumer")).await;
                    break;
                }
            },
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(message)) => {
                        last_activity = Instant::now();
                        if handle_client_message(&mut sender, message).await.is_err() {
                            break;
                        }
                    }
                    _ => break,
                }
            }
            () = tokio::time::sleep_until(last_activity + idle_limit) => {
                debug!(%user_id, "closing idle user socket");
                let _ = sender.send(close_frame(1000, "idle timeout")).await;
                break;
            }
        }
    }

    handle.cancel();
}

async fn send_snapshot(sender: &mut WsSender, record: &RequestRecord) -> Result<(), axum::Error> {
    let notification = Notification {
        kind: kind_for_state(record.state),
        request_id: record.request_id.clone(),
        user_id: record.user_id.clone(),
        data: serde_json::to_value(record).unwrap_or_default(),
    };
    send_notification(sender, &notification).await
}

async fn send_notification(sender: &mut WsSender, notification: &Notification) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(notification).unwrap_or_default();
    sender.send(Message::Text(payload)).await
}

async fn handle_client_message(sender: &mut WsSender, message: Message) -> Result<(), axum::Error> {
    match message {
        Message::Text(text) => {
            let is_ping = serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(|t| t == "ping"))
                .unwrap_or(false);
            if is_ping {
                let pong = json!({ "type": "pong", "timestamp": chrono::Utc::now().to_rfc3339() });
                sender.send(Message::Text(pong.to_string())).await?;
            }
            Ok(())
        }
        Message::Close(_) => Err(axum::Error::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionAborted,
            "client closed",
        ))),
        // Protocol pings are answered by the transport layer.
        _ => Ok(()),
    }
}

fn close_frame(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame { code, reason: reason.into() }))
}

fn kind_for_state(state: RequestState) -> NotificationKind {
    match state {
        RequestState::Completed => NotificationKind::ReservationComplete,
        RequestState::Failed | RequestState::Expired => NotificationKind::ReservationFailed,
        RequestState::Cancelled => NotificationKind::ReservationCancelled,
        RequestState::Pending | RequestState::Processing => NotificationKind::StatusUpdate,
    }
}

fn is_terminal_kind(kind: NotificationKind) -> bool {
    !matches!(kind, NotificationKind::StatusUpdate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_kind_tracks_request_state() {
        assert_eq!(kind_for_state(RequestState::Pending), NotificationKind::StatusUpdate);
        assert_eq!(kind_for_state(RequestState::Completed), NotificationKind::ReservationComplete);
        assert_eq!(kind_for_state(RequestState::Cancelled), NotificationKind::ReservationCancelled);
        assert_eq!(kind_for_state(RequestState::Expired), NotificationKind::ReservationFailed);
    }

    #[test]
    fn test_terminal_kinds_close_the_socket() {
        assert!(!is_terminal_kind(NotificationKind::StatusUpdate));
        assert!(is_terminal_kind(NotificationKind::ReservationComplete));
        assert!(is_terminal_kind(NotificationKind::ReservationFailed));
        assert!(is_terminal_kind(NotificationKind::ReservationCancelled));
    }
}

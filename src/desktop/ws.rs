use axum::{
    body::Bytes,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::ai::{AiResponse, CommandInterpretation};
use super::api::SharedState;
use super::auth::AuthUser;
use super::models::*;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

const PROCESS_FAILED: &str = "Failed to process request";

// ── WebSocket message types ──────────────────────────────────────────

/// Requests sent by the desktop client.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    TerminalCommand {
        command: String,
        #[serde(default, rename = "currentDirectory")]
        current_directory: Option<String>,
    },
    SystemMetrics,
    AiChat {
        message: String,
    },
}

/// Replies to client requests plus per-user change notifications.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    TerminalResponse {
        interpretation: CommandInterpretation,
    },
    MetricsUpdate {
        metrics: MetricsSnapshot,
    },
    AiResponse {
        response: AiResponse,
    },
    Error {
        message: String,
    },

    FileCreated {
        file: FileNode,
    },
    FileUpdated {
        file: FileNode,
    },
    FileDeleted {
        id: i64,
    },
    ChatMessageCreated {
        message: ChatMessage,
    },
    MetricRecorded {
        metric: SystemMetric,
    },
}

impl ServerMessage {
    fn error() -> Self {
        Self::Error {
            message: PROCESS_FAILED.to_string(),
        }
    }
}

/// A serialized `ServerMessage` addressed to one user's sockets.
#[derive(Debug, Clone)]
pub struct UserEvent {
    pub user_id: String,
    pub payload: String,
}

// ── Broadcast helper ─────────────────────────────────────────────────

/// Serialize and publish a message to every socket of `user_id`.
/// Returns silently even if no clients are connected.
pub fn publish(tx: &broadcast::Sender<UserEvent>, user_id: &str, msg: &ServerMessage) {
    match serde_json::to_string(msg) {
        Ok(payload) => {
            let _ = tx.send(UserEvent {
                user_id: user_id.to_string(),
                payload,
            });
        }
        Err(e) => {
            error!(error = %e, "Failed to serialize ServerMessage");
        }
    }
}

// ── Request dispatch ─────────────────────────────────────────────────

/// Handle one text frame from the client and produce the reply.
pub async fn handle_client_message(state: &SharedState, user: &AuthUser, text: &str) -> ServerMessage {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(error = %e, "Unparseable WebSocket message");
            return ServerMessage::error();
        }
    };

    match msg {
        ClientMessage::TerminalCommand {
            command,
            current_directory,
        } => {
            let cwd = match current_directory {
                Some(dir) => dir,
                None => {
                    let user_id = user.id.clone();
                    match state
                        .db
                        .call(move |db| db.latest_terminal_session(&user_id))
                        .await
                    {
                        Ok(session) => session
                            .map(|s| s.current_directory)
                            .unwrap_or_else(|| DEFAULT_TERMINAL_DIRECTORY.to_string()),
                        Err(e) => {
                            error!(error = %e, "Failed to load terminal session");
                            return ServerMessage::error();
                        }
                    }
                }
            };
            let interpretation = state.ai.interpret_command(&command, &cwd).await;
            ServerMessage::TerminalResponse { interpretation }
        }
        ClientMessage::SystemMetrics => {
            let state = state.clone();
            match tokio::task::spawn_blocking(move || state.sampler.sample()).await {
                Ok(Ok(metrics)) => ServerMessage::MetricsUpdate { metrics },
                Ok(Err(e)) => {
                    error!(error = %e, "Failed to sample system metrics");
                    ServerMessage::error()
                }
                Err(e) => {
                    error!(error = %e, "Metrics task panicked");
                    ServerMessage::error()
                }
            }
        }
        ClientMessage::AiChat { message } => {
            let response = state.ai.chat_response(&message, &[]).await;
            ServerMessage::AiResponse { response }
        }
    }
}

// ── WebSocket handler ────────────────────────────────────────────────

/// Identity is extracted before the upgrade so unauthenticated clients get 401.
pub async fn ws_handler(
    user: AuthUser,
    State(state): State<SharedState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, user))
}

async fn handle_socket(socket: WebSocket, state: SharedState, user: AuthUser) {
    debug!(user_id = %user.id, "WebSocket connected");
    let (sender, receiver) = socket.split();
    let rx = state.events.subscribe();
    run_socket_loop(sender, receiver, rx, &state, &user).await;
    debug!(user_id = %user.id, "WebSocket closed");
}

async fn send_json<W>(sender: &mut W, msg: &ServerMessage) -> bool
where
    W: Sink<Message> + Unpin,
{
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            error!(error = %e, "Failed to serialize ServerMessage");
            true
        }
    }
}

fn is_addressed_to(event: &UserEvent, user: &AuthUser) -> bool {
    event.user_id == user.id
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Combines user event forwarding, client request handling, and periodic
/// ping/pong health checking into a single select loop. If no Pong is
/// received within [`PONG_TIMEOUT`] after a Ping is sent, the connection
/// is considered dead and the loop exits.
async fn run_socket_loop<W, R, E>(
    mut sender: W,
    mut receiver: R,
    mut rx: broadcast::Receiver<UserEvent>,
    state: &SharedState,
    user: &AuthUser,
) where
    W: Sink<Message> + Unpin,
    R: Stream<Item = Result<Message, E>> + Unpin,
{
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately; consume it so the first real
    // ping fires after PING_INTERVAL has elapsed.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    debug!(user_id = %user.id, "Pong timeout, dropping WebSocket");
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match result {
                    Ok(event) if is_addressed_to(&event, user) => {
                        if sender.send(Message::Text(event.payload.into())).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(user_id = %user.id, skipped, "WebSocket lagged behind events");
                        continue;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_client_message(state, user, text.as_str()).await;
                        if !send_json(&mut sender, &reply).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    // Best-effort close frame
    let _ = sender.send(Message::Close(None)).await;
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desktop::api::tests::test_state;
    use crate::desktop::ai::AiService;
    use crate::desktop::ai::tests::StubBackend;
    use futures::channel::mpsc;

    fn user(id: &str) -> AuthUser {
        AuthUser {
            id: id.to_string(),
            email: None,
            first_name: None,
            last_name: None,
            profile_image_url: None,
        }
    }

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"terminal_command","command":"ls"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::TerminalCommand {
                command: "ls".into(),
                current_directory: None
            }
        );
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"system_metrics"}"#).unwrap();
        assert_eq!(msg, ClientMessage::SystemMetrics);
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"reboot"}"#).is_err());
    }

    #[test]
    fn test_server_message_shapes() {
        let json = serde_json::to_value(ServerMessage::MetricsUpdate {
            metrics: MetricsSnapshot {
                cpu: 1,
                memory: 2,
                neural: 3,
            },
        })
        .unwrap();
        assert_eq!(json["type"], "metrics_update");
        assert_eq!(json["metrics"]["neural"], 3);

        let json = serde_json::to_value(ServerMessage::error()).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["message"], "Failed to process request");

        let json = serde_json::to_value(ServerMessage::FileDeleted { id: 4 }).unwrap();
        assert_eq!(json["type"], "file_deleted");
        assert_eq!(json["id"], 4);
    }

    #[test]
    fn test_publish_tags_user() {
        let (tx, mut rx) = broadcast::channel(4);
        publish(&tx, "u1", &ServerMessage::FileDeleted { id: 9 });
        let event = rx.try_recv().unwrap();
        assert_eq!(event.user_id, "u1");
        assert!(event.payload.contains("\"file_deleted\""));
    }

    #[test]
    fn test_publish_without_receivers_is_silent() {
        let (tx, rx) = broadcast::channel::<UserEvent>(4);
        drop(rx);
        publish(&tx, "u1", &ServerMessage::FileDeleted { id: 1 });
    }

    #[tokio::test]
    async fn test_handle_invalid_json_returns_error() {
        let state = test_state(AiService::disabled());
        let reply = handle_client_message(&state, &user("u1"), "{not json").await;
        assert!(matches!(reply, ServerMessage::Error { ref message } if message == PROCESS_FAILED));
    }

    #[tokio::test]
    async fn test_handle_terminal_command_uses_session_directory() {
        let backend = std::sync::Arc::new(StubBackend::replying(r#"{"bashCommand":"ls"}"#));
        let state = test_state(AiService::new(backend.clone()));
        state
            .db
            .call(|db| {
                db.ensure_user("u1")?;
                db.create_terminal_session("u1", "/home/Pictures")
            })
            .await
            .unwrap();

        let reply = handle_client_message(
            &state,
            &user("u1"),
            r#"{"type":"terminal_command","command":"show pictures"}"#,
        )
        .await;
        match reply {
            ServerMessage::TerminalResponse { interpretation } => {
                assert_eq!(interpretation.bash_command, "ls");
            }
            other => panic!("unexpected reply: {:?}", other),
        }
        let last = backend.last.lock().unwrap().clone().expect("request");
        assert!(last.messages[0].content.contains("/home/Pictures"));
    }

    #[tokio::test]
    async fn test_handle_system_metrics() {
        let state = test_state(AiService::disabled());
        let reply = handle_client_message(&state, &user("u1"), r#"{"type":"system_metrics"}"#).await;
        match reply {
            ServerMessage::MetricsUpdate { metrics } => assert!(metrics.cpu <= 100),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handle_ai_chat_falls_back_when_disabled() {
        let state = test_state(AiService::disabled());
        let reply =
            handle_client_message(&state, &user("u1"), r#"{"type":"ai_chat","message":"hi"}"#).await;
        match reply {
            ServerMessage::AiResponse { response } => {
                assert_eq!(response.metadata.get("error"), Some(&serde_json::Value::Bool(true)));
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    type Inbound = Result<Message, axum::Error>;

    fn spawn_loop(
        state: SharedState,
        user: AuthUser,
    ) -> (
        mpsc::UnboundedSender<Inbound>,
        mpsc::UnboundedReceiver<Message>,
        tokio::task::JoinHandle<()>,
    ) {
        let (out_tx, out_rx) = mpsc::unbounded::<Message>();
        let (in_tx, in_rx) = mpsc::unbounded::<Inbound>();
        let rx = state.events.subscribe();
        let handle = tokio::spawn(async move {
            run_socket_loop(out_tx, in_rx, rx, &state, &user).await;
        });
        (in_tx, out_rx, handle)
    }

    #[tokio::test]
    async fn test_socket_forwards_only_own_events() {
        let state = test_state(AiService::disabled());
        let (in_tx, mut out_rx, handle) = spawn_loop(state.clone(), user("bob"));

        publish(&state.events, "alice", &ServerMessage::FileDeleted { id: 1 });
        publish(&state.events, "bob", &ServerMessage::FileDeleted { id: 2 });

        match out_rx.next().await {
            Some(Message::Text(text)) => {
                let json: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                assert_eq!(json["id"], 2);
            }
            other => panic!("unexpected frame: {:?}", other),
        }

        drop(in_tx);
        handle.await.unwrap();
        assert!(matches!(out_rx.next().await, Some(Message::Close(None))));
        assert!(out_rx.next().await.is_none());
    }

    #[tokio::test]
    async fn test_socket_answers_client_requests() {
        let state = test_state(AiService::disabled());
        let (in_tx, mut out_rx, handle) = spawn_loop(state, user("u1"));

        in_tx
            .unbounded_send(Ok(Message::Text(r#"{"type":"ai_chat","message":"hi"}"#.into())))
            .unwrap();
        match out_rx.next().await {
            Some(Message::Text(text)) => assert!(text.as_str().contains("\"ai_response\"")),
            other => panic!("unexpected frame: {:?}", other),
        }

        in_tx.unbounded_send(Ok(Message::Close(None))).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_socket_dropped_after_pong_timeout() {
        let state = test_state(AiService::disabled());
        let started = Instant::now();
        let (_in_tx, mut out_rx, handle) = spawn_loop(state, user("u1"));

        // Pings at 30 s and 60 s go unanswered; the 90 s tick gives up.
        assert!(matches!(out_rx.next().await, Some(Message::Ping(_))));
        assert!(matches!(out_rx.next().await, Some(Message::Ping(_))));
        assert!(matches!(out_rx.next().await, Some(Message::Close(None))));
        handle.await.unwrap();

        let elapsed = started.elapsed();
        assert!(elapsed > PONG_TIMEOUT);
        assert!(elapsed < PONG_TIMEOUT + PING_INTERVAL * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_keeps_socket_open() {
        let state = test_state(AiService::disabled());
        let (in_tx, mut out_rx, handle) = spawn_loop(state, user("u1"));

        for _ in 0..4 {
            assert!(matches!(out_rx.next().await, Some(Message::Ping(_))));
            in_tx
                .unbounded_send(Ok(Message::Pong(Bytes::new())))
                .unwrap();
        }
        assert!(!handle.is_finished());

        drop(in_tx);
        handle.await.unwrap();
    }
}

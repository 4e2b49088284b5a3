use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use quest_types::events::{ReadReceipt, RealtimeCommand, RealtimeEvent, extra_to_string};
use quest_types::models::ContentType;

use crate::Gateway;
use crate::blocking::run_blocking;

/// Server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const MAX_MISSED_PONGS: u8 = 2;

/// Closes an unauthenticated socket with 1008 before it is registered.
pub async fn reject(mut socket: WebSocket) {
    let frame = CloseFrame {
        code: close_code::POLICY,
        reason: "authentication required".into(),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        debug!("Failed to send policy close: {}", e);
    }
}

/// Runs an authenticated connection until either side goes away.
pub async fn handle_connection(socket: WebSocket, gateway: Gateway, user_id: i64, username: String) {
    let (mut sender, mut receiver) = socket.split();
    let (conn_id, mut outbound) = gateway.registry.register(user_id).await;

    info!(
        "{} ({}) connected to realtime gateway ({} live connections)",
        username,
        user_id,
        gateway.registry.connection_count(user_id).await
    );

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received;

    // Outbound events and heartbeat -> client
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_pongs: u8 = 0;

        loop {
            tokio::select! {
                event = outbound.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode realtime event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_pongs = 0;
                    } else {
                        missed_pongs += 1;
                        if missed_pongs >= MAX_MISSED_PONGS {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_pongs);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Client frames -> core
    let recv_gateway = gateway.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    recv_gateway.handle_text(user_id, conn_id, text.as_str()).await;
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    gateway.registry.unregister(user_id, conn_id).await;
    info!(
        "{} ({}) disconnected from realtime gateway ({} left)",
        username,
        user_id,
        gateway.registry.connection_count(user_id).await
    );
}

impl Gateway {
    /// Handles one text frame from `conn_id`. Replies go to that connection
    /// only; chat messages are also delivered to the receiver's connections.
    pub async fn handle_text(&self, user_id: i64, conn_id: Uuid, text: &str) {
        let value = match serde_json::from_str::<serde_json::Value>(text) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    "User {} sent a frame that is not JSON: {} -- raw: {}",
                    user_id,
                    e,
                    text.chars().take(200).collect::<String>()
                );
                return;
            }
        };

        let cmd = match RealtimeCommand::deserialize(&value) {
            Ok(cmd) => cmd,
            Err(e) => {
                let frame_type = value.get("type").and_then(serde_json::Value::as_str);
                if matches!(frame_type, Some("chat" | "read")) {
                    debug!("User {} sent a malformed {:?} frame: {}", user_id, frame_type, e);
                    return self
                        .reply_error(user_id, conn_id, &format!("malformed frame: {}", e))
                        .await;
                }
                warn!("User {} sent a bad frame: {}", user_id, e);
                return;
            }
        };

        let reply = match cmd {
            RealtimeCommand::Chat {
                receiver_id,
                content_type,
                content,
                extra,
            } => {
                let Some(receiver_id) = receiver_id else {
                    return self.reply_error(user_id, conn_id, "receiverId is required").await;
                };
                let content = content.unwrap_or_default();
                if content.trim().is_empty() {
                    return self.reply_error(user_id, conn_id, "content is required").await;
                }
                let Some(content_type) = ContentType::from_code(content_type.unwrap_or(0)) else {
                    return self.reply_error(user_id, conn_id, "unknown contentType").await;
                };
                let extra = extra_to_string(extra);

                let chat = self.chat.clone();
                let sent = run_blocking(self.storage_timeout, move || {
                    chat.send_message(user_id, receiver_id, content_type, &content, extra.as_deref())
                })
                .await;

                match sent {
                    Ok(message) => {
                        self.registry
                            .send_to_connection(user_id, conn_id, RealtimeEvent::ChatAck {
                                message: message.clone(),
                            })
                            .await;
                        let reached = self
                            .registry
                            .deliver(receiver_id, RealtimeEvent::Chat { message })
                            .await;
                        debug!("Chat from {} reached {} connections of {}", user_id, reached, receiver_id);
                        return;
                    }
                    Err(e) => RealtimeEvent::Error {
                        error: e.user_message(),
                    },
                }
            }

            RealtimeCommand::Read { session_id } => {
                let Some(session_id) = session_id else {
                    return self.reply_error(user_id, conn_id, "sessionId is required").await;
                };

                let chat = self.chat.clone();
                match run_blocking(self.storage_timeout, move || chat.mark_read(session_id, user_id)).await {
                    Ok(_) => RealtimeEvent::ReadAck {
                        message: ReadReceipt {
                            session_id,
                            sender_id: user_id,
                            created_at: chrono::Utc::now(),
                        },
                    },
                    Err(e) => RealtimeEvent::Error {
                        error: e.user_message(),
                    },
                }
            }

            RealtimeCommand::Ping => RealtimeEvent::Pong,

            RealtimeCommand::Unknown => {
                debug!("User {} sent a frame of unknown type, ignoring", user_id);
                return;
            }
        };

        self.registry.send_to_connection(user_id, conn_id, reply).await;
    }

    async fn reply_error(&self, user_id: i64, conn_id: Uuid, error: &str) {
        self.registry
            .send_to_connection(user_id, conn_id, RealtimeEvent::Error {
                error: error.to_string(),
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quest_core::chat::ChatService;
    use quest_core::follow::FollowGraph;
    use quest_core::ids::IdAllocator;
    use quest_db::Database;
    use quest_types::models::MessageStatus;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn gateway() -> Gateway {
        let db = Arc::new(Database::open_in_memory().unwrap());
        for (id, name) in [(1, "ada"), (2, "bob"), (3, "cyd")] {
            db.create_user(id, name, None).unwrap();
        }
        let graph = FollowGraph::new(db.clone());
        graph.follow(1, 2).unwrap();
        graph.follow(2, 1).unwrap();

        let ids = Arc::new(IdAllocator::new(1).unwrap());
        Gateway::new(ChatService::new(db, ids), Duration::from_secs(5))
    }

    fn next(rx: &mut UnboundedReceiver<RealtimeEvent>) -> RealtimeEvent {
        rx.try_recv().expect("expected an event")
    }

    #[tokio::test]
    async fn ping_gets_pong() {
        let gw = gateway();
        let (conn, mut rx) = gw.registry.register(1).await;

        gw.handle_text(1, conn, r#"{"type":"ping"}"#).await;
        assert!(matches!(next(&mut rx), RealtimeEvent::Pong));
    }

    #[tokio::test]
    async fn chat_acks_sender_and_reaches_every_receiver_connection() {
        let gw = gateway();
        let (sender_conn, mut sender_rx) = gw.registry.register(1).await;
        let (_other_sender_conn, mut other_sender_rx) = gw.registry.register(1).await;
        let (_phone, mut phone_rx) = gw.registry.register(2).await;
        let (_laptop, mut laptop_rx) = gw.registry.register(2).await;

        gw.handle_text(1, sender_conn, r#"{"type":"chat","receiverId":2,"content":"hi bob"}"#)
            .await;

        match next(&mut sender_rx) {
            RealtimeEvent::ChatAck { message } => {
                assert_eq!(message.content, "hi bob");
                assert_eq!(message.status, MessageStatus::Sent);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(other_sender_rx.try_recv().is_err());
        for rx in [&mut phone_rx, &mut laptop_rx] {
            assert!(matches!(next(rx), RealtimeEvent::Chat { message } if message.sender_id == 1));
        }
    }

    #[tokio::test]
    async fn invalid_frames_answer_with_error() {
        let gw = gateway();
        let (conn, mut rx) = gw.registry.register(1).await;

        gw.handle_text(1, conn, r#"{"type":"chat","content":"hi"}"#).await;
        assert!(matches!(next(&mut rx), RealtimeEvent::Error { .. }));

        gw.handle_text(1, conn, r#"{"type":"chat","receiverId":2,"content":"  "}"#).await;
        assert!(matches!(next(&mut rx), RealtimeEvent::Error { .. }));

        gw.handle_text(1, conn, r#"{"type":"read"}"#).await;
        assert!(matches!(next(&mut rx), RealtimeEvent::Error { .. }));

        // Core rejects: no mutual follow with user 3
        gw.handle_text(1, conn, r#"{"type":"chat","receiverId":3,"content":"hi"}"#).await;
        match next(&mut rx) {
            RealtimeEvent::Error { error } => assert!(error.contains("following each other")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn mistyped_fields_get_an_error_frame() {
        let gw = gateway();
        let (conn, mut rx) = gw.registry.register(1).await;

        for frame in [
            r#"{"type":"chat","receiverId":"abc","content":"hi"}"#,
            r#"{"type":"chat","receiverId":2,"content":123}"#,
            r#"{"type":"read","sessionId":"x"}"#,
        ] {
            gw.handle_text(1, conn, frame).await;
            match next(&mut rx) {
                RealtimeEvent::Error { error } => assert!(error.starts_with("malformed frame"), "{}", error),
                other => panic!("unexpected {:?} for {}", other, frame),
            }
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn numeric_string_receiver_is_accepted() {
        let gw = gateway();
        let (conn_a, mut rx_a) = gw.registry.register(1).await;
        let (_conn_b, mut rx_b) = gw.registry.register(2).await;

        gw.handle_text(1, conn_a, r#"{"type":"chat","receiverId":"2","content":"hi"}"#).await;
        assert!(matches!(next(&mut rx_a), RealtimeEvent::ChatAck { .. }));
        match next(&mut rx_b) {
            RealtimeEvent::Chat { message } => assert_eq!(message.receiver_id, 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn garbage_and_unknown_frames_are_ignored() {
        let gw = gateway();
        let (conn, mut rx) = gw.registry.register(1).await;

        gw.handle_text(1, conn, "not json").await;
        gw.handle_text(1, conn, r#"{"type":"typing"}"#).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn read_marks_messages_and_acks() {
        let gw = gateway();
        let (conn_a, mut rx_a) = gw.registry.register(1).await;
        let (conn_b, mut rx_b) = gw.registry.register(2).await;

        gw.handle_text(1, conn_a, r#"{"type":"chat","receiverId":2,"content":"hello"}"#)
            .await;
        let session_id = match next(&mut rx_b) {
            RealtimeEvent::Chat { message } => message.session_id,
            other => panic!("unexpected {:?}", other),
        };
        let _ack = next(&mut rx_a);

        let frame = format!(r#"{{"type":"read","sessionId":{}}}"#, session_id);
        gw.handle_text(2, conn_b, &frame).await;

        match next(&mut rx_b) {
            RealtimeEvent::ReadAck { message } => {
                assert_eq!(message.session_id, session_id);
                assert_eq!(message.sender_id, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
        let session = gw.chat.get_or_create_session(1, 2).unwrap();
        assert_eq!(session.unread_for(2), Some(0));
    }
}

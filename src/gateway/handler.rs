//! Gateway event handlers and socket plumbing.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::analytics::SenderKind;
use crate::auth::AuthService;
use crate::chat::{ChatMessage, ChatService, NewChatMessage};
use crate::monitor::PerformanceMonitor;
use crate::queue::{DeliveryError, DeliveryHandler, MessageQueueService, QueuedMessage};
use crate::session::SessionManager;

use super::events::{ClientEvent, ServerEvent};
use super::rooms::{session_room, Connection, RoomRegistry};

const ERR_AUTH_REQUIRED: &str = "Authentication required";
const ERR_AUTH_FAILED: &str = "Authentication failed";
const ERR_SESSION_ID_REQUIRED: &str = "Session ID is required";
const ERR_NOT_AUTHENTICATED: &str = "User not authenticated";
const ERR_CONTENT_REQUIRED: &str = "Message content is required";
const ERR_MESSAGE_ID_REQUIRED: &str = "Message ID is required";

/// Capacity of each connection's outbound event channel.
const OUTBOUND_BUFFER: usize = 64;

/// WebSocket chat gateway.
///
/// Owns the room registry and dispatches client events. Every handler
/// converts unexpected failure into an `error` event; the connection is
/// never closed by a handler.
pub struct ChatGateway {
    auth: Arc<dyn AuthService>,
    chat: Arc<dyn ChatService>,
    sessions: SessionManager,
    monitor: PerformanceMonitor,
    queue: MessageQueueService,
    rooms: Arc<RoomRegistry>,
}

impl ChatGateway {
    pub fn new(
        auth: Arc<dyn AuthService>,
        chat: Arc<dyn ChatService>,
        sessions: SessionManager,
        monitor: PerformanceMonitor,
        queue: MessageQueueService,
        rooms: Arc<RoomRegistry>,
    ) -> Self {
        Self {
            auth,
            chat,
            sessions,
            monitor,
            queue,
            rooms,
        }
    }

    pub fn rooms(&self) -> &Arc<RoomRegistry> {
        &self.rooms
    }

    // ------------------------------------------------------------------------
    // Socket lifecycle
    // ------------------------------------------------------------------------

    /// Drive one WebSocket connection to completion.
    ///
    /// The socket is split: a writer task drains the connection's outbound
    /// channel, the read loop parses and dispatches client events.
    pub async fn handle_socket(self: Arc<Self>, socket: WebSocket, token: Option<String>) {
        let (mut ws_tx, mut ws_rx) = socket.split();

        let claims = match &token {
            None => {
                let _ = send_direct(&mut ws_tx, ServerEvent::error(ERR_AUTH_REQUIRED)).await;
                return;
            }
            Some(token) => match self.auth.validate_token(token).await {
                Ok(claims) => claims,
                Err(e) => {
                    debug!(error = %e, "handshake rejected");
                    let _ = send_direct(&mut ws_tx, ServerEvent::error(ERR_AUTH_FAILED)).await;
                    return;
                }
            },
        };

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerEvent>(OUTBOUND_BUFFER);
        let conn = Arc::new(Connection::new(claims.user_id, claims.email, outbound_tx));
        info!(conn_id = %conn.id, user_id = %conn.user_id, "client connected");

        let writer = tokio::spawn(async move {
            while let Some(event) = outbound_rx.recv().await {
                if send_direct(&mut ws_tx, event).await.is_err() {
                    break;
                }
            }
        });

        while let Some(frame) = ws_rx.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text.to_string(),
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => continue,
            };
            match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => self.handle_event(&conn, event).await,
                Err(e) => {
                    debug!(conn_id = %conn.id, error = %e, "unparseable client event");
                    conn.send(ServerEvent::error("Invalid event payload")).await;
                }
            }
        }

        self.handle_disconnect(&conn).await;
        writer.abort();
        info!(conn_id = %conn.id, "client disconnected");
    }

    /// Broadcast the departure and leave the joined room, if any.
    pub async fn handle_disconnect(&self, conn: &Arc<Connection>) {
        if let Some(session_id) = conn.joined_session() {
            self.leave_room(conn, &session_id).await;
        }
    }

    /// Drop the connection's membership in a session room and tell the
    /// remaining members it is gone.
    async fn leave_room(&self, conn: &Arc<Connection>, session_id: &str) {
        let room = session_room(session_id);
        self.rooms.leave(&room, &conn.id);
        self.rooms
            .broadcast(
                &room,
                ServerEvent::UserDisconnected {
                    socket_id: conn.id.clone(),
                    timestamp: Utc::now(),
                },
                Some(&conn.id),
            )
            .await;
    }

    // ------------------------------------------------------------------------
    // Event dispatch
    // ------------------------------------------------------------------------

    pub async fn handle_event(&self, conn: &Arc<Connection>, event: ClientEvent) {
        match event {
            ClientEvent::JoinSession { session_id } => self.join_session(conn, session_id).await,
            ClientEvent::SendMessage {
                session_id,
                sender_type,
                content,
                metadata,
            } => {
                self.send_message(conn, session_id, sender_type, content, metadata)
                    .await
            }
            ClientEvent::Typing {
                session_id,
                is_typing,
            } => self.typing(conn, session_id, is_typing).await,
            ClientEvent::LoadMessageHistory {
                session_id,
                before_timestamp,
                limit,
            } => {
                self.load_message_history(conn, session_id, before_timestamp, limit)
                    .await
            }
            ClientEvent::SearchMessages {
                session_id,
                query,
                limit,
            } => self.search_messages(conn, session_id, query, limit).await,
            ClientEvent::MarkMessageDelivered { message_id } => {
                self.mark_message_delivered(conn, message_id).await
            }
            ClientEvent::MarkMessageRead { message_id } => {
                self.mark_message_read(conn, message_id).await
            }
        }
    }

    async fn join_session(&self, conn: &Arc<Connection>, session_id: String) {
        if session_id.is_empty() {
            conn.send(ServerEvent::error(ERR_SESSION_ID_REQUIRED)).await;
            return;
        }

        // A connection is in at most one room; switching sessions leaves
        // the old room so it can empty out and fall back to offline
        // queueing.
        if let Some(previous) = conn.joined_session() {
            if previous != session_id {
                self.leave_room(conn, &previous).await;
            }
        }

        let room = session_room(&session_id);
        self.rooms.join(&room, conn.clone());
        conn.set_session(&session_id);

        conn.send(ServerEvent::SessionJoined {
            session_id: session_id.clone(),
            socket_id: conn.id.clone(),
            timestamp: Utc::now(),
        })
        .await;

        // History fetch failure must not fail the join.
        match self.chat.get_recent_messages(&session_id, 50).await {
            Ok(messages) => {
                conn.send(ServerEvent::MessageHistory {
                    session_id: session_id.clone(),
                    messages,
                })
                .await;
            }
            Err(e) => {
                warn!(session_id, error = %e, "history fetch failed on join");
            }
        }

        self.rooms
            .broadcast(
                &room,
                ServerEvent::UserJoined {
                    socket_id: conn.id.clone(),
                    timestamp: Utc::now(),
                },
                Some(&conn.id),
            )
            .await;
        debug!(conn_id = %conn.id, session_id, "joined session room");
    }

    async fn send_message(
        &self,
        conn: &Arc<Connection>,
        session_id: String,
        sender_type: String,
        content: String,
        metadata: Option<serde_json::Value>,
    ) {
        if session_id.is_empty() {
            conn.send(ServerEvent::error(ERR_SESSION_ID_REQUIRED)).await;
            return;
        }
        if content.is_empty() {
            conn.send(ServerEvent::error(ERR_CONTENT_REQUIRED)).await;
            return;
        }
        if conn.user_id.is_empty() {
            conn.send(ServerEvent::error(ERR_NOT_AUTHENTICATED)).await;
            return;
        }

        let received_at = Utc::now();
        let size = content.len() as u64;
        let saved = match self
            .chat
            .save_message(NewChatMessage {
                session_id: session_id.clone(),
                sender_id: conn.user_id.clone(),
                sender_type,
                content,
                metadata,
            })
            .await
        {
            Ok(message) => message,
            Err(e) => {
                warn!(session_id, error = %e, "message persistence failed");
                conn.send(ServerEvent::error("Failed to send message")).await;
                return;
            }
        };

        let room = session_room(&session_id);
        if self.rooms.has_other_members(&room, &conn.id) {
            self.rooms
                .broadcast(
                    &room,
                    ServerEvent::MessageReceived(saved.clone()),
                    Some(&conn.id),
                )
                .await;
        } else {
            // No counterpart connected; hand off to the retry machine for
            // delivery once someone is.
            match serde_json::to_value(&saved) {
                Ok(payload) => {
                    if let Err(e) = self.queue.queue_message(&session_id, payload).await {
                        warn!(session_id, error = %e, "offline delivery enqueue failed");
                    }
                }
                Err(e) => warn!(message_id = %saved.id, error = %e, "message encode failed"),
            }
        }

        conn.send(ServerEvent::MessageSent {
            id: saved.id.clone(),
            timestamp: saved.timestamp,
        })
        .await;

        let done_at = Utc::now();
        let latency_ms = (done_at - received_at).num_milliseconds().max(0) as u64;
        self.sessions
            .record_message(
                &session_id,
                latency_ms,
                SenderKind::from_sender_type(&saved.sender_type),
            )
            .await;
        self.monitor
            .record_message_latency(&saved.id, &session_id, received_at, done_at, size)
            .await;
    }

    async fn typing(&self, conn: &Arc<Connection>, session_id: String, is_typing: bool) {
        if session_id.is_empty() {
            conn.send(ServerEvent::error(ERR_SESSION_ID_REQUIRED)).await;
            return;
        }
        self.rooms
            .broadcast(
                &session_room(&session_id),
                ServerEvent::TypingStatus {
                    socket_id: conn.id.clone(),
                    is_typing,
                    timestamp: Utc::now(),
                },
                Some(&conn.id),
            )
            .await;
    }

    async fn load_message_history(
        &self,
        conn: &Arc<Connection>,
        session_id: String,
        before: Option<chrono::DateTime<Utc>>,
        limit: usize,
    ) {
        if session_id.is_empty() {
            conn.send(ServerEvent::error(ERR_SESSION_ID_REQUIRED)).await;
            return;
        }
        match self
            .chat
            .load_message_history(&session_id, before, limit)
            .await
        {
            Ok(messages) => {
                let has_more = messages.len() == limit;
                conn.send(ServerEvent::MessageHistoryLoaded {
                    session_id,
                    messages,
                    has_more,
                })
                .await;
            }
            Err(e) => {
                warn!(session_id, error = %e, "history load failed");
                conn.send(ServerEvent::error("Failed to load message history"))
                    .await;
            }
        }
    }

    async fn search_messages(
        &self,
        conn: &Arc<Connection>,
        session_id: String,
        query: String,
        limit: usize,
    ) {
        if session_id.is_empty() {
            conn.send(ServerEvent::error(ERR_SESSION_ID_REQUIRED)).await;
            return;
        }
        match self.chat.search_messages(&session_id, &query, limit).await {
            Ok(messages) => {
                conn.send(ServerEvent::MessageSearchResults {
                    session_id,
                    query,
                    messages,
                })
                .await;
            }
            Err(e) => {
                warn!(session_id, error = %e, "message search failed");
                conn.send(ServerEvent::error("Failed to search messages"))
                    .await;
            }
        }
    }

    async fn mark_message_delivered(&self, conn: &Arc<Connection>, message_id: String) {
        if message_id.is_empty() {
            conn.send(ServerEvent::error(ERR_MESSAGE_ID_REQUIRED)).await;
            return;
        }
        match self.chat.mark_message_as_delivered(&message_id).await {
            Ok(()) => {
                conn.send(ServerEvent::MessageDeliveryConfirmed {
                    message_id,
                    timestamp: Utc::now(),
                })
                .await;
            }
            Err(e) => {
                warn!(message_id, error = %e, "delivery mark failed");
                conn.send(ServerEvent::error("Failed to mark message as delivered"))
                    .await;
            }
        }
    }

    async fn mark_message_read(&self, conn: &Arc<Connection>, message_id: String) {
        if message_id.is_empty() {
            conn.send(ServerEvent::error(ERR_MESSAGE_ID_REQUIRED)).await;
            return;
        }
        match self.chat.mark_message_as_read(&message_id).await {
            Ok(()) => {
                conn.send(ServerEvent::MessageReadConfirmed {
                    message_id,
                    timestamp: Utc::now(),
                })
                .await;
            }
            Err(e) => {
                warn!(message_id, error = %e, "read mark failed");
                conn.send(ServerEvent::error("Failed to mark message as read"))
                    .await;
            }
        }
    }
}

async fn send_direct(
    ws_tx: &mut (impl SinkExt<Message> + Unpin),
    event: ServerEvent,
) -> Result<(), ()> {
    let Ok(text) = serde_json::to_string(&event) else {
        return Err(());
    };
    ws_tx.send(Message::Text(text.into())).await.map_err(|_| ())
}

/// Delivers queued messages by broadcasting into the session room.
///
/// Delivery succeeds only when a participant is connected; otherwise the
/// retry machine keeps the message.
pub struct RoomDeliveryHandler {
    rooms: Arc<RoomRegistry>,
}

impl RoomDeliveryHandler {
    pub fn new(rooms: Arc<RoomRegistry>) -> Self {
        Self { rooms }
    }
}

#[async_trait]
impl DeliveryHandler for RoomDeliveryHandler {
    async fn deliver(&self, message: &QueuedMessage) -> Result<(), DeliveryError> {
        let room = session_room(&message.session_id);
        let chat: ChatMessage = serde_json::from_value(message.payload.clone())
            .map_err(|e| DeliveryError(format!("undeliverable payload: {e}")))?;
        let reached = self
            .rooms
            .broadcast_to_other_users(&room, &chat.sender_id, ServerEvent::MessageReceived(chat.clone()))
            .await;
        if reached == 0 {
            return Err(DeliveryError("no connected counterpart".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::analytics::SessionAnalyticsService;
    use crate::auth::{AuthClaims, AuthError};
    use crate::cache::MemoryCacheStore;
    use crate::chat::ChatServiceError;
    use crate::monitor::MonitorSettings;
    use crate::queue::QueueSettings;
    use crate::store::MemorySessionRepository;
    use ulid::Ulid;

    struct FakeAuth;

    #[async_trait]
    impl AuthService for FakeAuth {
        async fn validate_token(&self, token: &str) -> Result<AuthClaims, AuthError> {
            if token.starts_with("valid-") {
                Ok(AuthClaims {
                    user_id: token.trim_start_matches("valid-").to_string(),
                    email: format!("{token}@test"),
                })
            } else {
                Err(AuthError::InvalidToken)
            }
        }
    }

    #[derive(Default)]
    struct FakeChat {
        messages: Mutex<Vec<ChatMessage>>,
    }

    #[async_trait]
    impl ChatService for FakeChat {
        async fn get_recent_messages(
            &self,
            session_id: &str,
            limit: usize,
        ) -> Result<Vec<ChatMessage>, ChatServiceError> {
            let messages = self.messages.lock().unwrap();
            let mut recent: Vec<ChatMessage> = messages
                .iter()
                .filter(|m| m.session_id == session_id)
                .rev()
                .take(limit)
                .cloned()
                .collect();
            recent.reverse();
            Ok(recent)
        }

        async fn save_message(
            &self,
            message: NewChatMessage,
        ) -> Result<ChatMessage, ChatServiceError> {
            let saved = ChatMessage {
                id: format!("msg_{}", Ulid::new()),
                session_id: message.session_id,
                sender_id: message.sender_id,
                sender_type: message.sender_type,
                content: message.content,
                metadata: message.metadata,
                timestamp: Utc::now(),
            };
            self.messages.lock().unwrap().push(saved.clone());
            Ok(saved)
        }

        async fn load_message_history(
            &self,
            session_id: &str,
            _before: Option<chrono::DateTime<Utc>>,
            limit: usize,
        ) -> Result<Vec<ChatMessage>, ChatServiceError> {
            self.get_recent_messages(session_id, limit).await
        }

        async fn search_messages(
            &self,
            session_id: &str,
            query: &str,
            limit: usize,
        ) -> Result<Vec<ChatMessage>, ChatServiceError> {
            let messages = self.messages.lock().unwrap();
            Ok(messages
                .iter()
                .filter(|m| m.session_id == session_id && m.content.contains(query))
                .take(limit)
                .cloned()
                .collect())
        }

        async fn mark_message_as_delivered(
            &self,
            _message_id: &str,
        ) -> Result<(), ChatServiceError> {
            Ok(())
        }

        async fn mark_message_as_read(&self, _message_id: &str) -> Result<(), ChatServiceError> {
            Ok(())
        }
    }

    fn build_gateway() -> Arc<ChatGateway> {
        let cache: Arc<dyn crate::cache::CacheStore> = Arc::new(MemoryCacheStore::new());
        let repository = Arc::new(MemorySessionRepository::new());
        let analytics = SessionAnalyticsService::new(
            cache.clone(),
            Duration::from_secs(3600),
            50,
            Duration::from_secs(24 * 3600),
        );
        let sessions = SessionManager::new(
            cache.clone(),
            repository,
            analytics,
            Duration::from_secs(3600),
        );
        let monitor = PerformanceMonitor::new(cache.clone(), MonitorSettings::default());
        let rooms = Arc::new(RoomRegistry::new());
        let queue = MessageQueueService::new(
            cache,
            Arc::new(RoomDeliveryHandler::new(rooms.clone())),
            QueueSettings::default(),
        );
        Arc::new(ChatGateway::new(
            Arc::new(FakeAuth),
            Arc::new(FakeChat::default()),
            sessions,
            monitor,
            queue,
            rooms,
        ))
    }

    fn test_conn(user: &str) -> (Arc<Connection>, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(16);
        (
            Arc::new(Connection::new(user.into(), format!("{user}@test"), tx)),
            rx,
        )
    }

    async fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn join_with_empty_session_id_is_rejected() {
        let gateway = build_gateway();
        let (conn, mut rx) = test_conn("user-1");

        gateway
            .handle_event(&conn, ClientEvent::JoinSession { session_id: "".into() })
            .await;

        let events = drain(&mut rx).await;
        assert!(matches!(
            events.as_slice(),
            [ServerEvent::Error { message }] if message == "Session ID is required"
        ));
    }

    #[tokio::test]
    async fn send_without_content_is_rejected() {
        let gateway = build_gateway();
        let (conn, mut rx) = test_conn("user-1");

        gateway
            .handle_event(
                &conn,
                ClientEvent::SendMessage {
                    session_id: "session_1".into(),
                    sender_type: "operator".into(),
                    content: "".into(),
                    metadata: None,
                },
            )
            .await;

        let events = drain(&mut rx).await;
        assert!(matches!(
            events.as_slice(),
            [ServerEvent::Error { message }] if message == "Message content is required"
        ));
    }

    #[tokio::test]
    async fn message_reaches_the_other_participant() {
        let gateway = build_gateway();
        let (alice, mut rx_alice) = test_conn("alice");
        let (bob, mut rx_bob) = test_conn("bob");

        for conn in [&alice, &bob] {
            gateway
                .handle_event(
                    conn,
                    ClientEvent::JoinSession {
                        session_id: "s1".into(),
                    },
                )
                .await;
        }
        drain(&mut rx_alice).await;
        drain(&mut rx_bob).await;

        gateway
            .handle_event(
                &alice,
                ClientEvent::SendMessage {
                    session_id: "s1".into(),
                    sender_type: "operator".into(),
                    content: "Hello".into(),
                    metadata: None,
                },
            )
            .await;

        let bob_events = drain(&mut rx_bob).await;
        assert!(bob_events.iter().any(|e| matches!(
            e,
            ServerEvent::MessageReceived(m) if m.content == "Hello"
        )));

        let alice_events = drain(&mut rx_alice).await;
        assert!(alice_events
            .iter()
            .any(|e| matches!(e, ServerEvent::MessageSent { .. })));
        assert!(!alice_events
            .iter()
            .any(|e| matches!(e, ServerEvent::MessageReceived(_))));
    }

    #[tokio::test]
    async fn lonely_message_is_queued_for_offline_delivery() {
        let gateway = build_gateway();
        let (alice, mut rx) = test_conn("alice");

        gateway
            .handle_event(
                &alice,
                ClientEvent::JoinSession {
                    session_id: "s1".into(),
                },
            )
            .await;
        drain(&mut rx).await;

        gateway
            .handle_event(
                &alice,
                ClientEvent::SendMessage {
                    session_id: "s1".into(),
                    sender_type: "operator".into(),
                    content: "anyone?".into(),
                    metadata: None,
                },
            )
            .await;

        let stats = gateway.queue.get_queue_stats().await.unwrap();
        assert_eq!(stats.pending, 1);

        let offline = gateway
            .queue
            .get_session_offline_messages("s1")
            .await
            .unwrap();
        assert_eq!(offline.len(), 1);
    }

    #[tokio::test]
    async fn switching_sessions_leaves_the_previous_room() {
        let gateway = build_gateway();
        let (alice, mut rx_alice) = test_conn("alice");
        let (bob, mut rx_bob) = test_conn("bob");

        for conn in [&alice, &bob] {
            gateway
                .handle_event(
                    conn,
                    ClientEvent::JoinSession {
                        session_id: "s1".into(),
                    },
                )
                .await;
        }
        drain(&mut rx_alice).await;
        drain(&mut rx_bob).await;

        gateway
            .handle_event(
                &alice,
                ClientEvent::JoinSession {
                    session_id: "s2".into(),
                },
            )
            .await;

        let bob_events = drain(&mut rx_bob).await;
        assert!(bob_events.iter().any(|e| matches!(
            e,
            ServerEvent::UserDisconnected { socket_id, .. } if *socket_id == alice.id
        )));
        assert!(!gateway.rooms.has_other_members("session:s1", &bob.id));

        // With alice gone from s1, bob's messages there go to the queue.
        gateway
            .handle_event(
                &bob,
                ClientEvent::SendMessage {
                    session_id: "s1".into(),
                    sender_type: "customer".into(),
                    content: "still there?".into(),
                    metadata: None,
                },
            )
            .await;
        let stats = gateway.queue.get_queue_stats().await.unwrap();
        assert_eq!(stats.pending, 1);

        gateway.handle_disconnect(&alice).await;
        let bob_events = drain(&mut rx_bob).await;
        assert!(
            !bob_events
                .iter()
                .any(|e| matches!(e, ServerEvent::UserDisconnected { .. })),
            "disconnect must not re-notify a room already left"
        );
    }

    #[tokio::test]
    async fn disconnect_notifies_the_room() {
        let gateway = build_gateway();
        let (alice, _rx_alice) = test_conn("alice");
        let (bob, mut rx_bob) = test_conn("bob");

        for conn in [&alice, &bob] {
            gateway
                .handle_event(
                    conn,
                    ClientEvent::JoinSession {
                        session_id: "s1".into(),
                    },
                )
                .await;
        }
        drain(&mut rx_bob).await;

        gateway.handle_disconnect(&alice).await;

        let events = drain(&mut rx_bob).await;
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::UserDisconnected { socket_id, .. } if *socket_id == alice.id
        )));
        assert!(!gateway.rooms.has_other_members("session:s1", &bob.id));
    }

    #[tokio::test]
    async fn typing_is_broadcast_to_the_rest_of_the_room() {
        let gateway = build_gateway();
        let (alice, mut rx_alice) = test_conn("alice");
        let (bob, mut rx_bob) = test_conn("bob");

        for conn in [&alice, &bob] {
            gateway
                .handle_event(
                    conn,
                    ClientEvent::JoinSession {
                        session_id: "s1".into(),
                    },
                )
                .await;
        }
        drain(&mut rx_alice).await;
        drain(&mut rx_bob).await;

        gateway
            .handle_event(
                &alice,
                ClientEvent::Typing {
                    session_id: "s1".into(),
                    is_typing: true,
                },
            )
            .await;

        let bob_events = drain(&mut rx_bob).await;
        assert!(bob_events.iter().any(|e| matches!(
            e,
            ServerEvent::TypingStatus { is_typing: true, .. }
        )));
        assert!(drain(&mut rx_alice).await.is_empty());
    }
}

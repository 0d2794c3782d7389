use std::collections::HashMap;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use staylink_domain::identity::ActorIdentity;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Duration, interval};

use crate::error::ApiError;
use crate::middleware::{bearer_token, decode_token};
use crate::observability;
use crate::realtime::{
    ClientEvent, PRESENCE_ROOM, RoomEvent, ServerEvent, conversation_room, user_room,
};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RealtimeQuery {
    token: Option<String>,
}

/// Upgrade endpoint for the realtime socket. Browsers cannot set headers on
/// a WebSocket handshake, so the token may arrive as a query parameter
/// instead of a bearer header. Authentication happens before the upgrade is
/// accepted.
pub async fn realtime_handler(
    State(state): State<AppState>,
    Query(query): Query<RealtimeQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = query
        .token
        .as_deref()
        .or_else(|| bearer_token(&headers))
        .ok_or(ApiError::Unauthorized)?;
    let claims = decode_token(token, &state.config.jwt_secret).map_err(|err| {
        tracing::warn!(error = %err, "realtime token rejected");
        observability::register_realtime_connection("rejected");
        ApiError::Unauthorized
    })?;
    let actor = ActorIdentity::with_user_id(claims.sub);
    Ok(ws.on_upgrade(move |socket| run_connection(state, actor, socket)))
}

struct Connection {
    state: AppState,
    actor: ActorIdentity,
    connection_id: String,
    outbound: mpsc::UnboundedSender<ServerEvent>,
    joined: HashMap<String, JoinHandle<()>>,
}

async fn run_connection(state: AppState, actor: ActorIdentity, socket: WebSocket) {
    observability::register_realtime_connection("accepted");
    let connection_id = staylink_domain::util::uuid_v7_without_dashes();
    let (mut sink, mut stream) = socket.split();
    let (outbound, mut outbox) = mpsc::unbounded_channel::<ServerEvent>();

    let mut conn = Connection {
        state,
        actor,
        connection_id,
        outbound,
        joined: HashMap::new(),
    };

    // Always-on subscriptions: the user's own room and the presence feed.
    let user_forwarder = conn.spawn_forwarder(&user_room(&conn.actor.user_id)).await;
    let presence_forwarder = conn.spawn_forwarder(PRESENCE_ROOM).await;

    conn.state
        .presence
        .set(&conn.actor.user_id, &conn.connection_id)
        .await;
    conn.publish(
        PRESENCE_ROOM,
        ServerEvent::UserOnline {
            user_id: conn.actor.user_id.clone(),
        },
    )
    .await;

    let snapshot = ServerEvent::OnlineUsers {
        user_ids: conn.state.presence.list_online().await,
    };
    if send_event(&mut sink, &snapshot).await.is_err() {
        conn.shutdown(user_forwarder, presence_forwarder).await;
        return;
    }

    let mut heartbeat = interval(Duration::from_secs(
        conn.state.config.heartbeat_interval_secs.max(1),
    ));
    heartbeat.tick().await;

    loop {
        tokio::select! {
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => conn.handle_text(&text).await,
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::debug!(error = %err, "realtime socket read failed");
                        break;
                    }
                }
            }
            event = outbox.recv() => {
                let Some(event) = event else { break };
                observability::register_realtime_event(event.name(), "outbound");
                if send_event(&mut sink, &event).await.is_err() {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if sink.send(WsMessage::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    conn.shutdown(user_forwarder, presence_forwarder).await;
}

async fn send_event(
    sink: &mut SplitSink<WebSocket, WsMessage>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(payload) => sink.send(WsMessage::Text(payload)).await,
        Err(err) => {
            tracing::error!(error = %err, "failed to encode realtime event");
            Ok(())
        }
    }
}

impl Connection {
    /// Subscribes to a room and forwards its events into this connection's
    /// outbox, skipping events this connection published itself. The
    /// subscription is registered before the task starts so a publish racing
    /// the spawn is not lost.
    async fn spawn_forwarder(&self, room: &str) -> JoinHandle<()> {
        let mut receiver = self.state.realtime.subscribe(room).await;
        let connection_id = self.connection_id.clone();
        let outbound = self.outbound.clone();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(room_event) => {
                        if room_event.origin == connection_id {
                            continue;
                        }
                        if outbound.send(room_event.event).is_err() {
                            break;
                        }
                    }
                    // No replay on lag: clients recover through the REST
                    // history endpoint.
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "realtime subscriber lagged; events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn publish(&self, room: &str, event: ServerEvent) {
        self.state
            .realtime
            .publish(
                room,
                RoomEvent {
                    origin: self.connection_id.clone(),
                    event,
                },
            )
            .await;
    }

    fn reply(&self, event: ServerEvent) {
        let _ = self.outbound.send(event);
    }

    async fn handle_text(&mut self, text: &str) {
        let event = match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => event,
            Err(err) => {
                self.reply(ServerEvent::Error {
                    message: format!("unrecognized event: {err}"),
                });
                return;
            }
        };
        observability::register_realtime_event(event.name(), "inbound");

        match event {
            // Joining is permissive at the transport layer; participant
            // checks happen when the client actually sends or reads.
            ClientEvent::JoinConversation { conversation_id } => {
                let room = conversation_room(&conversation_id);
                if !self.joined.contains_key(&room) {
                    let forwarder = self.spawn_forwarder(&room).await;
                    self.joined.insert(room, forwarder);
                }
            }
            ClientEvent::LeaveConversation { conversation_id } => {
                if let Some(forwarder) = self.joined.remove(&conversation_room(&conversation_id)) {
                    forwarder.abort();
                }
            }
            ClientEvent::SendMessage {
                conversation_id,
                message,
                temp_id,
            } => {
                self.relay_message(conversation_id, message, temp_id).await;
            }
            ClientEvent::TypingStart { conversation_id } => {
                let event = ServerEvent::UserTyping {
                    conversation_id: conversation_id.clone(),
                    user_id: self.actor.user_id.clone(),
                };
                self.publish(&conversation_room(&conversation_id), event)
                    .await;
            }
            ClientEvent::TypingStop { conversation_id } => {
                let event = ServerEvent::UserStoppedTyping {
                    conversation_id: conversation_id.clone(),
                    user_id: self.actor.user_id.clone(),
                };
                self.publish(&conversation_room(&conversation_id), event)
                    .await;
            }
            // Notification-only: the durable flip happens through the REST
            // read endpoints.
            ClientEvent::MarkRead {
                conversation_id,
                message_ids,
            } => {
                let event = ServerEvent::MessagesRead {
                    conversation_id: conversation_id.clone(),
                    user_id: self.actor.user_id.clone(),
                    message_ids,
                    read_at_ms: staylink_domain::util::now_ms(),
                };
                self.publish(&conversation_room(&conversation_id), event)
                    .await;
            }
            ClientEvent::GetOnlineUsers => {
                self.reply(ServerEvent::OnlineUsers {
                    user_ids: self.state.presence.list_online().await,
                });
            }
            ClientEvent::SendNotification {
                recipient_id,
                notification,
            } => {
                self.publish(
                    &user_room(&recipient_id),
                    ServerEvent::Notification { notification },
                )
                .await;
            }
        }
    }

    /// Pure relay: the client persists through the REST append endpoint and
    /// then emits the stored message here so live peers get it without
    /// refetching. Whether persistence succeeded was already answered by the
    /// REST call; this path only answers whether peers were nudged.
    async fn relay_message(
        &self,
        conversation_id: String,
        message: Value,
        temp_id: Option<String>,
    ) {
        let message_id = match message["message_id"].as_str() {
            Some(id) if !id.trim().is_empty() => id.to_string(),
            _ => {
                self.reply(ServerEvent::MessageError {
                    temp_id,
                    message: "message has no persisted id".to_string(),
                });
                return;
            }
        };
        self.publish(
            &conversation_room(&conversation_id),
            ServerEvent::NewMessage {
                conversation_id: conversation_id.clone(),
                message,
            },
        )
        .await;
        // Ack back to the sending socket only, echoing the client's
        // provisional id so it can reconcile optimistic UI state.
        self.reply(ServerEvent::MessageDelivered {
            temp_id,
            message_id,
        });
    }

    async fn shutdown(
        mut self,
        user_forwarder: JoinHandle<()>,
        presence_forwarder: JoinHandle<()>,
    ) {
        for (_, forwarder) in self.joined.drain() {
            forwarder.abort();
        }
        user_forwarder.abort();
        presence_forwarder.abort();

        // Guarded by connection id: a reconnect that displaced this entry
        // stays online.
        let went_offline = self
            .state
            .presence
            .remove(&self.actor.user_id, &self.connection_id)
            .await;
        if went_offline {
            self.publish(
                PRESENCE_ROOM,
                ServerEvent::UserOffline {
                    user_id: self.actor.user_id.clone(),
                },
            )
            .await;
        }
        observability::register_realtime_connection("closed");
    }
}

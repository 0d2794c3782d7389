use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{RwLock, broadcast};

/// Everyone's presence transitions fan out through this room.
pub const PRESENCE_ROOM: &str = "presence";

pub fn user_room(user_id: &str) -> String {
    format!("user-{user_id}")
}

pub fn conversation_room(conversation_id: &str) -> String {
    format!("conversation-{conversation_id}")
}

/// An event published into a room, stamped with the connection that produced
/// it so relays can exclude the sender's own socket.
#[derive(Clone, Debug)]
pub struct RoomEvent {
    pub origin: String,
    pub event: ServerEvent,
}

/// Events a client may send over the realtime socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinConversation {
        conversation_id: String,
    },
    LeaveConversation {
        conversation_id: String,
    },
    /// Relay of a message the client already persisted through the REST
    /// append endpoint. The gateway never writes the store from here.
    SendMessage {
        conversation_id: String,
        message: Value,
        #[serde(default)]
        temp_id: Option<String>,
    },
    TypingStart {
        conversation_id: String,
    },
    TypingStop {
        conversation_id: String,
    },
    MarkRead {
        conversation_id: String,
        #[serde(default)]
        message_ids: Vec<String>,
    },
    GetOnlineUsers,
    SendNotification {
        recipient_id: String,
        notification: Value,
    },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinConversation { .. } => "join-conversation",
            ClientEvent::LeaveConversation { .. } => "leave-conversation",
            ClientEvent::SendMessage { .. } => "send-message",
            ClientEvent::TypingStart { .. } => "typing-start",
            ClientEvent::TypingStop { .. } => "typing-stop",
            ClientEvent::MarkRead { .. } => "mark-read",
            ClientEvent::GetOnlineUsers => "get-online-users",
            ClientEvent::SendNotification { .. } => "send-notification",
        }
    }
}

/// Events the gateway emits to clients.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    NewMessage {
        conversation_id: String,
        message: Value,
    },
    MessageDelivered {
        temp_id: Option<String>,
        message_id: String,
    },
    MessageError {
        temp_id: Option<String>,
        message: String,
    },
    MessagesRead {
        conversation_id: String,
        user_id: String,
        message_ids: Vec<String>,
        read_at_ms: i64,
    },
    UserTyping {
        conversation_id: String,
        user_id: String,
    },
    UserStoppedTyping {
        conversation_id: String,
        user_id: String,
    },
    UserOnline {
        user_id: String,
    },
    UserOffline {
        user_id: String,
    },
    OnlineUsers {
        user_ids: Vec<String>,
    },
    Notification {
        notification: Value,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::NewMessage { .. } => "new-message",
            ServerEvent::MessageDelivered { .. } => "message-delivered",
            ServerEvent::MessageError { .. } => "message-error",
            ServerEvent::MessagesRead { .. } => "messages-read",
            ServerEvent::UserTyping { .. } => "user-typing",
            ServerEvent::UserStoppedTyping { .. } => "user-stopped-typing",
            ServerEvent::UserOnline { .. } => "user-online",
            ServerEvent::UserOffline { .. } => "user-offline",
            ServerEvent::OnlineUsers { .. } => "online-users",
            ServerEvent::Notification { .. } => "notification",
            ServerEvent::Error { .. } => "error",
        }
    }
}

/// Broadcast hub keyed by room name. Rooms are created on first subscribe
/// and dropped once a publish finds no listeners left.
pub struct RealtimeHub {
    capacity: usize,
    rooms: RwLock<HashMap<String, broadcast::Sender<RoomEvent>>>,
}

impl RealtimeHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            rooms: RwLock::new(HashMap::new()),
        }
    }

    pub async fn subscribe(&self, room: &str) -> broadcast::Receiver<RoomEvent> {
        let mut rooms = self.rooms.write().await;
        match rooms.get(room) {
            Some(sender) => sender.subscribe(),
            None => {
                let (sender, receiver) = broadcast::channel(self.capacity);
                rooms.insert(room.to_string(), sender);
                receiver
            }
        }
    }

    /// Delivers an event to every subscriber of `room`. Returns how many
    /// receivers got it; zero when the room is idle.
    pub async fn publish(&self, room: &str, event: RoomEvent) -> usize {
        let delivered = {
            let rooms = self.rooms.read().await;
            match rooms.get(room) {
                Some(sender) => sender.send(event).unwrap_or(0),
                None => return 0,
            }
        };
        if delivered == 0 {
            let mut rooms = self.rooms.write().await;
            if rooms
                .get(room)
                .is_some_and(|sender| sender.receiver_count() == 0)
            {
                rooms.remove(room);
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_events_parse_from_the_wire_envelope() {
        let raw = json!({
            "event": "send-message",
            "data": {
                "conversation_id": "c1",
                "message": {"message_id": "m1", "content": "hello"},
                "temp_id": "t-1"
            }
        });
        let event: ClientEvent = serde_json::from_value(raw).expect("parse");
        match event {
            ClientEvent::SendMessage {
                conversation_id,
                message,
                temp_id,
            } => {
                assert_eq!(conversation_id, "c1");
                assert_eq!(message["message_id"], "m1");
                assert_eq!(temp_id.as_deref(), Some("t-1"));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let raw = json!({"event": "typing-start", "data": {"conversation_id": "c1"}});
        let event: ClientEvent = serde_json::from_value(raw).expect("parse");
        assert_eq!(event.name(), "typing-start");

        // Unit events need no data field at all.
        let raw = json!({"event": "get-online-users"});
        let event: ClientEvent = serde_json::from_value(raw).expect("parse");
        assert_eq!(event.name(), "get-online-users");
    }

    #[test]
    fn unknown_client_events_are_rejected() {
        let raw = json!({"event": "rm-rf", "data": {}});
        assert!(serde_json::from_value::<ClientEvent>(raw).is_err());
    }

    #[test]
    fn server_events_serialize_with_kebab_case_names() {
        let event = ServerEvent::MessageDelivered {
            temp_id: Some("t-1".to_string()),
            message_id: "m1".to_string(),
        };
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["event"], "message-delivered");
        assert_eq!(value["data"]["temp_id"], "t-1");
        assert_eq!(value["data"]["message_id"], "m1");

        let event = ServerEvent::OnlineUsers {
            user_ids: vec!["amir".to_string(), "mara".to_string()],
        };
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["event"], "online-users");
        assert_eq!(value["data"]["user_ids"], json!(["amir", "mara"]));
    }

    #[tokio::test]
    async fn publish_reaches_every_room_subscriber() {
        let hub = RealtimeHub::new(16);
        let mut first = hub.subscribe("room-a").await;
        let mut second = hub.subscribe("room-a").await;

        let delivered = hub
            .publish(
                "room-a",
                RoomEvent {
                    origin: "conn-1".to_string(),
                    event: ServerEvent::UserOnline {
                        user_id: "amir".to_string(),
                    },
                },
            )
            .await;
        assert_eq!(delivered, 2);

        for receiver in [&mut first, &mut second] {
            let event = receiver.recv().await.expect("recv");
            assert_eq!(event.origin, "conn-1");
            assert_eq!(event.event.name(), "user-online");
        }
    }

    #[tokio::test]
    async fn publish_to_an_idle_room_is_dropped() {
        let hub = RealtimeHub::new(16);
        let delivered = hub
            .publish(
                "room-b",
                RoomEvent {
                    origin: "conn-1".to_string(),
                    event: ServerEvent::UserOffline {
                        user_id: "amir".to_string(),
                    },
                },
            )
            .await;
        assert_eq!(delivered, 0);
    }
}

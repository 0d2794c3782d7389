use std::collections::HashMap;

use tokio::sync::RwLock;

/// Live connection registry. One entry per online user, holding the id of
/// the connection that most recently authenticated as that user. A newer
/// connection for the same user displaces the older entry, and removal is
/// guarded by connection id so a stale disconnect cannot knock out the
/// replacement.
#[derive(Default)]
pub struct PresenceRegistry {
    online: RwLock<HashMap<String, String>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, user_id: &str, connection_id: &str) {
        self.online
            .write()
            .await
            .insert(user_id.to_string(), connection_id.to_string());
    }

    /// Removes the user only when `connection_id` still owns the entry.
    /// Returns whether the user went offline.
    pub async fn remove(&self, user_id: &str, connection_id: &str) -> bool {
        let mut online = self.online.write().await;
        match online.get(user_id) {
            Some(current) if current == connection_id => {
                online.remove(user_id);
                true
            }
            _ => false,
        }
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.online.read().await.contains_key(user_id)
    }

    /// Sorted snapshot of everyone online.
    pub async fn list_online(&self) -> Vec<String> {
        let mut users: Vec<_> = self.online.read().await.keys().cloned().collect();
        users.sort();
        users
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use staylink_domain::DomainResult;
use staylink_domain::error::DomainError;
use staylink_domain::messages::{Message, PageRequest};
use staylink_domain::ports::BoxFuture;
use staylink_domain::ports::messages::MessageRepository;
use tokio::sync::RwLock;

const MESSAGES_APPENDED_TOTAL: &str = "staylink_messages_appended_total";

#[derive(Default)]
struct MessageTables {
    by_id: HashMap<String, Message>,
    // Message ids per conversation, kept in ascending (created_at_ms,
    // message_id) order.
    by_conversation: HashMap<String, Vec<String>>,
}

/// Append-mostly message log backed by process memory.
#[derive(Default)]
pub struct InMemoryMessageRepository {
    tables: Arc<RwLock<MessageTables>>,
}

impl InMemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageRepository for InMemoryMessageRepository {
    fn append(&self, message: &Message) -> BoxFuture<'_, DomainResult<Message>> {
        let message = message.clone();
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut tables = tables.write().await;
            if tables.by_id.contains_key(&message.message_id) {
                return Err(DomainError::Conflict);
            }
            let log = tables
                .by_conversation
                .entry(message.conversation_id.clone())
                .or_default();
            log.push(message.message_id.clone());
            // Appends arrive in wall-clock order in practice; restore the
            // invariant cheaply when one lands out of order.
            if log.len() > 1 && log[log.len() - 2] > message.message_id {
                log.sort();
            }
            tables
                .by_id
                .insert(message.message_id.clone(), message.clone());
            counter!(MESSAGES_APPENDED_TOTAL).increment(1);
            Ok(message)
        })
    }

    fn get(&self, message_id: &str) -> BoxFuture<'_, DomainResult<Option<Message>>> {
        let message_id = message_id.to_string();
        let tables = self.tables.clone();
        Box::pin(async move { Ok(tables.read().await.by_id.get(&message_id).cloned()) })
    }

    fn list_page(
        &self,
        conversation_id: &str,
        page: &PageRequest,
    ) -> BoxFuture<'_, DomainResult<(Vec<Message>, u64)>> {
        let conversation_id = conversation_id.to_string();
        let page = *page;
        let tables = self.tables.clone();
        Box::pin(async move {
            let tables = tables.read().await;
            let Some(log) = tables.by_conversation.get(&conversation_id) else {
                return Ok((Vec::new(), 0));
            };
            let total = log.len() as u64;
            let limit = page.limit as usize;
            // Page 1 is the tail of the log; pages walk backwards from there,
            // each returned oldest-first.
            let end = log.len().saturating_sub((page.page as usize - 1) * limit);
            let start = end.saturating_sub(limit);
            let messages = log[start..end]
                .iter()
                .filter_map(|id| tables.by_id.get(id).cloned())
                .collect();
            Ok((messages, total))
        })
    }

    fn mark_read_from_others(
        &self,
        conversation_id: &str,
        reader_id: &str,
        read_at_ms: i64,
    ) -> BoxFuture<'_, DomainResult<u64>> {
        let conversation_id = conversation_id.to_string();
        let reader_id = reader_id.to_string();
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut tables = tables.write().await;
            let Some(log) = tables.by_conversation.get(&conversation_id).cloned() else {
                return Ok(0);
            };
            let mut flipped = 0;
            for id in log {
                if let Some(message) = tables.by_id.get_mut(&id) {
                    if message.sender_id != reader_id && !message.read {
                        message.read = true;
                        message.read_at_ms = Some(read_at_ms);
                        flipped += 1;
                    }
                }
            }
            Ok(flipped)
        })
    }

    fn delete(&self, message_id: &str) -> BoxFuture<'_, DomainResult<bool>> {
        let message_id = message_id.to_string();
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut tables = tables.write().await;
            let Some(message) = tables.by_id.remove(&message_id) else {
                return Ok(false);
            };
            if let Some(log) = tables.by_conversation.get_mut(&message.conversation_id) {
                log.retain(|id| id != &message_id);
            }
            Ok(true)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use staylink_domain::messages::MessageType;
    use staylink_domain::util::now_ms;

    fn sample(id: &str, sender: &str, content: &str) -> Message {
        Message {
            message_id: id.to_string(),
            conversation_id: "c1".to_string(),
            sender_id: sender.to_string(),
            content: content.to_string(),
            message_type: MessageType::Text,
            image_url: None,
            booking_id: None,
            read: false,
            read_at_ms: None,
            created_at_ms: now_ms(),
            sender: None,
        }
    }

    #[tokio::test]
    async fn list_page_walks_backwards_in_ascending_chunks() {
        let repo = InMemoryMessageRepository::new();
        for n in 1..=5 {
            repo.append(&sample(&format!("m{n}"), "guest-1", &format!("msg {n}")))
                .await
                .expect("append");
        }

        let (page1, total) = repo
            .list_page("c1", &PageRequest { page: 1, limit: 2 })
            .await
            .expect("page 1");
        assert_eq!(total, 5);
        let ids: Vec<_> = page1.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, ["m4", "m5"]);

        let (page3, _) = repo
            .list_page("c1", &PageRequest { page: 3, limit: 2 })
            .await
            .expect("page 3");
        let ids: Vec<_> = page3.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, ["m1"]);

        let (beyond, _) = repo
            .list_page("c1", &PageRequest { page: 4, limit: 2 })
            .await
            .expect("page 4");
        assert!(beyond.is_empty());
    }

    #[tokio::test]
    async fn mark_read_skips_the_readers_own_messages() {
        let repo = InMemoryMessageRepository::new();
        repo.append(&sample("m1", "guest-1", "hi")).await.expect("append");
        repo.append(&sample("m2", "host-1", "hello")).await.expect("append");

        let flipped = repo
            .mark_read_from_others("c1", "host-1", 42)
            .await
            .expect("mark");
        assert_eq!(flipped, 1);

        let mine = repo.get("m2").await.expect("get").expect("some");
        assert!(!mine.read);
        let theirs = repo.get("m1").await.expect("get").expect("some");
        assert!(theirs.read);
        assert_eq!(theirs.read_at_ms, Some(42));

        // Second pass finds nothing left to flip.
        let flipped = repo
            .mark_read_from_others("c1", "host-1", 43)
            .await
            .expect("mark again");
        assert_eq!(flipped, 0);
    }

    #[tokio::test]
    async fn delete_removes_from_both_tables() {
        let repo = InMemoryMessageRepository::new();
        repo.append(&sample("m1", "guest-1", "hi")).await.expect("append");

        assert!(repo.delete("m1").await.expect("delete"));
        assert!(!repo.delete("m1").await.expect("delete again"));

        let (page, total) = repo
            .list_page("c1", &PageRequest { page: 1, limit: 50 })
            .await
            .expect("list");
        assert!(page.is_empty());
        assert_eq!(total, 0);
    }
}

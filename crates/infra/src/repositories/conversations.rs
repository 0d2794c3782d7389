use std::collections::HashMap;
use std::sync::Arc;

use staylink_domain::DomainResult;
use staylink_domain::conversations::{
    Conversation, ConversationStatus, LastMessage, ParticipantPair,
};
use staylink_domain::error::DomainError;
use staylink_domain::ports::BoxFuture;
use staylink_domain::ports::conversations::ConversationRepository;
use staylink_domain::util::now_ms;
use tokio::sync::RwLock;

#[derive(Default)]
struct ConversationTables {
    by_id: HashMap<String, Conversation>,
    // Uniqueness index on (participant pair, listing id).
    by_key: HashMap<(ParticipantPair, String), String>,
}

/// Conversation store backed by process memory. Both tables live behind one
/// lock so `create` can check the uniqueness index and insert atomically.
#[derive(Default)]
pub struct InMemoryConversationRepository {
    tables: Arc<RwLock<ConversationTables>>,
}

impl InMemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn conversation_key(conversation: &Conversation) -> DomainResult<(ParticipantPair, String)> {
    let pair = conversation
        .participant_pair()
        .ok_or_else(|| DomainError::Validation("exactly two participants required".into()))?;
    Ok((pair, conversation.listing_id.clone().unwrap_or_default()))
}

impl ConversationRepository for InMemoryConversationRepository {
    fn create(&self, conversation: &Conversation) -> BoxFuture<'_, DomainResult<Conversation>> {
        let conversation = conversation.clone();
        let tables = self.tables.clone();
        Box::pin(async move {
            let key = conversation_key(&conversation)?;
            let mut tables = tables.write().await;
            if tables.by_key.contains_key(&key) {
                tracing::debug!(
                    conversation_id = %conversation.conversation_id,
                    "conversation already exists for this pair and listing"
                );
                return Err(DomainError::Conflict);
            }
            tables
                .by_key
                .insert(key, conversation.conversation_id.clone());
            tables
                .by_id
                .insert(conversation.conversation_id.clone(), conversation.clone());
            Ok(conversation)
        })
    }

    fn get(&self, conversation_id: &str) -> BoxFuture<'_, DomainResult<Option<Conversation>>> {
        let conversation_id = conversation_id.to_string();
        let tables = self.tables.clone();
        Box::pin(async move { Ok(tables.read().await.by_id.get(&conversation_id).cloned()) })
    }

    fn find_by_pair_and_listing(
        &self,
        pair: &ParticipantPair,
        listing_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Conversation>>> {
        let key = (pair.clone(), listing_id.to_string());
        let tables = self.tables.clone();
        Box::pin(async move {
            let tables = tables.read().await;
            let Some(id) = tables.by_key.get(&key) else {
                return Ok(None);
            };
            Ok(tables.by_id.get(id).cloned())
        })
    }

    fn list_active_for_user(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<Conversation>>> {
        let user_id = user_id.to_string();
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut output: Vec<_> = tables
                .read()
                .await
                .by_id
                .values()
                .filter(|conversation| {
                    conversation.status == ConversationStatus::Active
                        && conversation.is_participant(&user_id)
                })
                .cloned()
                .collect();
            output.sort_by(|a, b| {
                b.updated_at_ms
                    .cmp(&a.updated_at_ms)
                    .then_with(|| b.conversation_id.cmp(&a.conversation_id))
            });
            Ok(output)
        })
    }

    fn apply_message(
        &self,
        conversation_id: &str,
        last_message: &LastMessage,
        sender_id: &str,
    ) -> BoxFuture<'_, DomainResult<Conversation>> {
        let conversation_id = conversation_id.to_string();
        let last_message = last_message.clone();
        let sender_id = sender_id.to_string();
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut tables = tables.write().await;
            let conversation = tables
                .by_id
                .get_mut(&conversation_id)
                .ok_or(DomainError::NotFound)?;
            for participant in conversation.participants.clone() {
                if participant != sender_id {
                    conversation.unread_counts.increment(&participant);
                }
            }
            conversation.updated_at_ms = last_message.timestamp_ms.max(now_ms());
            conversation.last_message = Some(last_message);
            Ok(conversation.clone())
        })
    }

    fn reset_unread(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> BoxFuture<'_, DomainResult<Conversation>> {
        let conversation_id = conversation_id.to_string();
        let user_id = user_id.to_string();
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut tables = tables.write().await;
            let conversation = tables
                .by_id
                .get_mut(&conversation_id)
                .ok_or(DomainError::NotFound)?;
            conversation.unread_counts.reset(&user_id);
            Ok(conversation.clone())
        })
    }

    fn set_status(
        &self,
        conversation_id: &str,
        status: ConversationStatus,
    ) -> BoxFuture<'_, DomainResult<Conversation>> {
        let conversation_id = conversation_id.to_string();
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut tables = tables.write().await;
            let conversation = tables
                .by_id
                .get_mut(&conversation_id)
                .ok_or(DomainError::NotFound)?;
            conversation.status = status;
            conversation.updated_at_ms = now_ms();
            Ok(conversation.clone())
        })
    }
}

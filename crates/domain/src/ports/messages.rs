use crate::DomainResult;
use crate::messages::{Message, PageRequest};

/// Store contract for the append-only message log.
pub trait MessageRepository: Send + Sync {
    fn append(&self, message: &Message) -> crate::ports::BoxFuture<'_, DomainResult<Message>>;

    fn get(
        &self,
        message_id: &str,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Option<Message>>>;

    /// One page of a conversation's log. Page 1 holds the most recent
    /// `limit` messages; each page is returned in ascending
    /// `(created_at_ms, message_id)` order together with the total count.
    fn list_page(
        &self,
        conversation_id: &str,
        page: &PageRequest,
    ) -> crate::ports::BoxFuture<'_, DomainResult<(Vec<Message>, u64)>>;

    /// Flips `read` on every unread message not authored by `reader_id`.
    /// Returns how many messages changed. Idempotent.
    fn mark_read_from_others(
        &self,
        conversation_id: &str,
        reader_id: &str,
        read_at_ms: i64,
    ) -> crate::ports::BoxFuture<'_, DomainResult<u64>>;

    /// Hard delete. Returns false when the message was already gone.
    fn delete(&self, message_id: &str) -> crate::ports::BoxFuture<'_, DomainResult<bool>>;
}

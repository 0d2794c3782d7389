use crate::DomainResult;
use crate::conversations::{Conversation, ConversationStatus, LastMessage, ParticipantPair};

/// Store contract for conversation threads.
///
/// `create` must enforce uniqueness on `(participant pair, listing)` and
/// answer `Conflict` when a concurrent call got there first. `apply_message`
/// and `reset_unread` are single store operations: the unread counters are
/// never updated through read-modify-write in service code.
pub trait ConversationRepository: Send + Sync {
    fn create(
        &self,
        conversation: &Conversation,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Conversation>>;

    fn get(
        &self,
        conversation_id: &str,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Option<Conversation>>>;

    fn find_by_pair_and_listing(
        &self,
        pair: &ParticipantPair,
        listing_id: &str,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Option<Conversation>>>;

    /// Active conversations for a participant, most recently updated first.
    fn list_active_for_user(
        &self,
        user_id: &str,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Vec<Conversation>>>;

    /// Records a freshly appended message on the thread summary: sets
    /// `last_message`, increments every other participant's unread count and
    /// bumps `updated_at_ms`.
    fn apply_message(
        &self,
        conversation_id: &str,
        last_message: &LastMessage,
        sender_id: &str,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Conversation>>;

    /// Zeroes one participant's unread count. Idempotent.
    fn reset_unread(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Conversation>>;

    fn set_status(
        &self,
        conversation_id: &str,
        status: ConversationStatus,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Conversation>>;
}

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::DomainResult;
use crate::error::DomainError;
use crate::identity::{ActorIdentity, ListingSummary, UserProfile};
use crate::ports::conversations::ConversationRepository;
use crate::ports::directory::DirectoryLookup;
use crate::ports::messages::MessageRepository;
use crate::util::now_ms;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Archived,
    Blocked,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LastMessage {
    pub content: String,
    pub sender_id: String,
    pub timestamp_ms: i64,
}

/// Per-participant unread counters. A missing key reads as zero, so counters
/// never need to be pre-seeded and can never go negative.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct UnreadCounts(HashMap<String, u32>);

impl UnreadCounts {
    pub fn zeroed(participants: &[String]) -> Self {
        Self(
            participants
                .iter()
                .map(|participant| (participant.clone(), 0))
                .collect(),
        )
    }

    pub fn count_for(&self, user_id: &str) -> u32 {
        self.0.get(user_id).copied().unwrap_or(0)
    }

    pub fn increment(&mut self, user_id: &str) {
        *self.0.entry(user_id.to_string()).or_insert(0) += 1;
    }

    pub fn reset(&mut self, user_id: &str) {
        self.0.insert(user_id.to_string(), 0);
    }
}

/// Unordered participant pair; the uniqueness key for a thread is
/// `(pair, listing_id)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ParticipantPair {
    low: String,
    high: String,
}

impl ParticipantPair {
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self {
                low: a.to_string(),
                high: b.to_string(),
            }
        } else {
            Self {
                low: b.to_string(),
                high: a.to_string(),
            }
        }
    }

    pub fn members(&self) -> [&str; 2] {
        [&self.low, &self.high]
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub conversation_id: String,
    pub participants: Vec<String>,
    pub listing_id: Option<String>,
    pub booking_id: Option<String>,
    pub last_message: Option<LastMessage>,
    pub unread_counts: UnreadCounts,
    pub status: ConversationStatus,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl Conversation {
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }

    pub fn other_participant(&self, user_id: &str) -> Option<&str> {
        self.participants
            .iter()
            .find(|p| p.as_str() != user_id)
            .map(String::as_str)
    }

    pub fn participant_pair(&self) -> Option<ParticipantPair> {
        match self.participants.as_slice() {
            [a, b] => Some(ParticipantPair::new(a, b)),
            _ => None,
        }
    }
}

/// Full thread with populated collaborator summaries, as returned by
/// find-or-create.
#[derive(Clone, Debug, Serialize)]
pub struct ConversationView {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub participant_profiles: Vec<UserProfile>,
    pub listing: Option<ListingSummary>,
}

/// List-view row: the thread plus the caller's own unread count and the
/// counterpart's profile. Two-party threads only; for anything larger the
/// counterpart is simply the first participant that is not the caller.
#[derive(Clone, Debug, Serialize)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub other_participant: Option<UserProfile>,
    pub listing: Option<ListingSummary>,
    pub unread_count: u32,
}

#[derive(Clone, Debug)]
pub struct ConversationCreate {
    pub recipient_id: String,
    pub listing_id: String,
}

#[derive(Clone)]
pub struct ConversationService {
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    directory: Arc<dyn DirectoryLookup>,
}

impl ConversationService {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
        directory: Arc<dyn DirectoryLookup>,
    ) -> Self {
        Self {
            conversations,
            messages,
            directory,
        }
    }

    /// Finds the thread for `(actor, recipient, listing)` or lazily creates
    /// it. Repeated and concurrent calls converge on the same thread: a
    /// `Conflict` from the store's uniqueness key is resolved by re-reading.
    pub async fn find_or_create(
        &self,
        actor: &ActorIdentity,
        input: ConversationCreate,
    ) -> DomainResult<ConversationView> {
        let input = validate_conversation_create(input)?;
        let pair = ParticipantPair::new(&actor.user_id, &input.recipient_id);

        if let Some(existing) = self
            .conversations
            .find_by_pair_and_listing(&pair, &input.listing_id)
            .await?
        {
            return self.populate_view(existing).await;
        }

        let now = now_ms();
        let participants = vec![actor.user_id.clone(), input.recipient_id.clone()];
        let conversation = Conversation {
            conversation_id: crate::util::uuid_v7_without_dashes(),
            unread_counts: UnreadCounts::zeroed(&participants),
            participants,
            listing_id: Some(input.listing_id.clone()),
            booking_id: None,
            last_message: None,
            status: ConversationStatus::Active,
            created_at_ms: now,
            updated_at_ms: now,
        };

        match self.conversations.create(&conversation).await {
            Ok(created) => self.populate_view(created).await,
            Err(DomainError::Conflict) => {
                let existing = self
                    .conversations
                    .find_by_pair_and_listing(&pair, &input.listing_id)
                    .await?
                    .ok_or(DomainError::Conflict)?;
                self.populate_view(existing).await
            }
            Err(err) => Err(err),
        }
    }

    pub async fn list_for_user(
        &self,
        actor: &ActorIdentity,
    ) -> DomainResult<Vec<ConversationSummary>> {
        let conversations = self
            .conversations
            .list_active_for_user(&actor.user_id)
            .await?;

        let mut summaries = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            let other_participant = match conversation.other_participant(&actor.user_id) {
                Some(other) => Some(self.resolve_profile(other).await?),
                None => None,
            };
            let listing = self.resolve_listing(conversation.listing_id.as_deref()).await?;
            let unread_count = conversation.unread_counts.count_for(&actor.user_id);
            summaries.push(ConversationSummary {
                conversation,
                other_participant,
                listing,
                unread_count,
            });
        }
        Ok(summaries)
    }

    /// Marks the whole thread read for the actor: unread messages from other
    /// participants are flipped first, then the actor's counter is zeroed.
    /// Both writes are idempotent, so a retry after a partial failure
    /// converges rather than double-applying.
    pub async fn mark_read(
        &self,
        actor: &ActorIdentity,
        conversation_id: &str,
    ) -> DomainResult<u64> {
        let conversation = self.get_for_participant(conversation_id, actor).await?;
        let flipped = self
            .messages
            .mark_read_from_others(&conversation.conversation_id, &actor.user_id, now_ms())
            .await?;
        self.conversations
            .reset_unread(&conversation.conversation_id, &actor.user_id)
            .await?;
        Ok(flipped)
    }

    pub async fn archive(&self, actor: &ActorIdentity, conversation_id: &str) -> DomainResult<()> {
        let conversation = self.get_for_participant(conversation_id, actor).await?;
        self.conversations
            .set_status(&conversation.conversation_id, ConversationStatus::Archived)
            .await?;
        Ok(())
    }

    pub async fn get_for_participant(
        &self,
        conversation_id: &str,
        actor: &ActorIdentity,
    ) -> DomainResult<Conversation> {
        let conversation = self
            .conversations
            .get(conversation_id)
            .await?
            .ok_or(DomainError::NotFound)?;
        if !conversation.is_participant(&actor.user_id) {
            return Err(DomainError::Forbidden);
        }
        Ok(conversation)
    }

    async fn populate_view(&self, conversation: Conversation) -> DomainResult<ConversationView> {
        let mut participant_profiles = Vec::with_capacity(conversation.participants.len());
        for participant in &conversation.participants {
            participant_profiles.push(self.resolve_profile(participant).await?);
        }
        let listing = self.resolve_listing(conversation.listing_id.as_deref()).await?;
        Ok(ConversationView {
            conversation,
            participant_profiles,
            listing,
        })
    }

    async fn resolve_profile(&self, user_id: &str) -> DomainResult<UserProfile> {
        Ok(self
            .directory
            .user_profile(user_id)
            .await?
            .unwrap_or_else(|| UserProfile::from_user_id(user_id)))
    }

    async fn resolve_listing(
        &self,
        listing_id: Option<&str>,
    ) -> DomainResult<Option<ListingSummary>> {
        match listing_id {
            Some(listing_id) => self.directory.listing_summary(listing_id).await,
            None => Ok(None),
        }
    }
}

fn validate_conversation_create(mut input: ConversationCreate) -> DomainResult<ConversationCreate> {
    input.recipient_id = input.recipient_id.trim().to_string();
    input.listing_id = input.listing_id.trim().to_string();

    if input.recipient_id.is_empty() || input.listing_id.is_empty() {
        return Err(DomainError::Validation(
            "recipient_id and listing_id are required".into(),
        ));
    }

    // Clients have been observed to interpolate missing values as literal
    // "undefined"/"null" strings; reject those outright.
    for id in [&input.recipient_id, &input.listing_id] {
        if id == "undefined" || id == "null" {
            return Err(DomainError::Validation(format!("invalid id: {id}")));
        }
    }

    Ok(input)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::messages::{Message, PageRequest};
    use crate::ports::BoxFuture;
    use tokio::sync::RwLock;

    #[derive(Default)]
    pub(crate) struct MockConversationRepo {
        by_id: Arc<RwLock<HashMap<String, Conversation>>>,
        by_key: Arc<RwLock<HashMap<(ParticipantPair, String), String>>>,
    }

    impl ConversationRepository for MockConversationRepo {
        fn create(
            &self,
            conversation: &Conversation,
        ) -> BoxFuture<'_, DomainResult<Conversation>> {
            let conversation = conversation.clone();
            let by_id = self.by_id.clone();
            let by_key = self.by_key.clone();
            Box::pin(async move {
                let pair = conversation
                    .participant_pair()
                    .ok_or(DomainError::Validation("two participants required".into()))?;
                let listing = conversation.listing_id.clone().unwrap_or_default();
                let mut by_key = by_key.write().await;
                if by_key.contains_key(&(pair.clone(), listing.clone())) {
                    return Err(DomainError::Conflict);
                }
                by_key.insert((pair, listing), conversation.conversation_id.clone());
                by_id
                    .write()
                    .await
                    .insert(conversation.conversation_id.clone(), conversation.clone());
                Ok(conversation)
            })
        }

        fn get(&self, conversation_id: &str) -> BoxFuture<'_, DomainResult<Option<Conversation>>> {
            let conversation_id = conversation_id.to_string();
            let by_id = self.by_id.clone();
            Box::pin(async move { Ok(by_id.read().await.get(&conversation_id).cloned()) })
        }

        fn find_by_pair_and_listing(
            &self,
            pair: &ParticipantPair,
            listing_id: &str,
        ) -> BoxFuture<'_, DomainResult<Option<Conversation>>> {
            let key = (pair.clone(), listing_id.to_string());
            let by_id = self.by_id.clone();
            let by_key = self.by_key.clone();
            Box::pin(async move {
                let Some(id) = by_key.read().await.get(&key).cloned() else {
                    return Ok(None);
                };
                Ok(by_id.read().await.get(&id).cloned())
            })
        }

        fn list_active_for_user(
            &self,
            user_id: &str,
        ) -> BoxFuture<'_, DomainResult<Vec<Conversation>>> {
            let user_id = user_id.to_string();
            let by_id = self.by_id.clone();
            Box::pin(async move {
                let mut output: Vec<_> = by_id
                    .read()
                    .await
                    .values()
                    .filter(|conversation| {
                        conversation.status == ConversationStatus::Active
                            && conversation.is_participant(&user_id)
                    })
                    .cloned()
                    .collect();
                output.sort_by(|a, b| b.updated_at_ms.cmp(&a.updated_at_ms));
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
            let by_id = self.by_id.clone();
            Box::pin(async move {
                let mut by_id = by_id.write().await;
                let conversation = by_id
                    .get_mut(&conversation_id)
                    .ok_or(DomainError::NotFound)?;
                for participant in conversation.participants.clone() {
                    if participant != sender_id {
                        conversation.unread_counts.increment(&participant);
                    }
                }
                conversation.updated_at_ms = last_message.timestamp_ms;
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
            let by_id = self.by_id.clone();
            Box::pin(async move {
                let mut by_id = by_id.write().await;
                let conversation = by_id
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
            let by_id = self.by_id.clone();
            Box::pin(async move {
                let mut by_id = by_id.write().await;
                let conversation = by_id
                    .get_mut(&conversation_id)
                    .ok_or(DomainError::NotFound)?;
                conversation.status = status;
                Ok(conversation.clone())
            })
        }
    }

    #[derive(Default)]
    pub(crate) struct MockMessageRepo {
        marked: Arc<RwLock<Vec<(String, String)>>>,
    }

    impl MessageRepository for MockMessageRepo {
        fn append(&self, message: &Message) -> BoxFuture<'_, DomainResult<Message>> {
            let message = message.clone();
            Box::pin(async move { Ok(message) })
        }

        fn get(&self, _message_id: &str) -> BoxFuture<'_, DomainResult<Option<Message>>> {
            Box::pin(async move { Ok(None) })
        }

        fn list_page(
            &self,
            _conversation_id: &str,
            _page: &PageRequest,
        ) -> BoxFuture<'_, DomainResult<(Vec<Message>, u64)>> {
            Box::pin(async move { Ok((Vec::new(), 0)) })
        }

        fn mark_read_from_others(
            &self,
            conversation_id: &str,
            reader_id: &str,
            _read_at_ms: i64,
        ) -> BoxFuture<'_, DomainResult<u64>> {
            let entry = (conversation_id.to_string(), reader_id.to_string());
            let marked = self.marked.clone();
            Box::pin(async move {
                marked.write().await.push(entry);
                Ok(0)
            })
        }

        fn delete(&self, _message_id: &str) -> BoxFuture<'_, DomainResult<bool>> {
            Box::pin(async move { Ok(false) })
        }
    }

    pub(crate) struct EmptyDirectory;

    impl DirectoryLookup for EmptyDirectory {
        fn user_profile(
            &self,
            _user_id: &str,
        ) -> BoxFuture<'_, DomainResult<Option<UserProfile>>> {
            Box::pin(async move { Ok(None) })
        }

        fn listing_summary(
            &self,
            _listing_id: &str,
        ) -> BoxFuture<'_, DomainResult<Option<ListingSummary>>> {
            Box::pin(async move { Ok(None) })
        }
    }

    fn service() -> ConversationService {
        ConversationService::new(
            Arc::new(MockConversationRepo::default()),
            Arc::new(MockMessageRepo::default()),
            Arc::new(EmptyDirectory),
        )
    }

    fn create_input() -> ConversationCreate {
        ConversationCreate {
            recipient_id: "host-1".to_string(),
            listing_id: "listing-1".to_string(),
        }
    }

    #[tokio::test]
    async fn find_or_create_is_idempotent_for_the_same_pair_and_listing() {
        let service = service();
        let guest = ActorIdentity::with_user_id("guest-1");
        let host = ActorIdentity::with_user_id("host-1");

        let first = service
            .find_or_create(&guest, create_input())
            .await
            .expect("first");
        let second = service
            .find_or_create(&guest, create_input())
            .await
            .expect("second");
        assert_eq!(
            first.conversation.conversation_id,
            second.conversation.conversation_id
        );

        // The reverse direction hits the same normalized pair key.
        let reversed = service
            .find_or_create(
                &host,
                ConversationCreate {
                    recipient_id: "guest-1".to_string(),
                    listing_id: "listing-1".to_string(),
                },
            )
            .await
            .expect("reversed");
        assert_eq!(
            first.conversation.conversation_id,
            reversed.conversation.conversation_id
        );
    }

    #[tokio::test]
    async fn find_or_create_recovers_from_a_losing_race() {
        let repo = Arc::new(MockConversationRepo::default());
        let service = ConversationService::new(
            repo.clone(),
            Arc::new(MockMessageRepo::default()),
            Arc::new(EmptyDirectory),
        );
        let guest = ActorIdentity::with_user_id("guest-1");

        // Simulate the competing writer landing first.
        let now = now_ms();
        let participants = vec!["guest-1".to_string(), "host-1".to_string()];
        let winner = Conversation {
            conversation_id: "conv-winner".to_string(),
            unread_counts: UnreadCounts::zeroed(&participants),
            participants,
            listing_id: Some("listing-1".to_string()),
            booking_id: None,
            last_message: None,
            status: ConversationStatus::Active,
            created_at_ms: now,
            updated_at_ms: now,
        };
        repo.create(&winner).await.expect("winner");

        let view = service
            .find_or_create(&guest, create_input())
            .await
            .expect("view");
        assert_eq!(view.conversation.conversation_id, "conv-winner");
    }

    #[tokio::test]
    async fn mark_read_zeroes_the_callers_counter_only() {
        let repo = Arc::new(MockConversationRepo::default());
        let service = ConversationService::new(
            repo.clone(),
            Arc::new(MockMessageRepo::default()),
            Arc::new(EmptyDirectory),
        );
        let guest = ActorIdentity::with_user_id("guest-1");
        let view = service
            .find_or_create(&guest, create_input())
            .await
            .expect("view");
        let id = view.conversation.conversation_id;

        repo.apply_message(
            &id,
            &LastMessage {
                content: "hello".to_string(),
                sender_id: "guest-1".to_string(),
                timestamp_ms: now_ms(),
            },
            "guest-1",
        )
        .await
        .expect("apply");

        let host = ActorIdentity::with_user_id("host-1");
        service.mark_read(&host, &id).await.expect("mark read");
        service.mark_read(&host, &id).await.expect("second mark read");

        let conversation = repo.get(&id).await.expect("get").expect("some");
        assert_eq!(conversation.unread_counts.count_for("host-1"), 0);
        assert_eq!(conversation.unread_counts.count_for("guest-1"), 0);
    }

    #[tokio::test]
    async fn non_participants_are_rejected() {
        let service = service();
        let guest = ActorIdentity::with_user_id("guest-1");
        let view = service
            .find_or_create(&guest, create_input())
            .await
            .expect("view");
        let stranger = ActorIdentity::with_user_id("stranger-9");

        let err = service
            .mark_read(&stranger, &view.conversation.conversation_id)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Forbidden));

        let err = service
            .archive(&stranger, &view.conversation.conversation_id)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Forbidden));
    }

    #[tokio::test]
    async fn archived_threads_drop_out_of_the_active_list() {
        let service = service();
        let guest = ActorIdentity::with_user_id("guest-1");
        let view = service
            .find_or_create(&guest, create_input())
            .await
            .expect("view");

        assert_eq!(service.list_for_user(&guest).await.expect("list").len(), 1);
        service
            .archive(&guest, &view.conversation.conversation_id)
            .await
            .expect("archive");
        assert!(service.list_for_user(&guest).await.expect("list").is_empty());
    }

    #[test]
    fn create_validation_rejects_placeholder_ids() {
        for bad in ["undefined", "null", "  ", ""] {
            let err = validate_conversation_create(ConversationCreate {
                recipient_id: bad.to_string(),
                listing_id: "listing-1".to_string(),
            })
            .unwrap_err();
            assert!(matches!(err, DomainError::Validation(_)));
        }
    }

    #[test]
    fn unread_counts_treat_missing_keys_as_zero() {
        let mut counts = UnreadCounts::default();
        assert_eq!(counts.count_for("anyone"), 0);
        counts.increment("host-1");
        counts.increment("host-1");
        assert_eq!(counts.count_for("host-1"), 2);
        counts.reset("host-1");
        counts.reset("host-1");
        assert_eq!(counts.count_for("host-1"), 0);
    }

    #[test]
    fn participant_pair_is_order_insensitive() {
        assert_eq!(
            ParticipantPair::new("a", "b"),
            ParticipantPair::new("b", "a")
        );
    }
}

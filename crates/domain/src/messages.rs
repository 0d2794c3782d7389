use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::conversations::{Conversation, LastMessage};
use crate::error::DomainError;
use crate::identity::{ActorIdentity, UserProfile};
use crate::ports::conversations::ConversationRepository;
use crate::ports::directory::DirectoryLookup;
use crate::ports::messages::MessageRepository;
use crate::util::now_ms;

pub const MAX_MESSAGE_CONTENT_CHARS: usize = 2000;
pub const DEFAULT_PAGE_LIMIT: u32 = 50;
pub const MAX_PAGE_LIMIT: u32 = 100;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    Booking,
    System,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub message_id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub message_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking_id: Option<String>,
    pub read: bool,
    pub read_at_ms: Option<i64>,
    pub created_at_ms: i64,
    /// Display profile of the sender, filled in from the directory when the
    /// message leaves the service layer. Never persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<UserProfile>,
}

#[derive(Clone, Debug)]
pub struct AppendMessageInput {
    pub conversation_id: String,
    pub content: String,
    pub message_type: MessageType,
    pub image_url: Option<String>,
    pub booking_id: Option<String>,
}

impl AppendMessageInput {
    /// Plain text message, the overwhelmingly common case.
    pub fn text(conversation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            content: content.into(),
            message_type: MessageType::Text,
            image_url: None,
            booking_id: None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

/// Clamps raw query values into a usable page request: page floors at 1,
/// limit defaults to 50 and is capped at 100.
pub fn build_page_request(page: Option<u32>, limit: Option<u32>) -> PageRequest {
    PageRequest {
        page: page.unwrap_or(1).max(1),
        limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
    }
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub struct Pagination {
    pub current_page: u32,
    pub total_pages: u32,
    pub total_messages: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub pagination: Pagination,
}

#[derive(Clone)]
pub struct MessageService {
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    directory: Arc<dyn DirectoryLookup>,
}

impl MessageService {
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

    /// Appends a message to a thread the actor participates in and folds it
    /// into the thread summary. Returns the stored message together with the
    /// updated conversation so callers can fan out to the other participants.
    pub async fn append(
        &self,
        actor: &ActorIdentity,
        input: AppendMessageInput,
    ) -> DomainResult<(Message, Conversation)> {
        let input = validate_append_input(input)?;
        let conversation = self
            .conversations
            .get(&input.conversation_id)
            .await?
            .ok_or(DomainError::NotFound)?;
        if !conversation.is_participant(&actor.user_id) {
            return Err(DomainError::Forbidden);
        }

        let message = Message {
            message_id: crate::util::uuid_v7_without_dashes(),
            conversation_id: conversation.conversation_id.clone(),
            sender_id: actor.user_id.clone(),
            content: input.content,
            message_type: input.message_type,
            image_url: input.image_url,
            booking_id: input.booking_id,
            read: false,
            read_at_ms: None,
            created_at_ms: now_ms(),
            sender: None,
        };
        let mut message = self.messages.append(&message).await?;
        message.sender = Some(self.resolve_sender(&message.sender_id).await?);

        let last_message = LastMessage {
            content: message.content.clone(),
            sender_id: message.sender_id.clone(),
            timestamp_ms: message.created_at_ms,
        };
        let conversation = self
            .conversations
            .apply_message(&conversation.conversation_id, &last_message, &actor.user_id)
            .await?;

        Ok((message, conversation))
    }

    /// One page of a thread's history for a participant. Opening a page marks
    /// the thread read for the actor before the messages are fetched, so the
    /// page the client renders already carries the updated read flags.
    pub async fn list(
        &self,
        actor: &ActorIdentity,
        conversation_id: &str,
        page: PageRequest,
    ) -> DomainResult<MessagePage> {
        let conversation = self
            .conversations
            .get(conversation_id)
            .await?
            .ok_or(DomainError::NotFound)?;
        if !conversation.is_participant(&actor.user_id) {
            return Err(DomainError::Forbidden);
        }

        self.messages
            .mark_read_from_others(conversation_id, &actor.user_id, now_ms())
            .await?;
        self.conversations
            .reset_unread(conversation_id, &actor.user_id)
            .await?;

        let (mut messages, total) = self.messages.list_page(conversation_id, &page).await?;
        for message in &mut messages {
            message.sender = Some(self.resolve_sender(&message.sender_id).await?);
        }
        let total_pages = (total as u32).div_ceil(page.limit);
        Ok(MessagePage {
            messages,
            pagination: Pagination {
                current_page: page.page,
                total_pages,
                total_messages: total,
            },
        })
    }

    /// Sender-only hard delete. The thread's `last_message` is left as is
    /// even when the deleted message was the latest one.
    pub async fn delete(&self, actor: &ActorIdentity, message_id: &str) -> DomainResult<()> {
        let message = self
            .messages
            .get(message_id)
            .await?
            .ok_or(DomainError::NotFound)?;
        if message.sender_id != actor.user_id {
            return Err(DomainError::Forbidden);
        }
        if !self.messages.delete(message_id).await? {
            return Err(DomainError::NotFound);
        }
        Ok(())
    }

    async fn resolve_sender(&self, user_id: &str) -> DomainResult<UserProfile> {
        Ok(self
            .directory
            .user_profile(user_id)
            .await?
            .unwrap_or_else(|| UserProfile::from_user_id(user_id)))
    }
}

fn validate_append_input(mut input: AppendMessageInput) -> DomainResult<AppendMessageInput> {
    input.conversation_id = input.conversation_id.trim().to_string();
    if input.conversation_id.is_empty() {
        return Err(DomainError::Validation("conversation_id is required".into()));
    }
    if input.content.trim().is_empty() {
        return Err(DomainError::Validation("content is required".into()));
    }
    if input.content.chars().count() > MAX_MESSAGE_CONTENT_CHARS {
        return Err(DomainError::Validation(format!(
            "content exceeds {MAX_MESSAGE_CONTENT_CHARS} characters"
        )));
    }
    match input.message_type {
        MessageType::Image if input.image_url.is_none() => {
            return Err(DomainError::Validation(
                "image messages require image_url".into(),
            ));
        }
        MessageType::Booking if input.booking_id.is_none() => {
            return Err(DomainError::Validation(
                "booking messages require booking_id".into(),
            ));
        }
        _ => {}
    }
    if input.image_url.is_some() && input.message_type != MessageType::Image {
        return Err(DomainError::Validation(
            "image_url is only valid on image messages".into(),
        ));
    }
    if input.booking_id.is_some() && input.message_type != MessageType::Booking {
        return Err(DomainError::Validation(
            "booking_id is only valid on booking messages".into(),
        ));
    }
    Ok(input)
}

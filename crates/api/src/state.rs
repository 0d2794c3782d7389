use std::sync::Arc;

use staylink_domain::ports::conversations::ConversationRepository;
use staylink_domain::ports::directory::DirectoryLookup;
use staylink_domain::ports::messages::MessageRepository;
use staylink_domain::presence::PresenceRegistry;
use staylink_infra::config::AppConfig;
use staylink_infra::repositories::{
    InMemoryConversationRepository, InMemoryDirectory, InMemoryMessageRepository,
};

use crate::realtime::RealtimeHub;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub conversation_repo: Arc<dyn ConversationRepository>,
    pub message_repo: Arc<dyn MessageRepository>,
    pub directory: Arc<dyn DirectoryLookup>,
    pub presence: Arc<PresenceRegistry>,
    pub realtime: Arc<RealtimeHub>,
}

impl AppState {
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        if !config.data_backend.eq_ignore_ascii_case("memory") {
            anyhow::bail!("unsupported data backend: {}", config.data_backend);
        }
        Ok(Self::with_repositories(
            config,
            Arc::new(InMemoryConversationRepository::new()),
            Arc::new(InMemoryMessageRepository::new()),
            Arc::new(InMemoryDirectory::new()),
        ))
    }

    pub fn with_repositories(
        config: AppConfig,
        conversation_repo: Arc<dyn ConversationRepository>,
        message_repo: Arc<dyn MessageRepository>,
        directory: Arc<dyn DirectoryLookup>,
    ) -> Self {
        let realtime = Arc::new(RealtimeHub::new(config.realtime_channel_capacity));
        Self {
            config,
            conversation_repo,
            message_repo,
            directory,
            presence: Arc::new(PresenceRegistry::new()),
            realtime,
        }
    }
}

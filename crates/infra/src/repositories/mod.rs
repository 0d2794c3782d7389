mod conversations;
mod directory;
mod messages;

pub use conversations::InMemoryConversationRepository;
pub use directory::InMemoryDirectory;
pub use messages::InMemoryMessageRepository;

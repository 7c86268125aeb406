//! Chat history kept in a pluggable key-value storage medium

pub mod session_store;
pub mod storage;

pub use session_store::{
    generate_title, ChatMessage, ChatSession, ChatSessionStore, Role, DEFAULT_MAX_SESSIONS,
    SESSIONS_KEY,
};
pub use storage::{FileStorage, InMemoryStorage, SessionStorage};

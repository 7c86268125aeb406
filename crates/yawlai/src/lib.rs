pub mod ads;
pub mod api;
pub mod completion;
pub mod config;
pub mod history;
pub mod import;
pub mod metrics;
pub mod server;
pub mod shared_state;
pub mod store;
pub mod telemetry;

// Public API exports
pub use ads::{AdProcessor, KeywordCache, KeywordSource, SessionContext};
pub use completion::{CompletionChunk, CompletionClient, CompletionError};
pub use config::Config;
pub use history::{ChatMessage, ChatSession, ChatSessionStore, FileStorage, InMemoryStorage, SessionStorage};
pub use import::{ImportFileKind, ImportReport, KeywordImporter};
pub use server::{build_router, run_server};
pub use shared_state::AppState;
pub use store::{Database, KeywordError};

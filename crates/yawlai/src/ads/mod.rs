//! Keyword hyperlink injection for assistant messages

pub mod keyword_cache;
pub mod ad_processor;

pub use keyword_cache::{CacheStatus, KeywordCache, KeywordSource};
pub use ad_processor::{AdProcessor, ProcessedMessage, SessionContext};

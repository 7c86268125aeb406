//! Chat session persistence.
//!
//! All sessions live under one storage key as a JSON array, most recent
//! first. Without a storage medium every read is empty and every write is a
//! no-op. Stored JSON that no longer parses is logged and treated as empty.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::history::storage::SessionStorage;

pub const SESSIONS_KEY: &str = "yawlai_chat_sessions";
pub const DEFAULT_MAX_SESSIONS: usize = 100;
const TITLE_WORDS: usize = 6;
const UNTITLED: &str = "New Chat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    pub messages: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// First six words of `text` followed by `...`, or `text` itself when it
/// has six words or fewer.
pub fn generate_title(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= TITLE_WORDS {
        text.to_string()
    } else {
        format!("{}...", words[..TITLE_WORDS].join(" "))
    }
}

pub struct ChatSessionStore {
    storage: Option<Arc<dyn SessionStorage>>,
    max_sessions: usize,
    write_lock: Mutex<()>,
}

impl ChatSessionStore {
    pub fn new(storage: Option<Arc<dyn SessionStorage>>) -> Self {
        Self::with_max_sessions(storage, DEFAULT_MAX_SESSIONS)
    }

    pub fn with_max_sessions(storage: Option<Arc<dyn SessionStorage>>, max_sessions: usize) -> Self {
        Self {
            storage,
            max_sessions: max_sessions.max(1),
            write_lock: Mutex::new(()),
        }
    }

    pub fn get_sessions(&self) -> Vec<ChatSession> {
        let Some(storage) = &self.storage else {
            return Vec::new();
        };
        let raw = match storage.get(SESSIONS_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("Failed to read chat sessions: {}", e);
                return Vec::new();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!("Stored chat sessions are unreadable, ignoring them: {}", e);
                Vec::new()
            }
        }
    }

    pub fn get_session(&self, id: &str) -> Option<ChatSession> {
        self.get_sessions().into_iter().find(|s| s.id == id)
    }

    fn write_sessions(&self, sessions: &[ChatSession]) -> anyhow::Result<()> {
        if let Some(storage) = &self.storage {
            storage.set(SESSIONS_KEY, &serde_json::to_string(sessions)?)?;
        }
        Ok(())
    }

    /// Upsert by id. New sessions go to the front and the oldest entries
    /// beyond the limit are dropped.
    pub fn save_session(&self, session: &ChatSession) -> anyhow::Result<()> {
        if self.storage.is_none() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut sessions = self.get_sessions();
        match sessions.iter_mut().find(|s| s.id == session.id) {
            Some(existing) => *existing = session.clone(),
            None => sessions.insert(0, session.clone()),
        }
        sessions.truncate(self.max_sessions);
        self.write_sessions(&sessions)?;
        debug!("Saved chat session {} ({} stored)", session.id, sessions.len());
        Ok(())
    }

    /// Returns whether a session was removed.
    pub fn delete_session(&self, id: &str) -> anyhow::Result<bool> {
        if self.storage.is_none() {
            return Ok(false);
        }
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut sessions = self.get_sessions();
        let before = sessions.len();
        sessions.retain(|s| s.id != id);
        if sessions.len() == before {
            return Ok(false);
        }
        self.write_sessions(&sessions)?;
        Ok(true)
    }

    pub fn clear_all_sessions(&self) -> anyhow::Result<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        storage.remove(SESSIONS_KEY)?;
        info!("Cleared all chat sessions");
        Ok(())
    }

    pub fn export_session(&self, id: &str) -> Option<String> {
        let session = self.get_session(id)?;
        serde_json::to_string_pretty(&session).ok()
    }

    pub fn export_all_sessions(&self) -> String {
        serde_json::to_string_pretty(&self.get_sessions()).unwrap_or_else(|_| "[]".to_string())
    }

    /// Build a new, unsaved session titled after its first user message.
    pub fn create_session(&self, messages: Vec<ChatMessage>) -> ChatSession {
        let title = messages
            .iter()
            .find(|m| m.role == Role::User && !m.content.trim().is_empty())
            .map(|m| generate_title(&m.content))
            .unwrap_or_else(|| UNTITLED.to_string());
        let now = Utc::now();
        ChatSession {
            id: Uuid::new_v4().to_string(),
            title,
            messages,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the messages of session `id` if it exists, otherwise create
    /// and save a new session.
    pub fn record_exchange(
        &self,
        id: Option<&str>,
        messages: Vec<ChatMessage>,
    ) -> anyhow::Result<ChatSession> {
        let session = match id.and_then(|id| self.get_session(id)) {
            Some(mut session) => {
                session.messages = messages;
                session.updated_at = Utc::now();
                session
            }
            None => self.create_session(messages),
        };
        self.save_session(&session)?;
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::storage::{FileStorage, InMemoryStorage};
    use proptest::prelude::*;

    fn store() -> ChatSessionStore {
        ChatSessionStore::new(Some(Arc::new(InMemoryStorage::new())))
    }

    fn conversation(question: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage::new(Role::User, question),
            ChatMessage::new(Role::Assistant, "Sure."),
        ]
    }

    #[test]
    fn test_title_examples() {
        assert_eq!(generate_title("Best running shoes?"), "Best running shoes?");
        assert_eq!(generate_title("one two three four five six"), "one two three four five six");
        assert_eq!(
            generate_title("What are the best   running shoes for marathon training"),
            "What are the best running shoes..."
        );
    }

    #[test]
    fn test_create_session_titles() {
        let store = store();
        let session = store.create_session(conversation("Tell me about Nike"));
        assert_eq!(session.title, "Tell me about Nike");
        assert_eq!(session.created_at, session.updated_at);
        assert!(Uuid::parse_str(&session.id).is_ok());

        let session = store.create_session(vec![ChatMessage::new(Role::Assistant, "Hello!")]);
        assert_eq!(session.title, "New Chat");
    }

    #[test]
    fn test_upsert_keeps_position() {
        let store = store();
        let first = store.create_session(conversation("first"));
        let second = store.create_session(conversation("second"));
        store.save_session(&first).unwrap();
        store.save_session(&second).unwrap();

        let mut edited = first.clone();
        edited.title = "renamed".to_string();
        store.save_session(&edited).unwrap();

        let sessions = store.get_sessions();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id, second.id);
        assert_eq!(sessions[1].title, "renamed");
    }

    #[test]
    fn test_oldest_evicted_past_limit() {
        let store = store();
        let mut ids = Vec::new();
        for i in 0..101 {
            let session = store.create_session(conversation(&format!("question {}", i)));
            store.save_session(&session).unwrap();
            ids.push(session.id);
        }

        let sessions = store.get_sessions();
        assert_eq!(sessions.len(), 100);
        assert_eq!(sessions[0].id, ids[100]);
        assert!(sessions.iter().all(|s| s.id != ids[0]));
    }

    #[test]
    fn test_roundtrip_preserves_order_and_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn SessionStorage> = Arc::new(FileStorage::new(dir.path()).unwrap());
        let store = ChatSessionStore::new(Some(storage.clone()));
        let session = store.create_session(conversation("Where can I buy shoes?"));
        store.save_session(&session).unwrap();

        let raw = storage.get(SESSIONS_KEY).unwrap().unwrap();
        assert!(raw.contains("\"createdAt\""));
        assert!(raw.contains("\"role\":\"user\""));

        let loaded = ChatSessionStore::new(Some(storage)).get_sessions();
        assert_eq!(loaded, vec![session.clone()]);
        assert_eq!(loaded[0].messages[0].timestamp, session.messages[0].timestamp);
        assert_eq!(loaded[0].messages[1].role, Role::Assistant);
    }

    #[test]
    fn test_delete_and_clear() {
        let store = store();
        let a = store.create_session(conversation("a"));
        let b = store.create_session(conversation("b"));
        store.save_session(&a).unwrap();
        store.save_session(&b).unwrap();

        assert!(store.delete_session(&a.id).unwrap());
        assert!(!store.delete_session(&a.id).unwrap());
        assert_eq!(store.get_sessions().len(), 1);

        store.clear_all_sessions().unwrap();
        assert!(store.get_sessions().is_empty());
    }

    #[test]
    fn test_exports() {
        let store = store();
        let session = store.create_session(conversation("export me"));
        store.save_session(&session).unwrap();

        let single = store.export_session(&session.id).unwrap();
        let parsed: ChatSession = serde_json::from_str(&single).unwrap();
        assert_eq!(parsed, session);
        assert!(single.contains('\n'));

        assert!(store.export_session("missing").is_none());
        let all: Vec<ChatSession> = serde_json::from_str(&store.export_all_sessions()).unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn test_record_exchange_updates_or_creates() {
        let store = store();
        let created = store.record_exchange(None, conversation("hello there")).unwrap();

        let mut messages = created.messages.clone();
        messages.push(ChatMessage::new(Role::User, "and another thing"));
        let updated = store.record_exchange(Some(&created.id), messages).unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.title, "hello there");
        assert!(updated.updated_at >= created.updated_at);
        assert_eq!(store.get_sessions().len(), 1);
        assert_eq!(store.get_sessions()[0].messages.len(), 3);

        let other = store.record_exchange(Some("unknown-id"), conversation("new")).unwrap();
        assert_ne!(other.id, "unknown-id");
        assert_eq!(store.get_sessions().len(), 2);
    }

    #[test]
    fn test_without_storage_everything_is_a_noop() {
        let store = ChatSessionStore::new(None);
        let session = store.create_session(conversation("hi"));
        store.save_session(&session).unwrap();
        assert!(store.get_sessions().is_empty());
        assert!(!store.delete_session(&session.id).unwrap());
        store.clear_all_sessions().unwrap();
        assert!(store.export_session(&session.id).is_none());
        assert_eq!(store.export_all_sessions(), "[]");
    }

    #[test]
    fn test_corrupt_storage_reads_as_empty() {
        let storage: Arc<dyn SessionStorage> = Arc::new(InMemoryStorage::new());
        storage.set(SESSIONS_KEY, "{not json").unwrap();
        let store = ChatSessionStore::new(Some(storage));
        assert!(store.get_sessions().is_empty());

        let session = store.create_session(conversation("recover"));
        store.save_session(&session).unwrap();
        assert_eq!(store.get_sessions().len(), 1);
    }

    proptest! {
        #[test]
        fn prop_title_is_first_six_words(words in proptest::collection::vec("[a-zA-Z0-9?!]{1,8}", 1..15)) {
            let text = words.join(" ");
            let title = generate_title(&text);
            if words.len() <= 6 {
                prop_assert_eq!(title, text);
            } else {
                prop_assert_eq!(title, format!("{}...", words[..6].join(" ")));
            }
        }
    }
}

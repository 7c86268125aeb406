use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::store::schema::*;

pub const MAX_KEYWORD_LEN: usize = 100;

/// Errors surfaced to whoever initiated a keyword mutation.
#[derive(Debug, Error)]
pub enum KeywordError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Keyword already exists: {0}")]
    Duplicate(String),

    #[error("Keyword not found: {0}")]
    NotFound(i64),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

/// Partial update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct KeywordUpdate {
    pub keyword: Option<String>,
    pub target_url: Option<String>,
    pub active: Option<bool>,
}

/// Trim and bound-check keyword text.
pub fn validate_keyword_text(keyword: &str) -> Result<String, KeywordError> {
    let trimmed = keyword.trim();
    if trimmed.is_empty() {
        return Err(KeywordError::Validation("Keyword is required".to_string()));
    }
    if trimmed.chars().count() > MAX_KEYWORD_LEN {
        return Err(KeywordError::Validation(format!(
            "Keyword must be at most {} characters",
            MAX_KEYWORD_LEN
        )));
    }
    Ok(trimmed.to_string())
}

/// Comparison key for keyword uniqueness: trimmed and Unicode lower-cased.
pub fn keyword_key(keyword: &str) -> String {
    keyword.trim().to_lowercase()
}

/// Accept only absolute http(s) URLs with a host. Callers store the trimmed
/// input, not the normalized form.
pub fn validate_target_url(target_url: &str) -> Result<Url, KeywordError> {
    let trimmed = target_url.trim();
    if trimmed.is_empty() {
        return Err(KeywordError::Validation("Target URL is required".to_string()));
    }
    let url = Url::parse(trimmed)
        .map_err(|e| KeywordError::Validation(format!("Invalid URL '{}': {}", trimmed, e)))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(KeywordError::Validation(format!(
            "Invalid URL '{}': must be an http(s) address",
            trimmed
        )));
    }
    Ok(url)
}

#[derive(Clone)]
pub struct KeywordStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl KeywordStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>, KeywordError> {
        Ok(self.pool.get()?)
    }

    pub fn list_keywords(&self) -> Result<Vec<Keyword>, KeywordError> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, keyword, target_url, active, created_at, updated_at
             FROM keywords ORDER BY created_at DESC, id DESC",
        )?;
        let mut rows = stmt.query([])?;
        let mut keywords = Vec::new();
        while let Some(row) = rows.next()? {
            keywords.push(Self::row_to_keyword(row)?);
        }
        Ok(keywords)
    }

    /// Active records in insertion order.
    pub fn list_active_keywords(&self) -> Result<Vec<ActiveKeyword>, KeywordError> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, keyword, target_url FROM keywords WHERE active = TRUE ORDER BY id",
        )?;
        let keywords = stmt
            .query_map([], |row| {
                Ok(ActiveKeyword {
                    id: row.get(0)?,
                    keyword: row.get(1)?,
                    target_url: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(keywords)
    }

    pub fn get_keyword(&self, id: i64) -> Result<Option<Keyword>, KeywordError> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, keyword, target_url, active, created_at, updated_at
             FROM keywords WHERE id = ?1",
        )?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_keyword(row)?)),
            None => Ok(None),
        }
    }

    /// Case-insensitive lookup by keyword text.
    pub fn find_by_keyword(&self, keyword: &str) -> Result<Option<Keyword>, KeywordError> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, keyword, target_url, active, created_at, updated_at
             FROM keywords WHERE keyword_key = ?1",
        )?;
        let mut rows = stmt.query([keyword_key(keyword)])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_keyword(row)?)),
            None => Ok(None),
        }
    }

    pub fn create_keyword(
        &self,
        keyword: &str,
        target_url: &str,
        active: bool,
    ) -> Result<Keyword, KeywordError> {
        let keyword = validate_keyword_text(keyword)?;
        validate_target_url(target_url)?;
        let target_url = target_url.trim().to_string();

        if self.find_by_keyword(&keyword)?.is_some() {
            return Err(KeywordError::Duplicate(keyword));
        }

        let now = Utc::now();
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO keywords (keyword, keyword_key, target_url, active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                keyword,
                keyword_key(&keyword),
                target_url,
                active,
                now.to_rfc3339(),
                now.to_rfc3339()
            ],
        )?;
        let id = conn.last_insert_rowid();

        info!("Created keyword '{}' -> {}", keyword, target_url);
        Ok(Keyword {
            id,
            keyword,
            target_url,
            active,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn update_keyword(&self, id: i64, update: KeywordUpdate) -> Result<Keyword, KeywordError> {
        let mut existing = self.get_keyword(id)?.ok_or(KeywordError::NotFound(id))?;

        if let Some(keyword) = update.keyword {
            let keyword = validate_keyword_text(&keyword)?;
            if let Some(other) = self.find_by_keyword(&keyword)? {
                if other.id != id {
                    return Err(KeywordError::Duplicate(keyword));
                }
            }
            existing.keyword = keyword;
        }
        if let Some(target_url) = update.target_url {
            validate_target_url(&target_url)?;
            existing.target_url = target_url.trim().to_string();
        }
        if let Some(active) = update.active {
            existing.active = active;
        }
        existing.updated_at = Utc::now();

        let conn = self.get_conn()?;
        conn.execute(
            "UPDATE keywords SET keyword = ?1, keyword_key = ?2, target_url = ?3, active = ?4,
             updated_at = ?5 WHERE id = ?6",
            params![
                existing.keyword,
                keyword_key(&existing.keyword),
                existing.target_url,
                existing.active,
                existing.updated_at.to_rfc3339(),
                id
            ],
        )?;

        info!("Updated keyword {} ('{}')", id, existing.keyword);
        Ok(existing)
    }

    pub fn toggle_keyword(&self, id: i64) -> Result<Keyword, KeywordError> {
        let existing = self.get_keyword(id)?.ok_or(KeywordError::NotFound(id))?;
        self.update_keyword(
            id,
            KeywordUpdate {
                active: Some(!existing.active),
                ..Default::default()
            },
        )
    }

    pub fn delete_keyword(&self, id: i64) -> Result<(), KeywordError> {
        let conn = self.get_conn()?;
        let deleted = conn.execute("DELETE FROM keywords WHERE id = ?1", [id])?;
        if deleted == 0 {
            return Err(KeywordError::NotFound(id));
        }
        info!("Deleted keyword {}", id);
        Ok(())
    }

    /// [`keyword_key`] of every stored keyword, active or not.
    pub fn existing_keyword_set(&self) -> Result<HashSet<String>, KeywordError> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT keyword_key FROM keywords")?;
        let set = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(set)
    }

    /// Insert all rows in a single transaction; any failure rolls the batch back.
    pub fn insert_batch(&self, keywords: &[NewKeyword]) -> Result<usize, KeywordError> {
        if keywords.is_empty() {
            return Ok(0);
        }
        let mut conn = self.get_conn()?;
        let now = Utc::now().to_rfc3339();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO keywords (keyword, keyword_key, target_url, active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for k in keywords {
                stmt.execute(params![k.keyword, keyword_key(&k.keyword), k.target_url, k.active, &now, &now])?;
            }
        }
        tx.commit()?;
        debug!("Inserted batch of {} keywords", keywords.len());
        Ok(keywords.len())
    }

    pub fn count_keywords(&self) -> Result<i64, KeywordError> {
        let conn = self.get_conn()?;
        Ok(conn
            .query_row("SELECT COUNT(*) FROM keywords", [], |row| row.get(0))
            .optional()?
            .unwrap_or(0))
    }

    pub(crate) fn parse_datetime_safe(datetime_str: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(datetime_str) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S") {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S%.f") {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
        None
    }

    fn row_to_keyword(row: &Row) -> rusqlite::Result<Keyword> {
        let created_at = Self::parse_datetime_safe(&row.get::<_, String>(4)?)
            .unwrap_or_else(|| { warn!("Failed parse created_at"); Utc::now() });
        let updated_at = Self::parse_datetime_safe(&row.get::<_, String>(5)?)
            .unwrap_or_else(|| { warn!("Failed parse updated_at"); Utc::now() });

        Ok(Keyword {
            id: row.get(0)?,
            keyword: row.get(1)?,
            target_url: row.get(2)?,
            active: row.get(3)?,
            created_at,
            updated_at,
        })
    }
}

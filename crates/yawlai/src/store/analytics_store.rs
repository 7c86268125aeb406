//! Append-only analytics events plus the daily `analytics_summary` rollup.
//!
//! Every `record_*` call inserts one event row and bumps the matching counters
//! in the same transaction. Callers treat these writes as telemetry: failures
//! are logged by the caller and never surface to end users.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection};
use tracing::debug;

use crate::store::schema::*;

/// Summary key for site-wide counters.
const SITE_WIDE: &str = "";

pub struct AnalyticsStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl AnalyticsStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    fn today() -> String {
        Utc::now().date_naive().to_string()
    }

    pub fn record_impression(
        &self,
        session_id: &str,
        keyword_id: Option<i64>,
        keyword: &str,
    ) -> anyhow::Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO impressions (session_id, keyword_id, keyword, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![session_id, keyword_id, keyword, Utc::now().to_rfc3339()],
        )?;
        increment_impressions(&tx, &Self::today(), keyword)?;
        tx.commit()?;
        debug!("Impression recorded for '{}' (session {})", keyword, session_id);
        Ok(())
    }

    pub fn record_click(
        &self,
        session_id: &str,
        keyword_id: Option<i64>,
        keyword: &str,
    ) -> anyhow::Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO clicks (session_id, keyword_id, keyword, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![session_id, keyword_id, keyword, Utc::now().to_rfc3339()],
        )?;
        increment_clicks(&tx, &Self::today(), keyword)?;
        tx.commit()?;
        debug!("Click recorded for '{}' (session {})", keyword, session_id);
        Ok(())
    }

    pub fn record_search(&self, session_id: &str, query: &str) -> anyhow::Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO searches (session_id, query, created_at) VALUES (?1, ?2, ?3)",
            params![session_id, query, Utc::now().to_rfc3339()],
        )?;
        increment_searches(&tx, &Self::today())?;
        tx.commit()?;
        Ok(())
    }

    pub fn record_token_usage(
        &self,
        session_id: &str,
        model: &str,
        prompt_tokens: i64,
        completion_tokens: i64,
    ) -> anyhow::Result<()> {
        let total = prompt_tokens + completion_tokens;
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO token_usage
             (session_id, model, prompt_tokens, completion_tokens, total_tokens, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![session_id, model, prompt_tokens, completion_tokens, total, Utc::now().to_rfc3339()],
        )?;
        increment_tokens(&tx, &Self::today(), total)?;
        tx.commit()?;
        debug!("Token usage recorded: {} tokens (session {})", total, session_id);
        Ok(())
    }

    /// Site-wide counters for the last `days` days, oldest first.
    pub fn daily_summary(&self, days: u32) -> anyhow::Result<Vec<DailySummary>> {
        let since = (Utc::now() - Duration::days(days as i64)).date_naive().to_string();
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT date, impressions, clicks, searches, tokens
             FROM analytics_summary
             WHERE keyword = ?1 AND date > ?2
             ORDER BY date",
        )?;
        let mut rows = stmt.query(params![SITE_WIDE, since])?;
        let mut summaries = Vec::new();
        while let Some(row) = rows.next()? {
            let date: String = row.get(0)?;
            summaries.push(DailySummary {
                date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")?,
                impressions: row.get(1)?,
                clicks: row.get(2)?,
                searches: row.get(3)?,
                tokens: row.get(4)?,
            });
        }
        Ok(summaries)
    }

    /// Per-keyword impressions and clicks over the last `days` days, busiest first.
    pub fn keyword_stats(&self, days: u32) -> anyhow::Result<Vec<KeywordStats>> {
        let since = (Utc::now() - Duration::days(days as i64)).date_naive().to_string();
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT keyword, SUM(impressions), SUM(clicks)
             FROM analytics_summary
             WHERE keyword != ?1 AND date > ?2
             GROUP BY keyword
             ORDER BY SUM(impressions) DESC, keyword",
        )?;
        let stats = stmt
            .query_map(params![SITE_WIDE, since], |row| {
                let impressions: i64 = row.get(1)?;
                let clicks: i64 = row.get(2)?;
                Ok(KeywordStats {
                    keyword: row.get(0)?,
                    impressions,
                    clicks,
                    click_through_rate: if impressions > 0 {
                        clicks as f64 / impressions as f64
                    } else {
                        0.0
                    },
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(stats)
    }

    pub fn totals(&self) -> anyhow::Result<AnalyticsTotals> {
        let conn = self.get_conn()?;
        let totals = conn.query_row(
            "SELECT COALESCE(SUM(impressions), 0), COALESCE(SUM(clicks), 0),
                    COALESCE(SUM(searches), 0), COALESCE(SUM(tokens), 0)
             FROM analytics_summary WHERE keyword = ?1",
            [SITE_WIDE],
            |row| {
                Ok(AnalyticsTotals {
                    impressions: row.get(0)?,
                    clicks: row.get(1)?,
                    searches: row.get(2)?,
                    tokens: row.get(3)?,
                })
            },
        )?;
        Ok(totals)
    }
}

// Counter procedures. Impressions and clicks bump both the site-wide row and
// the per-keyword row.

fn bump(conn: &Connection, date: &str, keyword: &str, column: &str, by: i64) -> rusqlite::Result<()> {
    let sql = format!(
        "INSERT INTO analytics_summary (date, keyword, {col}) VALUES (?1, ?2, ?3)
         ON CONFLICT(date, keyword) DO UPDATE SET {col} = {col} + excluded.{col}",
        col = column
    );
    conn.execute(&sql, params![date, keyword, by])?;
    Ok(())
}

pub fn increment_impressions(conn: &Connection, date: &str, keyword: &str) -> rusqlite::Result<()> {
    bump(conn, date, SITE_WIDE, "impressions", 1)?;
    bump(conn, date, &keyword.to_lowercase(), "impressions", 1)
}

pub fn increment_clicks(conn: &Connection, date: &str, keyword: &str) -> rusqlite::Result<()> {
    bump(conn, date, SITE_WIDE, "clicks", 1)?;
    bump(conn, date, &keyword.to_lowercase(), "clicks", 1)
}

pub fn increment_searches(conn: &Connection, date: &str) -> rusqlite::Result<()> {
    bump(conn, date, SITE_WIDE, "searches", 1)
}

pub fn increment_tokens(conn: &Connection, date: &str, tokens: i64) -> rusqlite::Result<()> {
    bump(conn, date, SITE_WIDE, "tokens", tokens)
}

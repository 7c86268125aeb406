//! Row types for the keyword and analytics tables
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A stored keyword-to-URL record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Keyword {
    pub id: i64,
    pub keyword: String,
    pub target_url: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a keyword record (already validated).
#[derive(Debug, Clone, PartialEq)]
pub struct NewKeyword {
    pub keyword: String,
    pub target_url: String,
    pub active: bool,
}

/// The projection the ad processor works with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActiveKeyword {
    pub id: i64,
    pub keyword: String,
    pub target_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub impressions: i64,
    pub clicks: i64,
    pub searches: i64,
    pub tokens: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeywordStats {
    pub keyword: String,
    pub impressions: i64,
    pub clicks: i64,
    /// clicks / impressions, 0 when nothing was shown
    pub click_through_rate: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalyticsTotals {
    pub impressions: i64,
    pub clicks: i64,
    pub searches: i64,
    pub tokens: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStats {
    pub total_keywords: i64,
    pub active_keywords: i64,
    pub total_impressions: i64,
    pub total_clicks: i64,
    pub total_searches: i64,
    pub database_size_bytes: i64,
}

//! Database models
//!
//! Rust structs representing database entities.
//! Models serialize in camelCase, which is also the backup document shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A diary and its appearance attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Diary {
    pub id: i64,
    pub title: String,
    pub width: f64,
    pub height: f64,
    pub color: String,
    pub font_color: String,
    pub font_family: String,
    pub font_size: f64,
    pub bold: bool,
    pub italic: bool,
    pub created_at: DateTime<Utc>,
}

/// Create diary request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDiaryRequest {
    pub title: String,
    pub width: f64,
    pub height: f64,
    pub color: String,
    pub font_color: String,
    pub font_family: String,
    pub font_size: f64,
    pub bold: bool,
    pub italic: bool,
}

/// One unit of entry content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Block {
    Text {
        payload: String,
    },
    Image {
        /// `data:<mime>;base64,<data>`
        payload: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
}

impl Block {
    pub fn text(payload: impl Into<String>) -> Self {
        Block::Text {
            payload: payload.into(),
        }
    }
}

/// A day's entry in a diary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: i64,
    pub diary_id: i64,
    /// Calendar date key, `YYYY-MM-DD`
    pub date: String,
    #[sqlx(json)]
    pub blocks: Vec<Block>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Partial entry update; `None` fields are left untouched
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEntryRequest {
    pub diary_id: Option<i64>,
    pub date: Option<String>,
    pub blocks: Option<Vec<Block>>,
}

/// Entry shape before blocks existed. Only read by the schema upgrade.
#[derive(Debug, Clone, FromRow)]
pub struct LegacyEntry {
    pub id: i64,
    pub content: Option<String>,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::sensor::GeoPoint;

/// A mark category is either a preset id or free text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MarkCategory {
    Id(i64),
    Text(String),
}

impl MarkCategory {
    /// Splits the category into its `(category_id, category_text)` columns.
    pub fn to_columns(category: Option<&MarkCategory>) -> (Option<i64>, Option<String>) {
        match category {
            Some(MarkCategory::Id(id)) => (Some(*id), None),
            Some(MarkCategory::Text(text)) => (None, Some(text.clone())),
            None => (None, None),
        }
    }

    pub fn from_columns(id: Option<i64>, text: Option<String>) -> Option<MarkCategory> {
        match (id, text) {
            (Some(id), _) => Some(MarkCategory::Id(id)),
            (None, Some(text)) => Some(MarkCategory::Text(text)),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mark {
    pub id: String,
    pub session_id: String,
    pub category: Option<MarkCategory>,
    pub label: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Location at capture time, `None` without a fix.
    pub point: Option<GeoPoint>,
    /// Written by the logging loop rather than the user.
    pub automatic: bool,
}

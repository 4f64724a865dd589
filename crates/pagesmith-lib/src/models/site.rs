// Published site and per-file version snapshot models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::FileMap;

/// A persisted per-file snapshot. Many versions belong to one session,
/// addressed by (fileName, timestamp) and never overwritten; the read
/// path truncates to the most recent 20 per file name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileVersion {
    pub file_name: String,
    pub code: String,
    pub label: String,
    pub timestamp: DateTime<Utc>,
}

/// A published, read-only copy of a session's file map.
/// At most one per session; `slug` is generated once and reused on
/// republish, and forms the public URL `/view/<slug>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedSite {
    pub slug: String,
    pub uid: String,
    pub session_id: String,
    pub title: String,
    /// File names in display order
    pub files: Vec<String>,
    pub file_contents: FileMap,
    pub main_file: String,
    pub published_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

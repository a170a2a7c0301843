use std::path::PathBuf;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountBound {
    Bounded(usize),
    Unbounded,
}

impl CountBound {
    pub fn from_limit(limit: Option<usize>) -> Self {
        match limit {
            Some(count) => CountBound::Bounded(count),
            None => CountBound::Unbounded,
        }
    }

    pub fn limit(&self) -> Option<usize> {
        match self {
            CountBound::Bounded(count) => Some(*count),
            CountBound::Unbounded => None,
        }
    }

    pub fn is_reached(&self, processed: usize) -> bool {
        match self {
            CountBound::Bounded(count) => processed >= *count,
            CountBound::Unbounded => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub root_url: String,
    pub desired: CountBound,
}

impl Target {
    pub fn new(root_url: impl Into<String>, desired: CountBound) -> Self {
        let root_url = root_url.into();
        let id = derive_target_id(&root_url);
        Self {
            id,
            root_url,
            desired,
        }
    }
}

/// Stable id for a root location: slug of the last path segment plus a short
/// hash of the whole url, so distinct targets with equal slugs never collide.
pub fn derive_target_id(root_url: &str) -> String {
    let digest = Sha256::digest(root_url.as_bytes());
    let suffix = hex::encode(&digest[..4]);
    let slug = slug_from_url(root_url);
    if slug.is_empty() {
        format!("target-{suffix}")
    } else {
        format!("{slug}-{suffix}")
    }
}

fn slug_from_url(root_url: &str) -> String {
    let path = url::Url::parse(root_url)
        .map(|parsed| parsed.path().to_string())
        .unwrap_or_else(|_| root_url.to_string());
    let segment = path.rsplit('/').find(|part| !part.is_empty()).unwrap_or("");
    let mut slug = String::new();
    let mut pending_dash = false;
    for ch in segment.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch);
        } else {
            pending_dash = true;
        }
    }
    slug.chars().take(40).collect()
}

/// File stem for an item. The pre-traversal root item sorts before cursor 0.
pub fn item_label(cursor_index: Option<usize>) -> String {
    match cursor_index {
        None => "item_0000_root".to_string(),
        Some(index) => format!("item_{:04}", index + 1),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreatorProfile {
    pub identity: String,
    pub display_name: String,
    pub profile_url: Option<String>,
    pub avatar_url: Option<String>,
    pub verified: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngagementCounts {
    pub likes: u64,
    pub comment_count: u64,
    pub share_count: u64,
    pub view_count: u64,
    pub remix_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comment {
    pub author: String,
    pub text: String,
    pub like_count: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaLocations {
    pub payload: Option<String>,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub creator: Option<CreatorProfile>,
    pub engagement: EngagementCounts,
    pub comments: Vec<Comment>,
    pub media: MediaLocations,
    pub discovered_at: DateTime<Utc>,
}

impl ItemMetadata {
    pub fn empty() -> Self {
        Self {
            title: None,
            description: None,
            creator: None,
            engagement: EngagementCounts::default(),
            comments: Vec::new(),
            media: MediaLocations::default(),
            discovered_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRecord {
    pub target_id: String,
    pub cursor_index: Option<usize>,
    pub label: String,
    pub detail_url: Option<String>,
    pub metadata: ItemMetadata,
    pub download: Option<DownloadOutcome>,
    pub activation_failed: bool,
}

impl ItemRecord {
    pub fn new(
        target_id: impl Into<String>,
        cursor_index: Option<usize>,
        detail_url: Option<String>,
        metadata: ItemMetadata,
    ) -> Self {
        Self {
            target_id: target_id.into(),
            cursor_index,
            label: item_label(cursor_index),
            detail_url,
            metadata,
            download: None,
            activation_failed: false,
        }
    }

    pub fn failed_activation(target_id: impl Into<String>, cursor_index: usize) -> Self {
        Self {
            target_id: target_id.into(),
            cursor_index: Some(cursor_index),
            label: item_label(Some(cursor_index)),
            detail_url: None,
            metadata: ItemMetadata::empty(),
            download: None,
            activation_failed: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadOutcome {
    pub local_path: PathBuf,
    pub byte_size: u64,
    pub succeeded: bool,
    pub skipped: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub target_id: String,
    pub root_url: String,
    pub last_completed_index: i64,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Index -1 marks the pre-traversal root item as done.
    pub fn resume_index(&self) -> usize {
        (self.last_completed_index + 1).max(0) as usize
    }

    pub fn root_done(&self) -> bool {
        self.last_completed_index >= -1
    }

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let updated_at: NaiveDateTime = row.get("updated_at")?;
        Ok(Self {
            target_id: row.get("target_id")?,
            root_url: row.get("root_url")?,
            last_completed_index: row.get("last_completed_index")?,
            updated_at: Utc.from_utc_datetime(&updated_at),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedTarget {
    pub target_id: String,
    pub root_url: String,
    pub items_harvested: i64,
    pub completed_at: DateTime<Utc>,
}

impl CompletedTarget {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let completed_at: NaiveDateTime = row.get("completed_at")?;
        Ok(Self {
            target_id: row.get("target_id")?,
            root_url: row.get("root_url")?,
            items_harvested: row.get("items_harvested")?,
            completed_at: Utc.from_utc_datetime(&completed_at),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetRunRecord {
    pub id: i64,
    pub target_id: String,
    pub outcome: String,
    pub items_processed: i64,
    pub items_failed: i64,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TargetRunRecord {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let created_at: NaiveDateTime = row.get("created_at")?;
        Ok(Self {
            id: row.get("id")?,
            target_id: row.get("target_id")?,
            outcome: row.get("outcome")?,
            items_processed: row.get("items_processed")?,
            items_failed: row.get("items_failed")?,
            detail: row.get("detail")?,
            created_at: Utc.from_utc_datetime(&created_at),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetSummary {
    pub target_id: String,
    pub root_url: String,
    pub total_items: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub downloads_succeeded: usize,
    pub exhausted: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

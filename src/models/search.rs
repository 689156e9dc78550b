//! Search hit types.

use super::{Record, RecordId, RecordType};
use serde::{Deserialize, Serialize};

/// Which retrieval leg produced a hit's current score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitOrigin {
    /// Keyword (BM25-style) match score.
    Keyword,
    /// Semantic similarity score.
    Semantic,
    /// Reciprocal Rank Fusion score.
    Fused,
    /// Keyword overlap (and recency) score from a fallback scan.
    Scan,
}

/// Typed metadata carried with each hit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HitMetadata {
    /// Stable origin of the underlying record.
    pub source: String,
    /// Record category, when the hit is a record.
    pub record_type: Option<RecordType>,
    /// Record author.
    pub author: Option<String>,
    /// Record timestamp in Unix milliseconds.
    pub timestamp: Option<u64>,
    /// Referenced artifact paths.
    pub files: Vec<String>,
}

/// A single result from the storage collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Record id. `None` for non-record sources (e.g. generated summaries).
    pub id: Option<RecordId>,
    /// Matched content.
    pub content: String,
    /// Score for the leg named by `origin`.
    pub score: f32,
    /// Which leg the score came from.
    pub origin: HitOrigin,
    /// Typed metadata.
    pub metadata: HitMetadata,
}

impl SearchHit {
    /// Builds a hit from a record.
    #[must_use]
    pub fn from_record(record: &Record, score: f32, origin: HitOrigin) -> Self {
        Self {
            id: Some(record.id.clone()),
            content: record.text(),
            score,
            origin,
            metadata: HitMetadata {
                source: record.source.clone(),
                record_type: Some(record.record_type),
                author: Some(record.author.clone()),
                timestamp: Some(record.timestamp),
                files: record.files.clone(),
            },
        }
    }

    /// Key used to merge the same document across result lists.
    #[must_use]
    pub fn fusion_key(&self) -> &str {
        self.id
            .as_ref()
            .map_or(self.metadata.source.as_str(), RecordId::as_str)
    }
}

/// Summary of one source used by the fallback scans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    /// Stable source identifier.
    pub source: String,
    /// Most recent record timestamp in Unix milliseconds.
    pub last_activity: u64,
    /// Short description (first summary or title).
    pub summary: String,
    /// Ids of the records in this source.
    pub record_ids: Vec<RecordId>,
}

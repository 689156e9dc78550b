//! Record types and identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Creates a new record ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Category of team activity a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    /// A version-control commit.
    Commit,
    /// A code review or change-request comment.
    Review,
    /// A chat or session conversation.
    Conversation,
    /// A design document, ADR or RFC.
    Document,
    /// An explicitly captured decision.
    Decision,
    /// Anything else.
    #[default]
    Other,
}

impl RecordType {
    /// Returns the type as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Review => "review",
            Self::Conversation => "conversation",
            Self::Document => "document",
            Self::Decision => "decision",
            Self::Other => "other",
        }
    }

    /// Parses a record type string, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "commit" => Some(Self::Commit),
            "review" | "pr_review" | "code_review" => Some(Self::Review),
            "conversation" | "session" | "chat" => Some(Self::Conversation),
            "document" | "doc" | "adr" | "rfc" => Some(Self::Document),
            "decision" => Some(Self::Decision),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    /// Returns true for types that usually record the reasoning behind a choice.
    #[must_use]
    pub const fn carries_rationale(&self) -> bool {
        matches!(self, Self::Decision | Self::Review | Self::Document)
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A unit of team knowledge owned by the storage collaborator.
///
/// The core never mutates records. Visibility attributes (`owner_id`,
/// `project_id`, `repo_id`, `org_id`) feed the scope predicates in
/// [`crate::security::PermissionFilter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier.
    pub id: RecordId,
    /// Stable identifier of the origin (session id, repository path, document URL).
    pub source: String,
    /// Record category.
    #[serde(rename = "type", default)]
    pub record_type: RecordType,
    /// Creation time in Unix milliseconds.
    pub timestamp: u64,
    /// Author display name or email.
    pub author: String,
    /// One-line summary.
    pub summary: String,
    /// Full detail text.
    #[serde(default)]
    pub detail: String,
    /// Referenced artifact paths.
    #[serde(default)]
    pub files: Vec<String>,
    /// Optional precomputed embedding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// User id of the record owner.
    pub owner_id: String,
    /// Project the record belongs to.
    #[serde(default)]
    pub project_id: Option<String>,
    /// Repository the record belongs to.
    #[serde(default)]
    pub repo_id: Option<String>,
    /// Organization the record belongs to.
    #[serde(default)]
    pub org_id: Option<String>,
}

impl Record {
    /// Returns summary and detail joined for matching.
    #[must_use]
    pub fn text(&self) -> String {
        if self.detail.is_empty() {
            self.summary.clone()
        } else {
            format!("{}\n{}", self.summary, self.detail)
        }
    }

    /// Returns true if the record references `path` (exact or suffix match).
    #[must_use]
    pub fn references_file(&self, path: &str) -> bool {
        references_path(&self.files, path)
    }
}

/// Returns true if any of `files` equals `path` or ends with `/path`.
pub(crate) fn references_path(files: &[String], path: &str) -> bool {
    let wanted = path.trim_start_matches("./");
    files.iter().any(|f| {
        let f = f.trim_start_matches("./");
        f == wanted || f.ends_with(&format!("/{wanted}")) || wanted.ends_with(&format!("/{f}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with_files(files: &[&str]) -> Record {
        Record {
            id: RecordId::new("r1"),
            source: "repo".to_string(),
            record_type: RecordType::Commit,
            timestamp: 0,
            author: "alice".to_string(),
            summary: "summary".to_string(),
            detail: String::new(),
            files: files.iter().map(ToString::to_string).collect(),
            embedding: None,
            owner_id: "u1".to_string(),
            project_id: None,
            repo_id: None,
            org_id: None,
        }
    }

    #[test]
    fn test_record_type_parse() {
        assert_eq!(RecordType::parse("COMMIT"), Some(RecordType::Commit));
        assert_eq!(RecordType::parse("adr"), Some(RecordType::Document));
        assert_eq!(RecordType::parse("unknown"), None);
    }

    #[test]
    fn test_references_file_suffix() {
        let record = record_with_files(&["src/billing/invoice.rs"]);
        assert!(record.references_file("src/billing/invoice.rs"));
        assert!(record.references_file("billing/invoice.rs"));
        assert!(!record.references_file("invoice.ts"));
    }

    #[test]
    fn test_text_without_detail() {
        let record = record_with_files(&[]);
        assert_eq!(record.text(), "summary");
    }

    #[test]
    fn test_record_json_uses_type_key() {
        let record = record_with_files(&[]);
        let json = serde_json::to_string(&record).unwrap_or_default();
        assert!(json.contains("\"type\":\"commit\""));
    }
}

//! Research session types: leads, evidence, confidence and results.

use super::{RecordId, RecordType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a lead points at. Each kind carries only its own payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LeadKind {
    /// The question that started the session.
    Initial {
        /// Raw question text.
        query: String,
    },
    /// A commit referenced by hash.
    Commit {
        /// Full or abbreviated commit hash.
        sha: String,
    },
    /// A pull/merge request referenced by number.
    ChangeRequest {
        /// Change request number.
        number: u64,
    },
    /// A file path mentioned in evidence.
    File {
        /// Repository-relative path.
        path: String,
    },
    /// A named document reference such as `ADR-12` or `RFC 7`.
    CrossReference {
        /// Normalized reference text.
        reference: String,
    },
    /// A person who produced evidence.
    Author {
        /// Author name.
        name: String,
    },
}

impl LeadKind {
    /// Returns the kind name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Initial { .. } => "initial",
            Self::Commit { .. } => "commit",
            Self::ChangeRequest { .. } => "change_request",
            Self::File { .. } => "file",
            Self::CrossReference { .. } => "cross_reference",
            Self::Author { .. } => "author",
        }
    }

    /// Returns the deduplication key for this kind and payload.
    #[must_use]
    pub fn dedup_key(&self) -> String {
        match self {
            Self::Initial { query } => format!("initial:{}", query.trim().to_lowercase()),
            Self::Commit { sha } => format!("commit:{}", sha.to_lowercase()),
            Self::ChangeRequest { number } => format!("change_request:{number}"),
            Self::File { path } => format!("file:{}", path.trim_start_matches("./")),
            Self::CrossReference { reference } => {
                format!("cross_reference:{}", reference.to_lowercase())
            },
            Self::Author { name } => format!("author:{}", name.trim().to_lowercase()),
        }
    }
}

/// A unit of investigation queued by the research engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    /// Deduplication key, unique per research session.
    pub id: String,
    /// What to investigate.
    pub kind: LeadKind,
    /// Queue priority; higher is investigated first.
    pub priority: f32,
}

impl Lead {
    /// Creates a lead, deriving its id from the kind.
    #[must_use]
    pub fn new(kind: LeadKind, priority: f32) -> Self {
        Self {
            id: kind.dedup_key(),
            kind,
            priority,
        }
    }

    /// Creates the initial lead for a question at priority 1.
    #[must_use]
    pub fn initial(question: &str) -> Self {
        Self::new(
            LeadKind::Initial {
                query: question.to_string(),
            },
            1.0,
        )
    }
}

/// A pointer back to where a claim came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// Stable origin of the cited record.
    pub source: String,
    /// Short excerpt supporting the claim.
    pub excerpt: String,
    /// Relevance in `[0, 1]`.
    pub relevance: f32,
    /// Record timestamp in Unix milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    /// Record author.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Cited record id, when the citation is a record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<RecordId>,
    /// Link to browse the source, when a base URL is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browse_url: Option<String>,
}

/// A citation-backed claim gathered while investigating a lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Where the claim came from.
    pub citation: Citation,
    /// The claim text.
    pub claim: String,
    /// Individual confidence in `[0, 1]`.
    pub confidence: f32,
    /// Category of the underlying record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_type: Option<RecordType>,
    /// Artifact paths referenced by the underlying record.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
}

impl Evidence {
    /// Returns the author, or an empty string when unknown.
    #[must_use]
    pub fn author(&self) -> &str {
        self.citation.author.as_deref().unwrap_or("")
    }
}

/// Qualitative reliability of an answer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    /// Weak or no supporting evidence.
    #[default]
    Low,
    /// Some supporting evidence.
    Medium,
    /// Corroborated by several strong items.
    High,
}

impl ConfidenceLevel {
    /// Returns the level as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Derived assessment of the evidence gathered so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidenceAssessment {
    /// Whether research may stop.
    pub confident: bool,
    /// Qualitative level.
    pub level: ConfidenceLevel,
    /// Human-readable justification.
    pub reason: String,
}

/// Lifecycle of a research session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchState {
    /// Created, nothing investigated yet.
    #[default]
    Queued,
    /// Leads are being investigated.
    Investigating,
    /// Stopped because the evidence is sufficient.
    Confident,
    /// Stopped because there was nothing left to investigate.
    Exhausted,
    /// Stopped because the caller cancelled.
    Cancelled,
}

impl ResearchState {
    /// Returns the state as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Investigating => "investigating",
            Self::Confident => "confident",
            Self::Exhausted => "exhausted",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns true once no more leads will be investigated.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Confident | Self::Exhausted | Self::Cancelled)
    }
}

/// A request for the user to narrow an ambiguous question.
///
/// A valid terminal outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarificationRequest {
    /// Prompt shown to the user.
    pub message: String,
    /// Candidate refinements (recent sources, topics).
    pub suggestions: Vec<String>,
}

/// Output of an answer synthesizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizedAnswer {
    /// Answer text.
    pub answer: String,
    /// Overall confidence.
    pub confidence: ConfidenceLevel,
    /// Supporting citations, deduplicated by source.
    pub citations: Vec<Citation>,
    /// Explicit caveats.
    pub caveats: Vec<String>,
}

/// Result of researching a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchResult {
    /// Research session id.
    pub session_id: String,
    /// Answer text.
    pub answer: String,
    /// Overall confidence.
    pub confidence: ConfidenceLevel,
    /// Supporting citations, deduplicated by source.
    pub citations: Vec<Citation>,
    /// Explicit caveats.
    pub caveats: Vec<String>,
    /// Sources that contributed evidence, in first-seen order.
    pub searched_sources: Vec<String>,
    /// Terminal state of the session.
    pub state: ResearchState,
    /// Number of leads investigated.
    pub leads_investigated: usize,
    /// Set when the question was too ambiguous to research.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification: Option<ClarificationRequest>,
}

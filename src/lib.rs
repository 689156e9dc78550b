//! # Teamrecall
//!
//! Permission-scoped research over team activity records.
//!
//! Teamrecall answers natural-language questions ("who owns billing?",
//! "why did we choose Postgres?") over commits, reviews, conversations and
//! documents. It researches iteratively until it reaches a defensible
//! confidence level, cites every claim, and never returns a record the
//! asking user is not allowed to see.
//!
//! ## Features
//!
//! - Confidence-driven research loop over a prioritized queue of leads
//! - Scope-aware permission filtering with a post-retrieval double check
//! - Sliding-window rate limiting per user and operation
//! - TTL caches for permitted ids, query results and org learnings
//! - Hybrid keyword + semantic retrieval fused with Reciprocal Rank Fusion
//! - Acronym/synonym query expansion validated against operator injection
//! - Fallback chain (recency scan, exhaustive scan, clarification)
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use teamrecall::services::ResearchEngine;
//! use teamrecall::storage::InMemoryStore;
//!
//! let store = Arc::new(InMemoryStore::indexed(records)?);
//! let engine = ResearchEngine::builder(store.clone()).catalog(store).build()?;
//! let result = engine.research_question("who owns the billing service?")?;
//! println!("{} ({})", result.answer, result.confidence);
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod cache;
pub mod clock;
pub mod config;
pub mod embedding;
pub mod models;
pub mod observability;
pub mod security;
pub mod services;
pub mod storage;
pub mod sweep;

// Re-exports for convenience
pub use cache::{TeamCaches, TtlCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::TeamRecallConfig;
pub use models::{
    Citation, ConfidenceLevel, Evidence, Lead, LeadKind, Record, RecordId, RecordType,
    ResearchResult, Scope, SearchHit, TeamMemoryResult, UserContext,
};
pub use security::{PermissionFilter, RateLimitResult, RateLimiter};
pub use services::{
    CancellationFlag, ExpandedQuery, ExpansionLevel, FallbackChain, HybridSearchService,
    OrgLearningsService, QueryExpander, ResearchEngine, TeamQueryService, expand_query,
};
pub use storage::{InMemoryStore, RecordCatalog, SearchBackend};
pub use sweep::SweepHandle;

/// Error type for teamrecall operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Malformed configuration, expansion table entries with operators |
/// | `EmptyQuestion` | A question is empty or whitespace only |
/// | `MissingOrganization` | Org-scoped query without an organization in the user context |
/// | `PermissionDenied` | A record is not visible to the requesting user |
/// | `RateLimitExceeded` | The sliding window for a user/operation is full |
/// | `RetrievalUnavailable` | The storage collaborator errored or timed out |
/// | `OperationFailed` | Anything else (I/O, config parsing, thread spawn) |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - A configuration value is out of range
    /// - An expansion table entry contains a boolean operator or operator character
    /// - An expansion level string is unknown
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The question was empty.
    #[error("question must not be empty")]
    EmptyQuestion,

    /// An org-scoped operation was requested without an organization.
    #[error("organization context is required for org-scoped queries")]
    MissingOrganization,

    /// The requested record is not accessible.
    ///
    /// Deliberately carries no reasoning; the decision trail is logged instead.
    #[error("not accessible")]
    PermissionDenied,

    /// Rate limit exceeded for a user/operation pair.
    #[error(
        "rate limit exceeded for '{operation}' ({limit} per window), retry after {retry_after_ms}ms"
    )]
    RateLimitExceeded {
        /// The rate limited operation.
        operation: String,
        /// Milliseconds until a slot frees up.
        retry_after_ms: u64,
        /// Configured maximum requests per window.
        limit: usize,
    },

    /// The storage collaborator could not serve a retrieval.
    ///
    /// Never propagated from top-level query calls; the fallback chain takes over.
    #[error("retrieval '{operation}' unavailable: {cause}")]
    RetrievalUnavailable {
        /// The retrieval operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// An operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

impl Error {
    /// Returns true for errors that must reach the caller of a top-level query.
    ///
    /// Validation and admission-control failures are hard failures; everything
    /// else degrades to a low-confidence answer.
    #[must_use]
    pub const fn is_hard_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_)
                | Self::EmptyQuestion
                | Self::MissingOrganization
                | Self::PermissionDenied
                | Self::RateLimitExceeded { .. }
        )
    }
}

/// Result type alias for teamrecall operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in milliseconds.
///
/// Falls back to 0 if the system clock is before the Unix epoch.
#[must_use]
pub fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("test error".to_string());
        assert_eq!(err.to_string(), "invalid input: test error");

        let err = Error::OperationFailed {
            operation: "test".to_string(),
            cause: "failed".to_string(),
        };
        assert_eq!(err.to_string(), "operation 'test' failed: failed");

        let err = Error::RateLimitExceeded {
            operation: "team_query".to_string(),
            retry_after_ms: 1500,
            limit: 10,
        };
        assert!(err.to_string().contains("retry after 1500ms"));
    }

    #[test]
    fn test_permission_denied_hides_reasoning() {
        assert_eq!(Error::PermissionDenied.to_string(), "not accessible");
    }

    #[test]
    fn test_hard_failure_classification() {
        assert!(Error::EmptyQuestion.is_hard_failure());
        assert!(Error::MissingOrganization.is_hard_failure());
        assert!(
            Error::RateLimitExceeded {
                operation: "x".to_string(),
                retry_after_ms: 1,
                limit: 1,
            }
            .is_hard_failure()
        );
        assert!(
            !Error::RetrievalUnavailable {
                operation: "keyword_search".to_string(),
                cause: "timeout".to_string(),
            }
            .is_hard_failure()
        );
    }

    #[test]
    fn test_current_timestamp_is_positive() {
        assert!(current_timestamp_ms() > 0);
    }
}

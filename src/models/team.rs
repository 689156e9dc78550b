//! Team query result types.

use super::{Citation, ClarificationRequest, ConfidenceLevel, Scope};
use serde::{Deserialize, Serialize};

/// Permitted record counts per granting scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeCounts {
    /// Granted by the personal predicate.
    pub personal: usize,
    /// Granted by the project predicate.
    pub project: usize,
    /// Granted by the team predicate.
    pub team: usize,
    /// Granted by the org predicate.
    pub org: usize,
}

impl ScopeCounts {
    /// Increments the counter for `scope`.
    pub const fn increment(&mut self, scope: Scope) {
        match scope {
            Scope::Personal => self.personal += 1,
            Scope::Project => self.project += 1,
            Scope::Team => self.team += 1,
            Scope::Org => self.org += 1,
        }
    }

    /// Returns the counter for `scope`.
    #[must_use]
    pub const fn get(&self, scope: Scope) -> usize {
        match scope {
            Scope::Personal => self.personal,
            Scope::Project => self.project,
            Scope::Team => self.team,
            Scope::Org => self.org,
        }
    }

    /// Returns the sum across scopes.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.personal + self.project + self.team + self.org
    }
}

/// Bookkeeping for one team query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryStats {
    /// Records the user may see at the requested scope.
    pub permitted_records: usize,
    /// Permitted records per granting scope.
    pub by_scope: ScopeCounts,
    /// Hits returned by retrieval before the double check.
    pub hits_before_validation: usize,
    /// Hits dropped by the double check.
    pub rejected_by_validation: usize,
    /// Fallback strategy that produced the results, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_strategy: Option<String>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

/// Result of a permission-checked team memory query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamMemoryResult {
    /// Answer text.
    pub answer: String,
    /// Overall confidence.
    pub confidence: ConfidenceLevel,
    /// Supporting citations.
    pub citations: Vec<Citation>,
    /// Explicit caveats.
    pub caveats: Vec<String>,
    /// Distinct sources the answer drew on.
    pub sessions_searched: usize,
    /// True when served from the query-result cache.
    pub cached: bool,
    /// Query bookkeeping.
    pub stats: QueryStats,
    /// Set when the question was too ambiguous to answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification: Option<ClarificationRequest>,
}

/// A learning shared across an organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgLearning {
    /// Normalized content hash.
    pub key: String,
    /// Learning text as first recorded.
    pub text: String,
    /// Number of times it was recorded.
    pub occurrences: usize,
    /// Distinct contributors.
    pub contributors: Vec<String>,
    /// Mean confidence across observations.
    pub confidence: f32,
    /// First observation time in Unix milliseconds.
    pub first_seen: u64,
    /// Latest observation time in Unix milliseconds.
    pub last_seen: u64,
}

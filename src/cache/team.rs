//! The three team-query caches.

use super::{ContentHasher, TtlCache};
use crate::Result;
use crate::clock::Clock;
use crate::config::CacheSettings;
use crate::models::{OrgLearning, RecordId, Scope, ScopeCounts, TeamMemoryResult};
use crate::sweep::SweepHandle;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Permitted record ids for one user at one scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermittedRecords {
    /// Ids the user may see.
    pub ids: HashSet<RecordId>,
    /// Counts per granting scope.
    pub by_scope: ScopeCounts,
}

/// Key of a permitted-id set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PermittedKey {
    /// User id.
    pub user_id: String,
    /// User organization.
    pub org_id: Option<String>,
    /// Requested scope.
    pub scope: Scope,
}

/// Key of a cached query result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    /// User id.
    pub user_id: String,
    /// User organization.
    pub org_id: Option<String>,
    /// Requested scope.
    pub scope: Scope,
    /// SHA-256 of the normalized question.
    pub query_hash: String,
    /// Result limit.
    pub limit: usize,
}

impl QueryKey {
    /// Builds a key, hashing the normalized question.
    #[must_use]
    pub fn new(
        user_id: &str,
        org_id: Option<&str>,
        scope: Scope,
        question: &str,
        limit: usize,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            org_id: org_id.map(ToString::to_string),
            scope,
            query_hash: ContentHasher::hash(question),
            limit,
        }
    }
}

/// Permitted ids, query results and org learnings, each with its own TTL.
pub struct TeamCaches {
    permitted: Arc<TtlCache<PermittedKey, Arc<PermittedRecords>>>,
    results: Arc<TtlCache<QueryKey, TeamMemoryResult>>,
    learnings: Arc<TtlCache<String, Arc<Vec<OrgLearning>>>>,
    sweep_interval: Duration,
}

impl TeamCaches {
    /// Creates the caches from settings.
    #[must_use]
    pub fn new(settings: &CacheSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            permitted: Arc::new(TtlCache::new(
                "permitted_ids",
                settings.capacity,
                settings.permitted_ids_ttl,
                Arc::clone(&clock),
            )),
            results: Arc::new(TtlCache::new(
                "query_results",
                settings.capacity,
                settings.query_results_ttl,
                Arc::clone(&clock),
            )),
            learnings: Arc::new(TtlCache::new(
                "org_learnings",
                settings.capacity,
                settings.org_learnings_ttl,
                clock,
            )),
            sweep_interval: settings.sweep_interval,
        }
    }

    /// Returns the permitted-id cache.
    #[must_use]
    pub fn permitted(&self) -> &TtlCache<PermittedKey, Arc<PermittedRecords>> {
        &self.permitted
    }

    /// Returns the query-result cache.
    #[must_use]
    pub fn results(&self) -> &TtlCache<QueryKey, TeamMemoryResult> {
        &self.results
    }

    /// Returns the org-learnings cache.
    #[must_use]
    pub fn learnings(&self) -> &TtlCache<String, Arc<Vec<OrgLearning>>> {
        &self.learnings
    }

    /// Drops cached permissions and query results for a user.
    ///
    /// Call when the user's grants change.
    pub fn invalidate_user_permissions(&self, user_id: &str) -> usize {
        let permitted = self.permitted.delete_where(|k| k.user_id == user_id);
        let results = self.results.delete_where(|k| k.user_id == user_id);
        debug!(user_id, permitted, results, "Invalidated user permissions");
        permitted + results
    }

    /// Drops the cached learnings of an org.
    pub fn invalidate_org_learnings(&self, org_id: &str) -> bool {
        let removed = self.learnings.delete(&org_id.to_string());
        debug!(org_id, removed, "Invalidated org learnings");
        removed
    }

    /// Empties every cache.
    pub fn clear_all(&self) {
        self.permitted.clear();
        self.results.clear();
        self.learnings.clear();
    }

    /// Starts one sweeper per cache.
    ///
    /// # Errors
    ///
    /// Returns an error if a thread cannot be spawned.
    pub fn start_sweepers(&self) -> Result<Vec<SweepHandle>> {
        Ok(vec![
            self.permitted.start_sweeper(self.sweep_interval)?,
            self.results.start_sweeper(self.sweep_interval)?,
            self.learnings.start_sweeper(self.sweep_interval)?,
        ])
    }
}

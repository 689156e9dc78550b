//! Scope-based permission filtering.
//!
//! Decides which records a user may see and at which scope. Each scope has
//! its own predicate:
//!
//! | Scope | Grants when |
//! |-------|-------------|
//! | `Personal` | `owner_id` is the user, or the author is the user's email or an alias |
//! | `Project` | `project_id` is in the user's accessible projects |
//! | `Team` | `repo_id` is in the user's accessible repositories |
//! | `Org` | `org_id` equals the user's organization (both present) |
//!
//! Scopes are evaluated narrowest first and evaluation stops at the first
//! grant. A scope wider than the requested one is never evaluated. A
//! predicate error denies access.
//!
//! # Example
//!
//! ```rust,ignore
//! use teamrecall::security::PermissionFilter;
//! use teamrecall::{Scope, UserContext};
//!
//! let filter = PermissionFilter::new();
//! let ctx = UserContext::new("u1").with_project("billing");
//! let decision = filter.check_access(&record, &ctx, Scope::Project);
//! assert!(decision.allowed);
//! ```

use crate::models::{Record, RecordId, Scope, ScopeCounts, SearchHit, UserContext};
use crate::{Error, Result};
use std::collections::HashSet;
use tracing::{debug, instrument, warn};

/// A visibility rule for one scope.
///
/// Implementations must be pure functions of the record and context.
pub trait ScopePredicate: Send + Sync {
    /// The scope this predicate grants.
    fn scope(&self) -> Scope;

    /// Returns whether the record is visible to the user at this scope.
    ///
    /// # Errors
    ///
    /// Returns an error if the decision cannot be made. Callers deny access.
    fn permits(&self, record: &Record, context: &UserContext) -> Result<bool>;
}

/// Owner or author match.
#[derive(Debug, Clone, Copy, Default)]
pub struct PersonalPredicate;

impl ScopePredicate for PersonalPredicate {
    fn scope(&self) -> Scope {
        Scope::Personal
    }

    fn permits(&self, record: &Record, context: &UserContext) -> Result<bool> {
        if context.user_id.is_empty() {
            return Ok(false);
        }
        Ok(record.owner_id == context.user_id || context.is_author(&record.author))
    }
}

/// Project membership.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectPredicate;

impl ScopePredicate for ProjectPredicate {
    fn scope(&self) -> Scope {
        Scope::Project
    }

    fn permits(&self, record: &Record, context: &UserContext) -> Result<bool> {
        Ok(record
            .project_id
            .as_ref()
            .is_some_and(|p| context.accessible_projects.contains(p)))
    }
}

/// Repository membership.
#[derive(Debug, Clone, Copy, Default)]
pub struct TeamPredicate;

impl ScopePredicate for TeamPredicate {
    fn scope(&self) -> Scope {
        Scope::Team
    }

    fn permits(&self, record: &Record, context: &UserContext) -> Result<bool> {
        Ok(record
            .repo_id
            .as_ref()
            .is_some_and(|r| context.accessible_repos.contains(r)))
    }
}

/// Organization membership.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrgPredicate;

impl ScopePredicate for OrgPredicate {
    fn scope(&self) -> Scope {
        Scope::Org
    }

    fn permits(&self, record: &Record, context: &UserContext) -> Result<bool> {
        Ok(matches!(
            (&record.org_id, &context.org_id),
            (Some(record_org), Some(user_org)) if record_org == user_org
        ))
    }
}

/// Outcome of a single access check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDecision {
    /// Whether the record is visible.
    pub allowed: bool,
    /// The narrowest scope that granted access.
    pub granted_scope: Option<Scope>,
    /// Why the decision was made. For logs only; never shown to users.
    pub reason: String,
}

impl AccessDecision {
    fn granted(scope: Scope) -> Self {
        Self {
            allowed: true,
            granted_scope: Some(scope),
            reason: format!("granted by {scope} scope"),
        }
    }

    fn denied(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            granted_scope: None,
            reason: reason.into(),
        }
    }
}

/// Outcome of a batch permission filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionFilterResult {
    /// Permitted record ids, in input order.
    pub ids: Vec<RecordId>,
    /// Permitted counts per granting scope.
    pub by_scope: ScopeCounts,
    /// Number of records denied.
    pub filtered_out: usize,
}

impl PermissionFilterResult {
    /// Returns the permitted ids as a set.
    #[must_use]
    pub fn id_set(&self) -> HashSet<RecordId> {
        self.ids.iter().cloned().collect()
    }
}

/// Outcome of post-retrieval validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationOutcome {
    /// Results that passed.
    pub kept: Vec<SearchHit>,
    /// Number of results dropped.
    pub rejected: usize,
}

/// Scope-aware permission filter.
pub struct PermissionFilter {
    predicates: Vec<Box<dyn ScopePredicate>>,
}

impl Default for PermissionFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl PermissionFilter {
    /// Creates a filter with the built-in predicates.
    #[must_use]
    pub fn new() -> Self {
        Self {
            predicates: vec![
                Box::new(PersonalPredicate),
                Box::new(ProjectPredicate),
                Box::new(TeamPredicate),
                Box::new(OrgPredicate),
            ],
        }
    }

    /// Replaces the predicate for the scope it declares.
    #[must_use]
    pub fn with_predicate(mut self, predicate: Box<dyn ScopePredicate>) -> Self {
        let scope = predicate.scope();
        self.predicates.retain(|p| p.scope() != scope);
        self.predicates.push(predicate);
        self.predicates.sort_by_key(|p| p.scope());
        self
    }

    /// Decides whether `record` is visible to `context` at `requested_scope`.
    #[must_use]
    pub fn check_access(
        &self,
        record: &Record,
        context: &UserContext,
        requested_scope: Scope,
    ) -> AccessDecision {
        for predicate in self
            .predicates
            .iter()
            .filter(|p| p.scope() <= requested_scope)
        {
            match predicate.permits(record, context) {
                Ok(true) => return AccessDecision::granted(predicate.scope()),
                Ok(false) => {},
                Err(e) => {
                    warn!(
                        record_id = %record.id,
                        scope = %predicate.scope(),
                        error = %e,
                        "Permission predicate failed, denying access"
                    );
                    metrics::counter!(
                        "permission_predicate_errors_total",
                        "scope" => predicate.scope().as_str()
                    )
                    .increment(1);
                    return AccessDecision::denied(format!(
                        "{} predicate failed",
                        predicate.scope()
                    ));
                },
            }
        }
        AccessDecision::denied(format!("no scope up to {requested_scope} grants access"))
    }

    /// Filters a batch of records.
    ///
    /// Equivalent to calling [`Self::check_access`] on each record.
    #[instrument(
        skip(self, records, context),
        fields(
            operation = "filter_by_permission",
            user_id = %context.user_id,
            count = records.len()
        )
    )]
    pub fn filter_by_permission(
        &self,
        records: &[Record],
        context: &UserContext,
        scope: Scope,
    ) -> PermissionFilterResult {
        let mut result = PermissionFilterResult::default();
        for record in records {
            let decision = self.check_access(record, context, scope);
            match decision.granted_scope {
                Some(granted) if decision.allowed => {
                    result.ids.push(record.id.clone());
                    result.by_scope.increment(granted);
                },
                _ => result.filtered_out += 1,
            }
        }
        debug!(
            permitted = result.ids.len(),
            filtered_out = result.filtered_out,
            "Permission filter applied"
        );
        result
    }

    /// Returns the granting scope or `PermissionDenied`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`] when no scope grants access.
    pub fn require_access(
        &self,
        record: &Record,
        context: &UserContext,
        scope: Scope,
    ) -> Result<Scope> {
        let decision = self.check_access(record, context, scope);
        match decision.granted_scope {
            Some(granted) if decision.allowed => Ok(granted),
            _ => {
                debug!(
                    record_id = %record.id,
                    user_id = %context.user_id,
                    reason = %decision.reason,
                    "Access denied"
                );
                Err(Error::PermissionDenied)
            },
        }
    }
}

/// Drops results whose record id is not in `permitted`.
///
/// Results without a record id pass through.
pub fn validate_results(
    results: Vec<SearchHit>,
    permitted: &HashSet<RecordId>,
) -> ValidationOutcome {
    let mut outcome = ValidationOutcome::default();
    for hit in results {
        match &hit.id {
            Some(id) if !permitted.contains(id) => {
                warn!(record_id = %id, "Retrieval returned a record outside the permitted set");
                metrics::counter!("permission_validation_rejected_total").increment(1);
                outcome.rejected += 1;
            },
            _ => outcome.kept.push(hit),
        }
    }
    outcome
}

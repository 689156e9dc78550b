//! Team query façade.
//!
//! The single entry point for permission-checked questions over team
//! memory. A query runs through:
//!
//! ```text
//! validate -> rate limit -> result cache -> permitted ids (cached)
//!          -> hybrid search -> double-check validation
//!          -> fallback chain (empty or unavailable retrieval)
//!          -> synthesis -> result cache
//! ```
//!
//! Only validation, permission and rate-limit failures reach the caller.
//! Everything else degrades to a low-confidence answer with caveats.

use super::fallback::FallbackChain;
use super::hybrid_search::HybridSearchService;
use super::org_learnings::OrgLearningsService;
use super::research::{AnswerSynthesizer, EvidenceSynthesizer, assess_confidence, evidence_from_hit};
use crate::cache::{PermittedKey, PermittedRecords, QueryKey, TeamCaches};
use crate::clock::{Clock, SystemClock};
use crate::config::TeamRecallConfig;
use crate::models::{
    ConfidenceLevel, Evidence, OrgLearning, QueryStats, Record, RecordId, Scope, SearchHit,
    TeamMemoryResult, UserContext,
};
use crate::security::{PermissionFilter, RateLimiter, validate_results};
use crate::storage::{RecordCatalog, SearchBackend};
use crate::sweep::SweepHandle;
use crate::{Error, Result};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Rate-limited operation name for team queries.
pub const TEAM_QUERY_OPERATION: &str = "team_query";

/// Rate-limited operation name for single-record fetches.
pub const GET_RECORD_OPERATION: &str = "get_record";

/// Retrieval over-fetch factor, leaving room for hits dropped by validation.
const OVERFETCH: usize = 2;

/// Permission-checked, cached, rate-limited team memory queries.
pub struct TeamQueryService {
    catalog: Arc<dyn RecordCatalog>,
    search: HybridSearchService,
    permissions: PermissionFilter,
    limiter: Arc<RateLimiter>,
    caches: Arc<TeamCaches>,
    fallback: FallbackChain,
    synthesizer: Box<dyn AnswerSynthesizer>,
    learnings: OrgLearningsService,
    strong_threshold: f32,
    default_limit: usize,
    browse_base_url: Option<String>,
}

impl TeamQueryService {
    /// Creates a service using the system clock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `config` fails validation.
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        catalog: Arc<dyn RecordCatalog>,
        config: &TeamRecallConfig,
    ) -> Result<Self> {
        Self::with_clock(backend, catalog, config, SystemClock::shared())
    }

    /// Creates a service reading time from `clock`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `config` fails validation.
    pub fn with_clock(
        backend: Arc<dyn SearchBackend>,
        catalog: Arc<dyn RecordCatalog>,
        config: &TeamRecallConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let caches = Arc::new(TeamCaches::new(&config.cache, Arc::clone(&clock)));
        let limiter = Arc::new(RateLimiter::with_clock(
            config.rate_limits.clone(),
            Arc::clone(&clock),
        ));
        let learnings = OrgLearningsService::new(
            config.learnings.clone(),
            Arc::clone(&caches),
            Arc::clone(&clock),
        );
        Ok(Self {
            search: HybridSearchService::new(backend, &config.search)?,
            fallback: FallbackChain::with_clock(
                Arc::clone(&catalog),
                config.fallback.clone(),
                clock,
            ),
            catalog,
            permissions: PermissionFilter::new(),
            limiter,
            caches,
            synthesizer: Box::new(EvidenceSynthesizer::new(
                config.research.evolution_window_days,
            )),
            learnings,
            strong_threshold: config.research.strong_threshold,
            default_limit: config.search.default_limit,
            browse_base_url: config.search.browse_base_url.clone(),
        })
    }

    /// Replaces the permission filter.
    #[must_use]
    pub fn with_permission_filter(mut self, permissions: PermissionFilter) -> Self {
        self.permissions = permissions;
        self
    }

    /// Replaces the answer synthesizer.
    #[must_use]
    pub fn with_synthesizer(mut self, synthesizer: Box<dyn AnswerSynthesizer>) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    /// Returns the shared rate limiter.
    #[must_use]
    pub const fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Returns the shared caches.
    #[must_use]
    pub const fn caches(&self) -> &Arc<TeamCaches> {
        &self.caches
    }

    /// Returns the org learnings service.
    #[must_use]
    pub const fn learnings(&self) -> &OrgLearningsService {
        &self.learnings
    }

    /// Answers a question from the records visible to `context` at `scope`.
    ///
    /// A `limit` of zero uses the configured default. With `use_cache`,
    /// a fresh cached result for the same user, scope, question and limit
    /// is returned with `cached` set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyQuestion`], [`Error::MissingOrganization`] for
    /// an org-scoped query without an organization, or
    /// [`Error::RateLimitExceeded`]. Retrieval failures never surface.
    #[instrument(
        skip(self, question, context),
        fields(operation = "team_query", user_id = %context.user_id, scope = %scope)
    )]
    pub fn query_team_memory(
        &self,
        question: &str,
        context: &UserContext,
        scope: Scope,
        limit: usize,
        use_cache: bool,
    ) -> Result<TeamMemoryResult> {
        let start = Instant::now();
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::EmptyQuestion);
        }
        require_org(context, scope)?;
        self.limiter.enforce(&context.user_id, TEAM_QUERY_OPERATION)?;

        let limit = if limit == 0 { self.default_limit } else { limit };
        let key = QueryKey::new(
            &context.user_id,
            context.org_id.as_deref(),
            scope,
            question,
            limit,
        );
        if use_cache {
            if let Some(mut cached) = self.caches.results().get(&key) {
                cached.cached = true;
                debug!("Serving cached team query result");
                return Ok(cached);
            }
        }

        let permitted = self.permitted_records(context, scope);
        let mut stats = QueryStats {
            permitted_records: permitted.ids.len(),
            by_scope: permitted.by_scope,
            ..QueryStats::default()
        };

        let mut hits = if permitted.ids.is_empty() {
            Vec::new()
        } else {
            let retrieved = self.retrieve(question, limit);
            let retrieval_ok = retrieved.is_some();
            let retrieved = retrieved.unwrap_or_default();
            stats.hits_before_validation = retrieved.len();
            let outcome = validate_results(retrieved, &permitted.ids);
            stats.rejected_by_validation = outcome.rejected;
            debug!(
                retrieval_ok,
                kept = outcome.kept.len(),
                rejected = outcome.rejected,
                "Retrieval validated"
            );
            outcome.kept
        };
        hits.truncate(limit);

        let mut clarification = None;
        if hits.is_empty() && !permitted.ids.is_empty() {
            let outcome = self.fallback.execute(question, Some(&permitted.ids));
            stats.fallback_strategy = Some(outcome.strategy.as_str().to_string());
            hits = validate_results(outcome.hits, &permitted.ids).kept;
            clarification = outcome.clarification;
        }

        let evidence: Vec<Evidence> = hits.iter().map(|hit| self.evidence_from_hit(hit)).collect();
        let assessment = assess_confidence(&evidence, self.strong_threshold);
        let mut answer = self.synthesizer.synthesize(question, &evidence, &assessment);
        if permitted.ids.is_empty() {
            answer
                .caveats
                .push(format!("No records are visible to you at the {scope} scope."));
        }
        if let Some(request) = &clarification {
            answer.answer.clone_from(&request.message);
            answer.confidence = ConfidenceLevel::Low;
        }

        let sessions_searched = evidence
            .iter()
            .map(|e| e.citation.source.as_str())
            .collect::<HashSet<_>>()
            .len();
        stats.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let result = TeamMemoryResult {
            answer: answer.answer,
            confidence: answer.confidence,
            citations: answer.citations,
            caveats: answer.caveats,
            sessions_searched,
            cached: false,
            stats,
            clarification,
        };

        if use_cache && result.clarification.is_none() {
            self.caches.results().set(key, result.clone());
        }

        metrics::counter!(
            "team_queries_total",
            "scope" => scope.as_str(),
            "confidence" => result.confidence.as_str()
        )
        .increment(1);
        metrics::histogram!("team_query_duration_ms")
            .record(start.elapsed().as_secs_f64() * 1000.0);
        info!(
            confidence = %result.confidence,
            citations = result.citations.len(),
            sessions_searched,
            fallback = result.stats.fallback_strategy.as_deref().unwrap_or("none"),
            duration_ms = result.stats.duration_ms,
            "Team query answered"
        );
        Ok(result)
    }

    /// Fetches one record if `context` may see it at `scope`.
    ///
    /// A missing record is reported as [`Error::PermissionDenied`] so the
    /// caller cannot probe for ids it has no access to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`], [`Error::MissingOrganization`],
    /// [`Error::RateLimitExceeded`], or the catalog's error.
    #[instrument(skip(self, context), fields(operation = "get_record", user_id = %context.user_id))]
    pub fn get_record(&self, id: &RecordId, context: &UserContext, scope: Scope) -> Result<Record> {
        require_org(context, scope)?;
        self.limiter.enforce(&context.user_id, GET_RECORD_OPERATION)?;
        let Some(record) = self.catalog.get_record(id)? else {
            debug!(record_id = %id, "Record not found");
            return Err(Error::PermissionDenied);
        };
        self.permissions.require_access(&record, context, scope)?;
        Ok(record)
    }

    /// Returns the promoted learnings of the user's organization.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingOrganization`] if the context has no org.
    pub fn org_learnings(&self, context: &UserContext) -> Result<Arc<Vec<OrgLearning>>> {
        let org_id = context.org_id.as_deref().ok_or(Error::MissingOrganization)?;
        Ok(self.learnings.promoted_learnings(org_id))
    }

    /// Drops cached permissions and results after a user's grants change.
    pub fn invalidate_user(&self, user_id: &str) -> usize {
        self.caches.invalidate_user_permissions(user_id)
    }

    /// Starts the cache and rate limiter sweepers.
    ///
    /// The sweepers stop when the returned handles are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if a thread cannot be spawned.
    pub fn start_sweepers(&self) -> Result<Vec<SweepHandle>> {
        let mut handles = self.caches.start_sweepers()?;
        handles.push(self.limiter.start_sweeper()?);
        Ok(handles)
    }

    /// Resolves the ids visible to `context` at `scope`.
    ///
    /// A catalog failure yields an empty set, which is not cached.
    fn permitted_records(&self, context: &UserContext, scope: Scope) -> Arc<PermittedRecords> {
        let key = PermittedKey {
            user_id: context.user_id.clone(),
            org_id: context.org_id.clone(),
            scope,
        };
        if let Some(cached) = self.caches.permitted().get(&key) {
            return cached;
        }
        let records = match self.catalog.all_records() {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Permitted record resolution failed, denying all");
                return Arc::new(PermittedRecords::default());
            },
        };
        let filtered = self
            .permissions
            .filter_by_permission(&records, context, scope);
        let permitted = Arc::new(PermittedRecords {
            ids: filtered.id_set(),
            by_scope: filtered.by_scope,
        });
        self.caches.permitted().set(key, Arc::clone(&permitted));
        permitted
    }

    /// Runs hybrid retrieval; `None` when retrieval is unavailable.
    fn retrieve(&self, question: &str, limit: usize) -> Option<Vec<SearchHit>> {
        match self
            .search
            .search_question(question, limit.saturating_mul(OVERFETCH))
        {
            Ok(hits) => Some(hits),
            Err(e) => {
                warn!(error = %e, "Hybrid retrieval unavailable, falling back");
                None
            },
        }
    }

    fn evidence_from_hit(&self, hit: &SearchHit) -> Evidence {
        evidence_from_hit(
            hit,
            self.search.fusion(),
            self.browse_base_url.as_deref(),
        )
    }
}

fn require_org(context: &UserContext, scope: Scope) -> Result<()> {
    if scope == Scope::Org && context.org_id.as_deref().is_none_or(str::is_empty) {
        return Err(Error::MissingOrganization);
    }
    Ok(())
}

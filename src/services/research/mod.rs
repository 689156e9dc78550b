//! Confidence-driven research loop.
//!
//! A research session starts from one lead wrapping the question and
//! follows references found in the evidence (commits, change requests,
//! documents, files, authors) until the evidence is sufficient or nothing
//! is left to investigate.
//!
//! ```text
//! Queued -> Investigating -> Confident
//!                         -> Exhausted   (queue empty or lead budget spent)
//!                         -> Cancelled   (caller raised the flag)
//! ```
//!
//! Retrieval failures for a single lead are logged and the lead yields no
//! evidence; the loop never fails half-way. The worst outcome is a
//! low-confidence answer with explicit caveats.

mod confidence;
mod leads;
mod synthesis;

pub use confidence::assess_confidence;
pub use leads::{LeadQueue, base_priority, extract_leads, extract_question_leads};
pub use synthesis::{
    AnswerSynthesizer, EvidenceSynthesizer, LOW_CONFIDENCE_CAVEAT, MAX_CITATIONS, QuestionIntent,
    contradiction_caveats, dedup_citations,
};

use super::fallback::{FallbackChain, clarification_request, is_vague};
use super::hybrid_search::HybridSearchService;
use super::patterns::{CHANGE_REQUEST, CROSS_REFERENCE};
use super::rrf_fusion::RrfFusion;
use crate::clock::{Clock, SystemClock};
use crate::config::{FallbackSettings, ResearchSettings, SearchSettings, TeamRecallConfig};
use crate::models::{
    Citation, ClarificationRequest, ConfidenceLevel, Evidence, HitOrigin, Lead, LeadKind,
    RecordId, ResearchResult, ResearchState, SearchHit, references_path,
};
use crate::security::validate_results;
use crate::storage::{RecordCatalog, SearchBackend};
use crate::{Error, Result};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Maximum characters of record content quoted in a citation.
const EXCERPT_CHARS: usize = 240;

/// Cooperative cancellation for a research session.
///
/// Checked between leads; evidence gathered before cancellation is still
/// synthesized into an answer.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// Creates a flag that is not raised.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once the flag is raised.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Builder for [`ResearchEngine`].
pub struct ResearchEngineBuilder {
    backend: Arc<dyn SearchBackend>,
    catalog: Option<Arc<dyn RecordCatalog>>,
    search: SearchSettings,
    research: ResearchSettings,
    fallback: FallbackSettings,
    synthesizer: Option<Box<dyn AnswerSynthesizer>>,
    clock: Arc<dyn Clock>,
}

impl ResearchEngineBuilder {
    /// Enables the fallback chain over `catalog` for sessions that find
    /// no evidence, and source suggestions for vague questions.
    #[must_use]
    pub fn catalog(mut self, catalog: Arc<dyn RecordCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Applies the search, research and fallback sections of `config`.
    #[must_use]
    pub fn config(mut self, config: &TeamRecallConfig) -> Self {
        self.search = config.search.clone();
        self.research = config.research.clone();
        self.fallback = config.fallback.clone();
        self
    }

    /// Sets the research loop settings.
    #[must_use]
    pub fn research_settings(mut self, settings: ResearchSettings) -> Self {
        self.research = settings;
        self
    }

    /// Replaces the default [`EvidenceSynthesizer`].
    #[must_use]
    pub fn synthesizer(mut self, synthesizer: Box<dyn AnswerSynthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    /// Sets the clock used for recency scoring in the fallback chain.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Builds the engine.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a threshold outside `[0, 1]` or a
    /// zero lead budget, or if the expansion tables fail validation.
    pub fn build(self) -> Result<ResearchEngine> {
        if !(0.0..=1.0).contains(&self.research.strong_threshold) {
            return Err(Error::InvalidInput(format!(
                "strong_threshold must be within [0, 1], got {}",
                self.research.strong_threshold
            )));
        }
        if self.research.max_leads == 0 || self.research.results_per_lead == 0 {
            return Err(Error::InvalidInput(
                "max_leads and results_per_lead must be positive".to_string(),
            ));
        }
        let synthesizer = self.synthesizer.unwrap_or_else(|| {
            Box::new(EvidenceSynthesizer::new(
                self.research.evolution_window_days,
            ))
        });
        let fallback = self
            .catalog
            .map(|catalog| FallbackChain::with_clock(catalog, self.fallback, self.clock));
        Ok(ResearchEngine {
            search: HybridSearchService::new(self.backend, &self.search)?,
            browse_base_url: self.search.browse_base_url,
            fallback,
            synthesizer,
            settings: self.research,
        })
    }
}

/// Researches questions over a [`SearchBackend`].
pub struct ResearchEngine {
    search: HybridSearchService,
    fallback: Option<FallbackChain>,
    synthesizer: Box<dyn AnswerSynthesizer>,
    settings: ResearchSettings,
    browse_base_url: Option<String>,
}

/// Evidence gathered by one session.
#[derive(Default)]
struct Session {
    evidence: Vec<Evidence>,
    seen: HashSet<String>,
    sources: Vec<String>,
    investigated: usize,
}

impl Session {
    /// Adds evidence unless the same record was already collected.
    fn add(&mut self, key: String, evidence: Evidence) -> bool {
        if !self.seen.insert(key) {
            return false;
        }
        if !self.sources.contains(&evidence.citation.source) {
            self.sources.push(evidence.citation.source.clone());
        }
        self.evidence.push(evidence);
        true
    }
}

impl ResearchEngine {
    /// Starts building an engine over `backend`.
    #[must_use]
    pub fn builder(backend: Arc<dyn SearchBackend>) -> ResearchEngineBuilder {
        ResearchEngineBuilder {
            backend,
            catalog: None,
            search: SearchSettings::default(),
            research: ResearchSettings::default(),
            fallback: FallbackSettings::default(),
            synthesizer: None,
            clock: SystemClock::shared(),
        }
    }

    /// Returns the research settings.
    #[must_use]
    pub const fn settings(&self) -> &ResearchSettings {
        &self.settings
    }

    /// Researches a question until confident or out of leads.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyQuestion`] for an empty question. Retrieval
    /// failures never surface here.
    pub fn research_question(&self, question: &str) -> Result<ResearchResult> {
        self.research_with(question, None, &CancellationFlag::new())
    }

    /// Researches a question restricted to `permitted` record ids, stopping
    /// early if `cancel` is raised.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyQuestion`] for an empty question.
    #[instrument(
        skip(self, question, permitted, cancel),
        fields(operation = "research", session_id = tracing::field::Empty)
    )]
    pub fn research_with(
        &self,
        question: &str,
        permitted: Option<&HashSet<RecordId>>,
        cancel: &CancellationFlag,
    ) -> Result<ResearchResult> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::EmptyQuestion);
        }
        let session_id = Uuid::now_v7().to_string();
        tracing::Span::current().record("session_id", session_id.as_str());

        let mut session = Session::default();
        let mut state = self.run(question, &mut session, permitted, cancel);

        let mut clarification = None;
        if session.evidence.is_empty() && state != ResearchState::Cancelled {
            if let Some(fallback) = &self.fallback {
                let outcome = fallback.execute(question, permitted);
                for hit in &outcome.hits {
                    session.add(
                        hit.fusion_key().to_string(),
                        self.evidence_from_hit(hit),
                    );
                }
                clarification = outcome.clarification;
                state = ResearchState::Exhausted;
            } else if is_vague(question) {
                clarification = Some(clarification_request(question, Vec::new()));
            }
        }

        if session.evidence.is_empty() && is_vague(question) {
            if let Some(request) = clarification {
                debug!(leads = session.investigated, "Question too vague to research");
                return Ok(Self::clarify(session_id, request, session));
            }
        }

        let assessment = assess_confidence(&session.evidence, self.settings.strong_threshold);
        let answer = self
            .synthesizer
            .synthesize(question, &session.evidence, &assessment);

        #[allow(clippy::cast_precision_loss)]
        metrics::histogram!("research_leads_investigated").record(session.investigated as f64);
        metrics::counter!("research_sessions_total", "state" => state.as_str()).increment(1);
        info!(
            state = state.as_str(),
            leads = session.investigated,
            evidence = session.evidence.len(),
            confidence = %answer.confidence,
            "Research complete"
        );

        Ok(ResearchResult {
            session_id,
            answer: answer.answer,
            confidence: answer.confidence,
            citations: answer.citations,
            caveats: answer.caveats,
            searched_sources: session.sources,
            state,
            leads_investigated: session.investigated,
            clarification,
        })
    }

    /// Runs the lead loop and returns the terminal state.
    fn run(
        &self,
        question: &str,
        session: &mut Session,
        permitted: Option<&HashSet<RecordId>>,
        cancel: &CancellationFlag,
    ) -> ResearchState {
        let mut queue = LeadQueue::new();
        queue.push(Lead::initial(question));
        for lead in extract_question_leads(question) {
            queue.push(lead);
        }

        loop {
            if cancel.is_cancelled() {
                debug!(leads = session.investigated, "Research cancelled");
                return ResearchState::Cancelled;
            }
            if session.investigated >= self.settings.max_leads {
                debug!(max_leads = self.settings.max_leads, "Lead budget spent");
                return ResearchState::Exhausted;
            }
            let Some(lead) = queue.pop() else {
                return ResearchState::Exhausted;
            };

            session.investigated += 1;
            for (key, evidence) in self.investigate(&lead, permitted) {
                let follow_ups = extract_leads(&evidence, lead.priority);
                if session.add(key, evidence) {
                    for next in follow_ups {
                        queue.push(next);
                    }
                }
            }

            let assessment = assess_confidence(&session.evidence, self.settings.strong_threshold);
            debug!(
                lead = %lead.id,
                evidence = session.evidence.len(),
                queued = queue.len(),
                level = %assessment.level,
                reason = %assessment.reason,
                "Lead investigated"
            );
            if assessment.confident {
                return ResearchState::Confident;
            }
        }
    }

    /// Retrieves evidence for one lead. Errors yield no evidence.
    fn investigate(
        &self,
        lead: &Lead,
        permitted: Option<&HashSet<RecordId>>,
    ) -> Vec<(String, Evidence)> {
        let limit = self.settings.results_per_lead;
        let hits = match &lead.kind {
            LeadKind::Initial { query } => self.search.search_question(query, limit),
            LeadKind::Commit { sha } => self.search.search(sha, limit).map(|hits| {
                retain(hits, |hit| {
                    hit.content.to_lowercase().contains(sha.as_str())
                        || hit.fusion_key().to_lowercase().starts_with(sha.as_str())
                })
            }),
            LeadKind::ChangeRequest { number } => self
                .search
                .search(&format!("#{number}"), limit)
                .map(|hits| retain(hits, |hit| mentions_change_request(&hit.content, *number))),
            LeadKind::File { path } => self.search.search(path, limit).map(|hits| {
                retain(hits, |hit| references_path(&hit.metadata.files, path))
            }),
            LeadKind::CrossReference { reference } => {
                self.search.search(reference, limit).map(|hits| {
                    retain(hits, |hit| mentions_reference(&hit.content, reference))
                })
            },
            LeadKind::Author { name } => self.search.search(name, limit).map(|hits| {
                retain(hits, |hit| {
                    hit.metadata
                        .author
                        .as_deref()
                        .is_some_and(|a| a.trim().eq_ignore_ascii_case(name.trim()))
                })
            }),
        };

        let hits = match hits {
            Ok(hits) => hits,
            Err(e) => {
                warn!(lead = %lead.id, error = %e, "Lead investigation failed, skipping");
                return Vec::new();
            },
        };
        let hits = match permitted {
            Some(permitted) => validate_results(hits, permitted).kept,
            None => hits,
        };
        hits.iter()
            .map(|hit| (hit.fusion_key().to_string(), self.evidence_from_hit(hit)))
            .collect()
    }

    fn evidence_from_hit(&self, hit: &SearchHit) -> Evidence {
        evidence_from_hit(
            hit,
            self.search.fusion(),
            self.browse_base_url.as_deref(),
        )
    }

    /// Answers a vague question that found nothing with a clarification.
    fn clarify(
        session_id: String,
        clarification: ClarificationRequest,
        session: Session,
    ) -> ResearchResult {
        metrics::counter!("research_sessions_total", "state" => "clarification").increment(1);
        ResearchResult {
            session_id,
            answer: clarification.message.clone(),
            confidence: ConfidenceLevel::Low,
            citations: Vec::new(),
            caveats: vec!["The question was too broad to research.".to_string()],
            searched_sources: session.sources,
            state: ResearchState::Exhausted,
            leads_investigated: session.investigated,
            clarification: Some(clarification),
        }
    }
}

/// Converts a retrieval hit into evidence.
///
/// Fused scores are normalized with [`RrfFusion::normalized_relevance`];
/// other scores are clamped to `[0, 1]`.
#[must_use]
pub fn evidence_from_hit(
    hit: &SearchHit,
    fusion: &RrfFusion,
    browse_base_url: Option<&str>,
) -> Evidence {
    let confidence = match hit.origin {
        HitOrigin::Fused => fusion.normalized_relevance(hit.score),
        HitOrigin::Keyword | HitOrigin::Semantic | HitOrigin::Scan => hit.score.clamp(0.0, 1.0),
    };
    Evidence {
        citation: Citation {
            source: hit.metadata.source.clone(),
            excerpt: excerpt(&hit.content),
            relevance: confidence,
            timestamp: hit.metadata.timestamp,
            author: hit.metadata.author.clone(),
            record_id: hit.id.clone(),
            browse_url: browse_base_url
                .map(|base| format!("{}/{}", base.trim_end_matches('/'), hit.metadata.source)),
        },
        claim: claim(&hit.content),
        confidence,
        record_type: hit.metadata.record_type,
        files: hit.metadata.files.clone(),
    }
}

fn retain<F>(mut hits: Vec<SearchHit>, keep: F) -> Vec<SearchHit>
where
    F: Fn(&SearchHit) -> bool,
{
    hits.retain(|hit| keep(hit));
    hits
}

fn mentions_change_request(text: &str, number: u64) -> bool {
    CHANGE_REQUEST
        .captures_iter(text)
        .filter_map(|c| c.get(1)?.as_str().parse::<u64>().ok())
        .any(|n| n == number)
}

fn mentions_reference(text: &str, reference: &str) -> bool {
    CROSS_REFERENCE.captures_iter(text).any(|c| {
        let (Some(prefix), Some(number)) = (c.get(1), c.get(2)) else {
            return false;
        };
        format!("{}-{}", prefix.as_str(), number.as_str()).eq_ignore_ascii_case(reference)
    })
}

/// First non-empty line of the content.
fn claim(content: &str) -> String {
    content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .to_string()
}

fn excerpt(content: &str) -> String {
    let content = content.trim();
    if content.chars().count() <= EXCERPT_CHARS {
        return content.to_string();
    }
    let cut: String = content.chars().take(EXCERPT_CHARS).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::models::{HitMetadata, Record, RecordType};
    use crate::storage::InMemoryStore;

    const DAY: u64 = 86_400_000;

    fn record(id: &str, author: &str, summary: &str, detail: &str) -> Record {
        Record {
            id: RecordId::new(id),
            source: format!("repo/{id}"),
            record_type: RecordType::Commit,
            timestamp: 100 * DAY,
            author: author.to_string(),
            summary: summary.to_string(),
            detail: detail.to_string(),
            files: Vec::new(),
            embedding: None,
            owner_id: "u1".to_string(),
            project_id: None,
            repo_id: None,
            org_id: None,
        }
    }

    fn engine(store: &Arc<InMemoryStore>) -> ResearchEngine {
        let backend: Arc<dyn SearchBackend> = store.clone();
        ResearchEngine::builder(backend).build().unwrap()
    }

    /// Keyword-only hits never reach a threshold of 1.0.
    fn strict_engine(store: &Arc<InMemoryStore>, max_leads: usize) -> ResearchEngine {
        let backend: Arc<dyn SearchBackend> = store.clone();
        ResearchEngine::builder(backend)
            .research_settings(ResearchSettings {
                strong_threshold: 1.0,
                max_leads,
                ..ResearchSettings::default()
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_empty_question_rejected() {
        let store = Arc::new(InMemoryStore::new());
        assert!(matches!(
            engine(&store).research_question("   "),
            Err(Error::EmptyQuestion)
        ));
    }

    #[test]
    fn test_confident_high_from_two_authors() {
        let store = Arc::new(
            InMemoryStore::indexed(vec![
                record(
                    "r1",
                    "alice",
                    "billing service owner rotation",
                    "alice maintains billing service",
                ),
                record(
                    "r2",
                    "bob",
                    "billing service retries",
                    "bob reviewed billing service retries",
                ),
                record("r3", "carol", "frontend colors", "palette tweaks"),
            ])
            .unwrap(),
        );
        let result = engine(&store)
            .research_question("Who owns the billing service?")
            .unwrap();
        assert_eq!(result.state, ResearchState::Confident);
        assert_eq!(result.confidence, ConfidenceLevel::High);
        assert_eq!(result.leads_investigated, 1);
        assert!(result.citations.len() >= 2);
    }

    #[test]
    fn test_exhausted_low_has_caveats() {
        let store = Arc::new(
            InMemoryStore::indexed(vec![record("r1", "alice", "frontend colors", "palette")])
                .unwrap(),
        );
        let result = engine(&store)
            .research_question("why did we adopt kafka streams?")
            .unwrap();
        assert_eq!(result.state, ResearchState::Exhausted);
        assert_eq!(result.confidence, ConfidenceLevel::Low);
        assert!(!result.caveats.is_empty());
    }

    #[test]
    fn test_retrieval_failure_is_soft() {
        let store = Arc::new(
            InMemoryStore::indexed(vec![record("r1", "alice", "billing service", "")]).unwrap(),
        );
        store.set_keyword_failure(true);
        store.set_semantic_failure(true);
        let result = engine(&store)
            .research_question("who owns billing service")
            .unwrap();
        assert_eq!(result.state, ResearchState::Exhausted);
        assert_eq!(result.confidence, ConfidenceLevel::Low);
    }

    #[test]
    fn test_cancelled_before_start() {
        let store = Arc::new(InMemoryStore::new());
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let result = engine(&store)
            .research_with("who owns billing service", None, &cancel)
            .unwrap();
        assert_eq!(result.state, ResearchState::Cancelled);
        assert_eq!(result.leads_investigated, 0);
    }

    #[test]
    fn test_vague_question_asks_for_clarification() {
        let store = Arc::new(InMemoryStore::new());
        let result = engine(&store).research_question("stuff").unwrap();
        assert!(result.clarification.is_some());
        assert_eq!(result.leads_investigated, 1);
        assert_eq!(result.confidence, ConfidenceLevel::Low);
        assert_eq!(store.keyword_call_count(), 1);
    }

    #[test]
    fn test_one_word_question_is_researched() {
        let store = Arc::new(
            InMemoryStore::indexed(vec![
                record("r1", "alice", "kubernetes cluster upgrade", "drained nodes first"),
                record("r2", "bob", "kubernetes cluster upgrade rollback", "pinned version"),
            ])
            .unwrap(),
        );
        let result = engine(&store).research_question("kubernetes").unwrap();
        assert!(result.clarification.is_none());
        assert!(result.leads_investigated >= 1);
        assert!(!result.citations.is_empty());
        assert!(store.keyword_call_count() >= 1);
    }

    #[test]
    fn test_follows_change_request_lead() {
        let store = Arc::new(
            InMemoryStore::indexed(vec![
                record("r1", "alice", "webhook retry storm", "fixed in #42"),
                record("r2", "bob", "PR #42 review", "backoff must be capped"),
            ])
            .unwrap(),
        );
        store.set_semantic_failure(true);
        let engine = strict_engine(&store, 5);
        let result = engine.research_question("webhook retry storm").unwrap();
        assert_eq!(result.leads_investigated, 2);
        assert_eq!(result.state, ResearchState::Confident);
        assert_eq!(result.searched_sources, vec!["repo/r1", "repo/r2"]);
    }

    #[test]
    fn test_lead_budget_bounds_loop() {
        let store = Arc::new(
            InMemoryStore::indexed(vec![record(
                "r1",
                "alice",
                "cache eviction policy details",
                "see #7",
            )])
            .unwrap(),
        );
        store.set_semantic_failure(true);
        let result = strict_engine(&store, 1)
            .research_question("cache eviction policy details")
            .unwrap();
        assert_eq!(result.leads_investigated, 1);
        assert_eq!(result.state, ResearchState::Exhausted);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let backend: Arc<dyn SearchBackend> = store;
        let result = ResearchEngine::builder(backend)
            .research_settings(ResearchSettings {
                max_leads: 0,
                ..ResearchSettings::default()
            })
            .build();
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_evidence_from_fused_hit() {
        let fusion = RrfFusion::new();
        let hit = SearchHit {
            id: Some(RecordId::new("r1")),
            content: "\nfirst line\nsecond".to_string(),
            score: fusion.rank_score(0) * 2.0,
            origin: HitOrigin::Fused,
            metadata: HitMetadata {
                source: "repo".to_string(),
                ..HitMetadata::default()
            },
        };
        let evidence = evidence_from_hit(&hit, &fusion, Some("https://git.example.com/"));
        assert_eq!(evidence.claim, "first line");
        assert!(evidence.confidence > 0.99);
        assert_eq!(
            evidence.citation.browse_url.as_deref(),
            Some("https://git.example.com/repo")
        );
    }
}

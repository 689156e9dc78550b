//! Fallback chain for empty or unavailable primary retrieval.
//!
//! Strategies run in a fixed order and the first one that produces
//! results wins:
//!
//! 1. **Recency scan**: the most recently active sources, scored by a blend
//!    of keyword overlap and `exp(-hours / decay)`.
//! 2. **Exhaustive scan**: every record of every source, bounded by a
//!    wall-clock timeout and a result cap, one result per source.
//! 3. **Clarification**: ask the user to narrow the question.
//!
//! Vague questions skip straight to clarification.

use super::keywords::{STOP_WORDS, extract_keywords, keyword_overlap};
use super::patterns::TEMPORAL;
use crate::clock::{Clock, SystemClock};
use crate::config::FallbackSettings;
use crate::models::{ClarificationRequest, HitOrigin, Record, RecordId, SearchHit};
use crate::Result;
use crate::storage::RecordCatalog;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};

/// Weight of the dominant component in the recency blend.
const DOMINANT_WEIGHT: f64 = 0.7;

/// Number of source names offered as clarification suggestions.
const MAX_SUGGESTIONS: usize = 5;

const MS_PER_HOUR: f64 = 3_600_000.0;

/// A fallback strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FallbackStrategy {
    /// Recently active sources.
    RecencyScan,
    /// Every source, bounded by a timeout.
    ExhaustiveScan,
    /// Ask the user to narrow the question.
    Clarification,
}

impl FallbackStrategy {
    /// Returns the strategy as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RecencyScan => "recency_scan",
            Self::ExhaustiveScan => "exhaustive_scan",
            Self::Clarification => "clarification",
        }
    }
}

impl fmt::Display for FallbackStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of running the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackOutcome {
    /// Strategy that produced the outcome.
    pub strategy: FallbackStrategy,
    /// Strategies tried, in order.
    pub attempted: Vec<FallbackStrategy>,
    /// Hits, empty when the outcome is a clarification.
    pub hits: Vec<SearchHit>,
    /// Set when the chain ended in a clarification.
    pub clarification: Option<ClarificationRequest>,
    /// True if the exhaustive scan hit its deadline.
    pub timed_out: bool,
}

/// Runs the fallback strategies over a [`RecordCatalog`].
pub struct FallbackChain {
    catalog: Arc<dyn RecordCatalog>,
    settings: FallbackSettings,
    clock: Arc<dyn Clock>,
}

impl FallbackChain {
    /// Creates a chain using the system clock.
    #[must_use]
    pub fn new(catalog: Arc<dyn RecordCatalog>, settings: FallbackSettings) -> Self {
        Self::with_clock(catalog, settings, SystemClock::shared())
    }

    /// Creates a chain with an explicit clock for recency scoring.
    #[must_use]
    pub fn with_clock(
        catalog: Arc<dyn RecordCatalog>,
        settings: FallbackSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            catalog,
            settings,
            clock,
        }
    }

    /// Returns the settings.
    #[must_use]
    pub const fn settings(&self) -> &FallbackSettings {
        &self.settings
    }

    /// Runs the chain.
    ///
    /// When `permitted` is set, both scans only consider those records.
    /// Strategy failures are logged and the next strategy runs; the chain
    /// itself never fails.
    #[instrument(skip(self, permitted), fields(operation = "fallback"))]
    pub fn execute(&self, query: &str, permitted: Option<&HashSet<RecordId>>) -> FallbackOutcome {
        let mut attempted = Vec::new();

        if !is_vague(query) {
            attempted.push(FallbackStrategy::RecencyScan);
            match self.recency_scan(query, permitted) {
                Ok(hits) if !hits.is_empty() => {
                    return finish(FallbackStrategy::RecencyScan, attempted, hits, false);
                },
                Ok(_) => debug!("Recency scan found nothing"),
                Err(e) => warn!(error = %e, "Recency scan failed"),
            }

            if self.settings.exhaustive_enabled {
                attempted.push(FallbackStrategy::ExhaustiveScan);
                match self.exhaustive_scan(query, permitted) {
                    Ok((hits, timed_out)) if !hits.is_empty() => {
                        return finish(FallbackStrategy::ExhaustiveScan, attempted, hits, timed_out);
                    },
                    Ok(_) => debug!("Exhaustive scan found nothing"),
                    Err(e) => warn!(error = %e, "Exhaustive scan failed"),
                }
            }
        }

        attempted.push(FallbackStrategy::Clarification);
        let mut outcome = finish(FallbackStrategy::Clarification, attempted, Vec::new(), false);
        outcome.clarification = Some(self.clarification(query, permitted));
        outcome
    }

    /// Scores the most recently active sources.
    ///
    /// Temporal questions weight recency 0.7; others weight keyword overlap
    /// 0.7 and drop sources with no overlap at all.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot list sources.
    pub fn recency_scan(
        &self,
        query: &str,
        permitted: Option<&HashSet<RecordId>>,
    ) -> Result<Vec<SearchHit>> {
        let keywords = extract_keywords(query);
        let temporal = is_temporal(query);
        let (recency_weight, overlap_weight) = if temporal {
            (DOMINANT_WEIGHT, 1.0 - DOMINANT_WEIGHT)
        } else {
            (1.0 - DOMINANT_WEIGHT, DOMINANT_WEIGHT)
        };
        let now = self.clock.now_ms();

        let mut hits = Vec::new();
        for source in self
            .catalog
            .list_sources()?
            .iter()
            .take(self.settings.recency_max_sources)
        {
            let Some((record, overlap)) =
                self.best_record(&source.source, &keywords, permitted, None)
            else {
                continue;
            };
            if !temporal && overlap <= 0.0 {
                continue;
            }
            #[allow(clippy::cast_precision_loss)]
            let hours = now.saturating_sub(record.timestamp) as f64 / MS_PER_HOUR;
            let recency = (-hours / self.settings.recency_decay_hours).exp();
            let score = recency_weight.mul_add(recency, overlap_weight * f64::from(overlap));
            #[allow(clippy::cast_possible_truncation)]
            hits.push(SearchHit::from_record(&record, score as f32, HitOrigin::Scan));
        }

        sort_hits(&mut hits);
        hits.truncate(self.settings.max_results);
        debug!(temporal, results = hits.len(), "Recency scan complete");
        Ok(hits)
    }

    /// Scans every source for keyword overlap, one result per source.
    ///
    /// The deadline is checked between sources and between records; on
    /// timeout the partial results are returned with `true`.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot list sources.
    pub fn exhaustive_scan(
        &self,
        query: &str,
        permitted: Option<&HashSet<RecordId>>,
    ) -> Result<(Vec<SearchHit>, bool)> {
        let keywords = extract_keywords(query);
        let deadline = Instant::now() + self.settings.exhaustive_timeout;
        let mut hits = Vec::new();
        let mut timed_out = false;

        for source in self.catalog.list_sources()? {
            if Instant::now() >= deadline {
                timed_out = true;
                break;
            }
            if let Some((record, overlap)) =
                self.best_record(&source.source, &keywords, permitted, Some(deadline))
            {
                if overlap > 0.0 {
                    hits.push(SearchHit::from_record(&record, overlap, HitOrigin::Scan));
                }
            }
            if hits.len() >= self.settings.max_results {
                break;
            }
        }
        if Instant::now() >= deadline {
            timed_out = true;
        }

        sort_hits(&mut hits);
        if timed_out {
            warn!(results = hits.len(), "Exhaustive scan timed out, returning partial results");
            metrics::counter!("fallback_exhaustive_timeouts_total").increment(1);
        }
        Ok((hits, timed_out))
    }

    /// Builds a clarification prompt suggesting recently active sources.
    #[must_use]
    pub fn clarification(
        &self,
        query: &str,
        permitted: Option<&HashSet<RecordId>>,
    ) -> ClarificationRequest {
        let suggestions = match self.catalog.list_sources() {
            Ok(sources) => sources
                .into_iter()
                .filter(|s| {
                    permitted.is_none_or(|p| s.record_ids.iter().any(|id| p.contains(id)))
                })
                .take(MAX_SUGGESTIONS)
                .map(|s| s.source)
                .collect(),
            Err(e) => {
                warn!(error = %e, "Could not list sources for clarification");
                Vec::new()
            },
        };
        clarification_request(query, suggestions)
    }

    /// Returns the record of `source` with the highest keyword overlap,
    /// newest first on ties.
    fn best_record(
        &self,
        source: &str,
        keywords: &[String],
        permitted: Option<&HashSet<RecordId>>,
        deadline: Option<Instant>,
    ) -> Option<(Record, f32)> {
        let records = match self.catalog.scan_source(source) {
            Ok(records) => records,
            Err(e) => {
                warn!(source, error = %e, "Skipping unreadable source");
                return None;
            },
        };

        let mut best: Option<(Record, f32)> = None;
        for record in records {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break;
            }
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    warn!(source, error = %e, "Skipping unreadable record");
                    continue;
                },
            };
            if permitted.is_some_and(|p| !p.contains(&record.id)) {
                continue;
            }
            let overlap = keyword_overlap(keywords, &scan_text(&record));
            let better = match &best {
                None => true,
                Some((current, score)) => {
                    overlap > *score
                        || ((overlap - *score).abs() < f32::EPSILON
                            && record.timestamp > current.timestamp)
                },
            };
            if better {
                best = Some((record, overlap));
            }
        }
        best
    }
}

/// Returns true for questions too vague to research: one word or fewer,
/// only stop words, or an article followed by a single noun.
#[must_use]
pub fn is_vague(query: &str) -> bool {
    let words: Vec<String> = query
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect();
    match words.as_slice() {
        [] | [_] => true,
        [article, _] if matches!(article.as_str(), "a" | "an" | "the") => true,
        words => words.iter().all(|w| STOP_WORDS.contains(w.as_str())),
    }
}

/// Builds the clarification prompt for `query`.
#[must_use]
pub fn clarification_request(query: &str, suggestions: Vec<String>) -> ClarificationRequest {
    let message = if is_vague(query) {
        format!(
            "\"{}\" is too broad to research. Which project or topic do you mean?",
            query.trim()
        )
    } else {
        format!(
            "I couldn't find anything about \"{}\". \
             Could you name a specific repository, file or person?",
            query.trim()
        )
    };
    ClarificationRequest {
        message,
        suggestions,
    }
}

/// Returns true for questions about recent activity.
#[must_use]
pub fn is_temporal(query: &str) -> bool {
    TEMPORAL.is_match(query)
}

fn finish(
    strategy: FallbackStrategy,
    attempted: Vec<FallbackStrategy>,
    hits: Vec<SearchHit>,
    timed_out: bool,
) -> FallbackOutcome {
    metrics::counter!("fallback_strategy_total", "strategy" => strategy.as_str()).increment(1);
    debug!(strategy = %strategy, results = hits.len(), "Fallback chain finished");
    FallbackOutcome {
        strategy,
        attempted,
        hits,
        clarification: None,
        timed_out,
    }
}

fn scan_text(record: &Record) -> String {
    format!(
        "{}\n{}\n{}",
        record.text(),
        record.author,
        record.files.join(" ")
    )
}

fn sort_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
}

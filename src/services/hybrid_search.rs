//! Hybrid keyword + semantic retrieval.
//!
//! Both legs run concurrently on scoped threads and are fused with
//! [`RrfFusion`]. A failing leg is logged and treated as empty; only when
//! both fail does the search report [`Error::RetrievalUnavailable`].

use super::keywords::extract_keywords;
use super::query_expansion::{ExpansionLevel, QueryExpander};
use super::rrf_fusion::RrfFusion;
use crate::config::SearchSettings;
use crate::models::SearchHit;
use crate::storage::SearchBackend;
use crate::{Error, Result};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, instrument, warn};

/// Hybrid search over a [`SearchBackend`].
pub struct HybridSearchService {
    backend: Arc<dyn SearchBackend>,
    expander: QueryExpander,
    fusion: RrfFusion,
    collection: String,
    expansion_level: ExpansionLevel,
}

impl HybridSearchService {
    /// Creates a service from search settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the built-in expansion tables fail validation.
    pub fn new(backend: Arc<dyn SearchBackend>, settings: &SearchSettings) -> Result<Self> {
        Ok(Self {
            backend,
            expander: QueryExpander::builtin(settings.max_terms_per_word)?,
            fusion: RrfFusion::with_k(settings.rrf_k),
            collection: settings.collection.clone(),
            expansion_level: settings.expansion_level,
        })
    }

    /// Replaces the query expander.
    #[must_use]
    pub fn with_expander(mut self, expander: QueryExpander) -> Self {
        self.expander = expander;
        self
    }

    /// Returns the fusion combiner.
    #[must_use]
    pub const fn fusion(&self) -> &RrfFusion {
        &self.fusion
    }

    /// Returns the default collection.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Searches `collection` with the same text on both legs.
    ///
    /// The keyword leg receives the expanded expression of `query`; the
    /// semantic leg receives `query` unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RetrievalUnavailable`] if both legs fail.
    pub fn hybrid_search(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        self.search_legs(collection, query, query, limit)
    }

    /// Searches the default collection for a natural-language question.
    ///
    /// Stop words and intent words ("who", "owns", "why") are dropped from
    /// the keyword leg so the implicit AND only spans subject words.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RetrievalUnavailable`] if both legs fail.
    pub fn search_question(&self, question: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let keywords = extract_keywords(question).join(" ");
        self.search_legs(&self.collection, &keywords, question, limit)
    }

    /// Searches the default collection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RetrievalUnavailable`] if both legs fail.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        self.search_legs(&self.collection, query, query, limit)
    }

    #[instrument(
        skip(self, keyword_text, semantic_text),
        fields(operation = "hybrid_search")
    )]
    fn search_legs(
        &self,
        collection: &str,
        keyword_text: &str,
        semantic_text: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let fetch = limit.saturating_mul(2);
        let expanded = self.expander.expand(keyword_text, self.expansion_level);
        debug!(
            expression = %expanded.expanded,
            expansions = expanded.expansions_applied,
            "Expanded keyword query"
        );

        let (keyword, semantic) = thread::scope(|s| {
            let keyword = s.spawn(|| {
                self.backend
                    .keyword_search(collection, &expanded.expanded, fetch)
            });
            let semantic = s.spawn(|| {
                self.backend
                    .semantic_search(collection, semantic_text, fetch)
            });
            (join_leg(keyword, "keyword_search"), join_leg(semantic, "semantic_search"))
        });

        let result = match (keyword, semantic) {
            (Err(keyword_err), Err(semantic_err)) => Err(Error::RetrievalUnavailable {
                operation: "hybrid_search".to_string(),
                cause: format!("keyword: {keyword_err}; semantic: {semantic_err}"),
            }),
            (keyword, semantic) => {
                let keyword = keyword.unwrap_or_else(|e| leg_failed("keyword", &e));
                let semantic = semantic.unwrap_or_else(|e| leg_failed("semantic", &e));
                Ok(self.combine(keyword, semantic, limit))
            },
        };

        let status = if result.is_ok() { "success" } else { "error" };
        metrics::histogram!("hybrid_search_duration_ms", "status" => status)
            .record(start.elapsed().as_secs_f64() * 1000.0);
        result
    }

    fn combine(
        &self,
        mut keyword: Vec<SearchHit>,
        mut semantic: Vec<SearchHit>,
        limit: usize,
    ) -> Vec<SearchHit> {
        let hits = if keyword.is_empty() {
            semantic.truncate(limit);
            semantic
        } else if semantic.is_empty() {
            keyword.truncate(limit);
            keyword
        } else {
            self.fusion.fuse(&keyword, &semantic, limit)
        };
        debug!(results = hits.len(), "Hybrid search complete");
        hits
    }
}

fn join_leg(
    handle: thread::ScopedJoinHandle<'_, Result<Vec<SearchHit>>>,
    operation: &str,
) -> Result<Vec<SearchHit>> {
    handle.join().unwrap_or_else(|_| {
        Err(Error::RetrievalUnavailable {
            operation: operation.to_string(),
            cause: "retrieval thread panicked".to_string(),
        })
    })
}

fn leg_failed(leg: &'static str, error: &Error) -> Vec<SearchHit> {
    warn!(leg, error = %error, "Retrieval leg failed, continuing with the other");
    metrics::counter!("hybrid_search_leg_failures_total", "leg" => leg).increment(1);
    Vec::new()
}

//! Reciprocal Rank Fusion (RRF) for hybrid search.
//!
//! RRF combines ranked lists without normalizing their scores.
//!
//! # Algorithm
//!
//! For each document `d` at 0-based rank `r` in a list:
//!
//! ```text
//! RRF_score(d) = sum over lists of 1 / (k + r + 1)
//! ```
//!
//! With `k = 60` a document ranked first in two lists scores `2/61`, the
//! maximum possible for two lists.
//!
//! # References
//!
//! - Cormack, G. V., Clarke, C. L., & Buettcher, S. (2009). "Reciprocal Rank Fusion
//!   outperforms Condorcet and individual Rank Learning Methods"

use crate::models::{HitOrigin, SearchHit};
use std::collections::HashMap;

/// Default RRF dampening constant.
pub const DEFAULT_RRF_K: f32 = 60.0;

/// Configuration for RRF fusion.
#[derive(Debug, Clone, Copy)]
pub struct RrfConfig {
    /// The k constant (default: 60).
    ///
    /// Higher values dampen the advantage of top-ranked documents.
    pub k: f32,
}

impl Default for RrfConfig {
    fn default() -> Self {
        Self { k: DEFAULT_RRF_K }
    }
}

/// Reciprocal Rank Fusion combiner.
///
/// # Example
///
/// ```ignore
/// use teamrecall::services::RrfFusion;
///
/// let fusion = RrfFusion::new();
/// let combined = fusion.fuse(&keyword_hits, &semantic_hits, 10);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct RrfFusion {
    config: RrfConfig,
}

impl RrfFusion {
    /// Creates a combiner with `k = 60`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a combiner with a custom `k`.
    #[must_use]
    pub const fn with_k(k: f32) -> Self {
        Self {
            config: RrfConfig { k },
        }
    }

    /// Returns the k constant.
    #[must_use]
    pub const fn k(&self) -> f32 {
        self.config.k
    }

    /// Returns the RRF contribution of a 0-based rank.
    #[must_use]
    pub fn rank_score(&self, rank: usize) -> f32 {
        #[allow(clippy::cast_precision_loss)]
        let rank = rank as f32;
        1.0 / (self.config.k + rank + 1.0)
    }

    /// Maps a fused score onto `[0, 1]`.
    ///
    /// The divisor is the best two-list score, `2 / (k + 1)`.
    #[must_use]
    pub fn normalized_relevance(&self, score: f32) -> f32 {
        (score * (self.config.k + 1.0) / 2.0).clamp(0.0, 1.0)
    }

    /// Fuses two ranked lists.
    ///
    /// Hits are merged by [`SearchHit::fusion_key`]. Each returned hit keeps
    /// the metadata of its first appearance (keyword list first), has its
    /// `score` replaced by the fused value and is marked [`HitOrigin::Fused`].
    /// Ties keep first-appearance order.
    ///
    /// ```text
    /// keyword:  [A, B, C]
    /// semantic: [B, C, D]
    ///
    /// A: 1/61          = 0.0164
    /// B: 1/62 + 1/61   = 0.0325
    /// C: 1/63 + 1/62   = 0.0320
    /// D: 1/63          = 0.0159
    ///
    /// fused: [B, C, A, D]
    /// ```
    #[must_use]
    pub fn fuse(
        &self,
        keyword_results: &[SearchHit],
        semantic_results: &[SearchHit],
        limit: usize,
    ) -> Vec<SearchHit> {
        self.fuse_multiple(&[keyword_results, semantic_results], limit)
    }

    /// Fuses any number of ranked lists.
    #[must_use]
    pub fn fuse_multiple(&self, result_lists: &[&[SearchHit]], limit: usize) -> Vec<SearchHit> {
        let capacity: usize = result_lists.iter().map(|l| l.len()).sum();
        let mut scores: HashMap<&str, (usize, f32)> = HashMap::with_capacity(capacity);
        let mut first_seen: Vec<&SearchHit> = Vec::with_capacity(capacity);

        for results in result_lists {
            for (rank, hit) in results.iter().enumerate() {
                let rrf_score = self.rank_score(rank);
                let next_slot = first_seen.len();
                let entry = scores
                    .entry(hit.fusion_key())
                    .or_insert((next_slot, 0.0));
                if entry.0 == next_slot {
                    first_seen.push(hit);
                }
                entry.1 += rrf_score;
            }
        }

        let mut fused: Vec<(usize, f32)> = scores.into_values().collect();
        fused.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        fused.truncate(limit);

        fused
            .into_iter()
            .filter_map(|(slot, score)| {
                first_seen.get(slot).map(|hit| {
                    let mut hit = (*hit).clone();
                    hit.score = score;
                    hit.origin = HitOrigin::Fused;
                    hit
                })
            })
            .collect()
    }
}

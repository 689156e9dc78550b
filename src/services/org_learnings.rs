//! Organization-wide learnings.
//!
//! Learnings are aggregated by normalized content hash. A learning is
//! promoted once it has been observed often enough with a high enough
//! mean confidence.

use crate::cache::{ContentHasher, TeamCaches};
use crate::clock::Clock;
use crate::config::LearningSettings;
use crate::models::OrgLearning;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, instrument};

struct Aggregate {
    learning: OrgLearning,
    confidence_sum: f32,
}

/// Records and promotes org learnings.
pub struct OrgLearningsService {
    orgs: RwLock<HashMap<String, HashMap<String, Aggregate>>>,
    settings: LearningSettings,
    caches: Arc<TeamCaches>,
    clock: Arc<dyn Clock>,
}

impl OrgLearningsService {
    /// Creates a service that serves promotions through `caches`.
    #[must_use]
    pub fn new(settings: LearningSettings, caches: Arc<TeamCaches>, clock: Arc<dyn Clock>) -> Self {
        Self {
            orgs: RwLock::new(HashMap::new()),
            settings,
            caches,
            clock,
        }
    }

    /// Records one observation of a learning.
    ///
    /// The org's cached promotions are invalidated before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for empty text or a confidence
    /// outside `[0, 1]`.
    #[instrument(skip(self, text), fields(operation = "record_learning"))]
    pub fn record_learning(
        &self,
        org_id: &str,
        author: &str,
        text: &str,
        confidence: f32,
    ) -> Result<OrgLearning> {
        if text.trim().is_empty() {
            return Err(Error::InvalidInput("learning text must not be empty".to_string()));
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(Error::InvalidInput(format!(
                "confidence must be within [0, 1], got {confidence}"
            )));
        }

        let key = ContentHasher::hash(text);
        let now = self.clock.now_ms();
        let snapshot = {
            let mut orgs = self.orgs.write().unwrap_or_else(PoisonError::into_inner);
            let aggregate = orgs
                .entry(org_id.to_string())
                .or_default()
                .entry(key.clone())
                .or_insert_with(|| Aggregate {
                    learning: OrgLearning {
                        key,
                        text: text.trim().to_string(),
                        occurrences: 0,
                        contributors: Vec::new(),
                        confidence: 0.0,
                        first_seen: now,
                        last_seen: now,
                    },
                    confidence_sum: 0.0,
                });
            aggregate.confidence_sum += confidence;
            let learning = &mut aggregate.learning;
            learning.occurrences += 1;
            #[allow(clippy::cast_precision_loss)]
            let mean = aggregate.confidence_sum / learning.occurrences as f32;
            learning.confidence = mean;
            learning.last_seen = now;
            let author = author.trim();
            if !author.is_empty() && !learning.contributors.iter().any(|c| c == author) {
                learning.contributors.push(author.to_string());
            }
            let snapshot = learning.clone();
            // Invalidate under the write lock so no reader can cache a set
            // computed before this observation.
            self.caches.invalidate_org_learnings(org_id);
            snapshot
        };

        debug!(
            org_id,
            occurrences = snapshot.occurrences,
            confidence = snapshot.confidence,
            "Recorded learning"
        );
        Ok(snapshot)
    }

    /// Returns the org's promoted learnings, most observed first.
    #[must_use]
    pub fn promoted_learnings(&self, org_id: &str) -> Arc<Vec<OrgLearning>> {
        let cache_key = org_id.to_string();
        if let Some(cached) = self.caches.learnings().get(&cache_key) {
            return cached;
        }

        // The read guard is held until the entry is cached, so a concurrent
        // `record_learning` invalidates after the store, never before it.
        let orgs = self.orgs.read().unwrap_or_else(PoisonError::into_inner);
        let mut promoted: Vec<OrgLearning> = orgs
            .get(org_id)
            .map(|learnings| {
                learnings
                    .values()
                    .map(|a| &a.learning)
                    .filter(|l| {
                        l.occurrences >= self.settings.promotion_occurrences
                            && l.confidence >= self.settings.promotion_confidence
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        promoted.sort_by(|a, b| {
            b.occurrences
                .cmp(&a.occurrences)
                .then_with(|| b.confidence.total_cmp(&a.confidence))
                .then_with(|| a.first_seen.cmp(&b.first_seen))
        });

        let promoted = Arc::new(promoted);
        self.caches
            .learnings()
            .set(cache_key, Arc::clone(&promoted));
        drop(orgs);
        promoted
    }
}

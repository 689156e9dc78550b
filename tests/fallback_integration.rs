//! Integration tests for the fallback chain.
//!
//! Verifies escalation order (recency scan, exhaustive scan,
//! clarification), permission filtering during scans and behavior when the
//! catalog is unavailable.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashSet;
use std::sync::Arc;
use teamrecall::config::FallbackSettings;
use teamrecall::models::{HitOrigin, Record, RecordId, RecordType};
use teamrecall::services::{FallbackChain, FallbackStrategy};
use teamrecall::storage::InMemoryStore;
use teamrecall::ManualClock;

const HOUR: u64 = 3_600_000;
const NOW: u64 = 5_000 * HOUR;

fn record(id: &str, source: &str, hours_ago: u64, summary: &str) -> Record {
    Record {
        id: RecordId::new(id),
        source: source.to_string(),
        record_type: RecordType::Conversation,
        timestamp: NOW - hours_ago * HOUR,
        author: "alice".to_string(),
        summary: summary.to_string(),
        detail: String::new(),
        files: Vec::new(),
        embedding: None,
        owner_id: "alice".to_string(),
        project_id: None,
        repo_id: None,
        org_id: None,
    }
}

fn store() -> Arc<InMemoryStore> {
    let store = InMemoryStore::new();
    for record in [
        record("r1", "session-new", 1, "tuning grafana dashboards"),
        record("r2", "session-mid", 30, "webhook retries backoff"),
        record("r3", "session-old", 300, "invoice export csv format"),
    ] {
        store.insert(record).unwrap();
    }
    Arc::new(store)
}

fn chain(store: &Arc<InMemoryStore>, settings: FallbackSettings) -> FallbackChain {
    FallbackChain::with_clock(store.clone(), settings, Arc::new(ManualClock::new(NOW)))
}

#[test]
fn test_recency_scan_answers_first() {
    let store = store();
    let outcome = chain(&store, FallbackSettings::default()).execute("webhook retries", None);

    assert_eq!(outcome.strategy, FallbackStrategy::RecencyScan);
    assert_eq!(outcome.attempted, vec![FallbackStrategy::RecencyScan]);
    assert_eq!(outcome.hits.len(), 1);
    let hit = outcome.hits.first().unwrap();
    assert_eq!(hit.metadata.source, "session-mid");
    assert_eq!(hit.origin, HitOrigin::Scan);
    assert!(outcome.clarification.is_none());
}

#[test]
fn test_temporal_question_ranks_newest_first() {
    let store = store();
    let outcome =
        chain(&store, FallbackSettings::default()).execute("what was I working on recently", None);

    assert_eq!(outcome.strategy, FallbackStrategy::RecencyScan);
    let sources: Vec<&str> = outcome.hits.iter().map(|h| h.metadata.source.as_str()).collect();
    assert_eq!(sources.first(), Some(&"session-new"));
    assert_eq!(sources.len(), 3);
}

#[test]
fn test_escalates_to_exhaustive_scan() {
    let store = store();
    let settings = FallbackSettings {
        recency_max_sources: 1,
        ..FallbackSettings::default()
    };
    let outcome = chain(&store, settings).execute("invoice export", None);

    assert_eq!(outcome.strategy, FallbackStrategy::ExhaustiveScan);
    assert_eq!(
        outcome.attempted,
        vec![FallbackStrategy::RecencyScan, FallbackStrategy::ExhaustiveScan]
    );
    assert_eq!(outcome.hits.first().unwrap().metadata.source, "session-old");
    assert!(!outcome.timed_out);
}

#[test]
fn test_ends_in_clarification_when_nothing_matches() {
    let store = store();
    let outcome = chain(&store, FallbackSettings::default()).execute("kubernetes autoscaler", None);

    assert_eq!(outcome.strategy, FallbackStrategy::Clarification);
    assert_eq!(
        outcome.attempted,
        vec![
            FallbackStrategy::RecencyScan,
            FallbackStrategy::ExhaustiveScan,
            FallbackStrategy::Clarification
        ]
    );
    let clarification = outcome.clarification.unwrap();
    assert_eq!(
        clarification.suggestions,
        vec!["session-new", "session-mid", "session-old"]
    );
}

#[test]
fn test_disabled_exhaustive_scan_is_skipped() {
    let store = store();
    let settings = FallbackSettings {
        recency_max_sources: 1,
        exhaustive_enabled: false,
        ..FallbackSettings::default()
    };
    let outcome = chain(&store, settings).execute("invoice export", None);

    assert_eq!(outcome.strategy, FallbackStrategy::Clarification);
    assert!(!outcome.attempted.contains(&FallbackStrategy::ExhaustiveScan));
}

#[test]
fn test_vague_query_goes_straight_to_clarification() {
    let store = store();
    let outcome = chain(&store, FallbackSettings::default()).execute("the stuff", None);

    assert_eq!(outcome.attempted, vec![FallbackStrategy::Clarification]);
    assert!(outcome.hits.is_empty());
}

#[test]
fn test_scans_respect_permitted_ids() {
    let store = store();
    let permitted: HashSet<RecordId> = std::iter::once(RecordId::new("r1")).collect();
    let chain = chain(&store, FallbackSettings::default());

    let outcome = chain.execute("invoice export", Some(&permitted));
    assert!(outcome.hits.is_empty());
    assert_eq!(outcome.strategy, FallbackStrategy::Clarification);
    assert_eq!(
        outcome.clarification.unwrap().suggestions,
        vec!["session-new"]
    );
}

#[test]
fn test_catalog_outage_still_clarifies() {
    let store = store();
    store.set_catalog_failure(true);
    let outcome = chain(&store, FallbackSettings::default()).execute("invoice export", None);

    assert_eq!(outcome.strategy, FallbackStrategy::Clarification);
    assert!(outcome.clarification.unwrap().suggestions.is_empty());
}

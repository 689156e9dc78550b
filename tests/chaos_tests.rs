//! Chaos testing for concurrent access.
//!
//! Tests concurrent operations to find race conditions and deadlocks:
//! - Concurrent rate limit checks against one key
//! - Concurrent cache reads, writes and invalidation
//! - Concurrent team queries across users
//! - Concurrent learning aggregation

// Chaos tests use expect/unwrap/panic for simplicity - panics are acceptable in tests
// Excessive nesting is acceptable in concurrent test code with thread spawns
// Needless collect is sometimes needed for clearer concurrent test structure
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::panic,
    clippy::excessive_nesting,
    clippy::needless_collect
)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use teamrecall::config::{RateLimitSettings, TeamRecallConfig};
use teamrecall::models::{Record, RecordId, RecordType};
use teamrecall::security::RateLimitRule;
use teamrecall::services::TeamQueryService;
use teamrecall::storage::InMemoryStore;
use teamrecall::{ManualClock, RateLimiter, Scope, TtlCache, UserContext};

const THREADS: usize = 8;

fn shared_record(id: usize) -> Record {
    Record {
        id: RecordId::new(format!("rec-{id}")),
        source: format!("session-{}", id % 4),
        record_type: RecordType::Conversation,
        timestamp: 1_000_000,
        author: format!("user-{}", id % THREADS),
        summary: format!("release checklist item {id}"),
        detail: "release checklist".to_string(),
        files: Vec::new(),
        embedding: None,
        owner_id: format!("user-{}", id % THREADS),
        project_id: None,
        repo_id: None,
        org_id: Some("acme".to_string()),
    }
}

/// Test: concurrent checks never admit more than the configured maximum.
#[test]
fn test_concurrent_rate_limit_admits_exact_budget() {
    let clock = Arc::new(ManualClock::new(1_000_000));
    let limiter = Arc::new(RateLimiter::with_clock(RateLimitSettings::default(), clock));
    let rule = RateLimitRule::new(100, 60_000);
    let admitted = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            let admitted = Arc::clone(&admitted);
            thread::spawn(move || {
                for _ in 0..50 {
                    if limiter.check("shared:team_query", rule).allowed {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    assert_eq!(admitted.load(Ordering::SeqCst), 100);
    assert!(!limiter.check("shared:team_query", rule).allowed);
}

/// Test: mixed cache reads, writes and invalidation do not deadlock.
#[test]
fn test_concurrent_cache_access_no_deadlock() {
    let clock = Arc::new(ManualClock::new(0));
    let cache: Arc<TtlCache<String, usize>> =
        Arc::new(TtlCache::new("chaos", 64, Duration::from_secs(60), clock));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..200 {
                    let key = format!("k-{}", (t * 7 + i) % 100);
                    match i % 4 {
                        0 => cache.set(key, i),
                        1 => {
                            let _ = cache.get(&key);
                        },
                        2 => {
                            let _ = cache.delete_where(|k| k.ends_with('3'));
                        },
                        _ => {
                            let _ = cache.purge_expired();
                        },
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    assert!(cache.size() <= 64);
}

/// Test: concurrent team queries from different users stay isolated.
#[test]
fn test_concurrent_team_queries() {
    let records: Vec<Record> = (0..40).map(shared_record).collect();
    let store = Arc::new(InMemoryStore::indexed(records).expect("index records"));
    let service = Arc::new(
        TeamQueryService::with_clock(
            store.clone(),
            store,
            &TeamRecallConfig::default(),
            Arc::new(ManualClock::new(2_000_000)),
        )
        .expect("build service"),
    );

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                let user = format!("user-{t}");
                let context = UserContext::new(user.clone()).with_org("acme");
                for i in 0..5 {
                    let scope = if i % 2 == 0 { Scope::Personal } else { Scope::Org };
                    let result = service
                        .query_team_memory("release checklist", &context, scope, 10, true)
                        .expect("query succeeds");
                    if scope == Scope::Personal {
                        assert_eq!(result.stats.permitted_records, 5);
                        assert!(
                            result
                                .citations
                                .iter()
                                .all(|c| c.author.as_deref() == Some(user.as_str()))
                        );
                    } else {
                        assert_eq!(result.stats.permitted_records, 40);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }
}

/// Test: concurrent contributions to one learning are all counted.
#[test]
fn test_concurrent_learning_aggregation() {
    let store = Arc::new(InMemoryStore::new());
    let service = Arc::new(
        TeamQueryService::with_clock(
            store.clone(),
            store,
            &TeamRecallConfig::default(),
            Arc::new(ManualClock::new(0)),
        )
        .expect("build service"),
    );

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                service
                    .learnings()
                    .record_learning("acme", &format!("user-{t}"), "Pin toolchain versions", 0.9)
                    .expect("record learning");
                let _ = service.learnings().promoted_learnings("acme");
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    let promoted = service.learnings().promoted_learnings("acme");
    assert_eq!(promoted.len(), 1);
    let learning = promoted.first().unwrap();
    assert_eq!(learning.occurrences, THREADS);
    assert_eq!(learning.contributors.len(), THREADS);
}

//! Property-based tests.
//!
//! Uses proptest to verify invariants across random inputs:
//! - Batch permission filtering equals per-record checks
//! - Rate limiter admits exactly the configured number per window
//! - RRF scores follow the closed form and fused output is ordered
//! - Expanded queries never expose operators outside quoted terms
//! - Cache entries never outlive their TTL

// Property tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use teamrecall::config::RateLimitSettings;
use teamrecall::models::{HitMetadata, HitOrigin, Record, RecordId, RecordType, SearchHit};
use teamrecall::security::{PermissionFilter, RateLimitRule, RateLimiter};
use teamrecall::services::{ExpansionLevel, RrfFusion, expand_query};
use teamrecall::{ManualClock, Scope, TtlCache, UserContext};

fn arb_scope() -> impl Strategy<Value = Scope> {
    prop::sample::select(Scope::all().to_vec())
}

fn arb_record() -> impl Strategy<Value = Record> {
    (
        "[a-z0-9]{4,8}",
        prop::sample::select(vec!["dana", "erin", "fred"]),
        proptest::option::of(prop::sample::select(vec!["atlas", "apollo"])),
        proptest::option::of(prop::sample::select(vec!["infra", "web"])),
        proptest::option::of(prop::sample::select(vec!["acme", "globex"])),
    )
        .prop_map(|(id, owner, project, repo, org)| Record {
            id: RecordId::new(id),
            source: "session".to_string(),
            record_type: RecordType::Conversation,
            timestamp: 0,
            author: owner.to_string(),
            summary: String::new(),
            detail: String::new(),
            files: Vec::new(),
            embedding: None,
            owner_id: owner.to_string(),
            project_id: project.map(ToString::to_string),
            repo_id: repo.map(ToString::to_string),
            org_id: org.map(ToString::to_string),
        })
}

fn arb_context() -> impl Strategy<Value = UserContext> {
    (
        prop::sample::select(vec!["dana", "erin", "zoe"]),
        proptest::option::of(prop::sample::select(vec!["acme", "globex"])),
        prop::sample::subsequence(vec!["atlas", "apollo"], 0..=2),
        prop::sample::subsequence(vec!["infra", "web"], 0..=2),
    )
        .prop_map(|(user, org, projects, repos)| {
            let mut context = UserContext::new(user);
            context.org_id = org.map(ToString::to_string);
            for project in projects {
                context = context.with_project(project);
            }
            for repo in repos {
                context = context.with_repo(repo);
            }
            context
        })
}

fn hit(id: &str) -> SearchHit {
    SearchHit {
        id: Some(RecordId::new(id)),
        content: id.to_string(),
        score: 1.0,
        origin: HitOrigin::Keyword,
        metadata: HitMetadata::default(),
    }
}

/// Returns the text of an index expression outside quoted terms.
fn unquoted(expression: &str) -> String {
    let mut out = String::new();
    let mut chars = expression.chars().peekable();
    let mut in_quote = false;
    while let Some(c) = chars.next() {
        if c == '"' {
            if in_quote && chars.peek() == Some(&'"') {
                chars.next();
                continue;
            }
            in_quote = !in_quote;
            continue;
        }
        if !in_quote {
            out.push(c);
        }
    }
    out
}

// ============================================================================
// Permissions
// ============================================================================

proptest! {
    /// Property: the batch filter agrees with single-record checks.
    #[test]
    fn prop_batch_filter_equals_single_checks(
        records in prop::collection::vec(arb_record(), 0..30),
        context in arb_context(),
        scope in arb_scope(),
    ) {
        let filter = PermissionFilter::new();
        let batch = filter.filter_by_permission(&records, &context, scope);
        let single: Vec<RecordId> = records
            .iter()
            .filter(|r| filter.check_access(r, &context, scope).allowed)
            .map(|r| r.id.clone())
            .collect();
        prop_assert_eq!(&batch.ids, &single);
        prop_assert_eq!(batch.ids.len() + batch.filtered_out, records.len());
        prop_assert_eq!(batch.by_scope.total(), batch.ids.len());
    }

    /// Property: widening the scope never hides a record.
    #[test]
    fn prop_wider_scope_is_superset(
        records in prop::collection::vec(arb_record(), 0..30),
        context in arb_context(),
    ) {
        let filter = PermissionFilter::new();
        let mut previous: HashSet<RecordId> = HashSet::new();
        for scope in Scope::all().iter().copied() {
            let current = filter.filter_by_permission(&records, &context, scope).id_set();
            prop_assert!(previous.is_subset(&current));
            previous = current;
        }
    }

    /// Property: a context without an organization never gets org grants.
    #[test]
    fn prop_org_grant_requires_org(records in prop::collection::vec(arb_record(), 0..30)) {
        let filter = PermissionFilter::new();
        let context = UserContext::new("zoe");
        let result = filter.filter_by_permission(&records, &context, Scope::Org);
        prop_assert_eq!(result.by_scope.org, 0);
    }
}

// ============================================================================
// Rate limiting
// ============================================================================

proptest! {
    /// Property: N requests are admitted, N+1 is rejected, and the next
    /// window admits again.
    #[test]
    fn prop_rate_limit_admission(max in 1usize..20, window_ms in 1u64..10_000) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let limiter = RateLimiter::with_clock(RateLimitSettings::default(), clock.clone());
        let rule = RateLimitRule::new(max, window_ms);

        for _ in 0..max {
            prop_assert!(limiter.check("user:op", rule).allowed);
        }
        let rejected = limiter.check("user:op", rule);
        prop_assert!(!rejected.allowed);
        prop_assert_eq!(rejected.remaining, 0);
        prop_assert!(rejected.reset_in_ms <= window_ms);

        clock.advance_ms(window_ms);
        prop_assert!(limiter.check("user:op", rule).allowed);
    }

    /// Property: keys never share a window.
    #[test]
    fn prop_rate_limit_keys_are_independent(max in 1usize..10) {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = RateLimiter::with_clock(RateLimitSettings::default(), clock);
        let rule = RateLimitRule::new(max, 60_000);
        for _ in 0..max {
            limiter.check("a", rule);
        }
        prop_assert!(!limiter.check("a", rule).allowed);
        prop_assert!(limiter.check("b", rule).allowed);
    }
}

// ============================================================================
// Fusion
// ============================================================================

proptest! {
    /// Property: a rank contributes exactly `1 / (k + rank + 1)`.
    #[test]
    fn prop_rrf_closed_form(k in 1.0f32..200.0, rank in 0usize..1000) {
        let fusion = RrfFusion::with_k(k);
        #[allow(clippy::cast_precision_loss)]
        let expected = 1.0 / (k + rank as f32 + 1.0);
        prop_assert!((fusion.rank_score(rank) - expected).abs() < 1e-6);
    }

    /// Property: fused output is sorted, unique and bounded by the limit.
    #[test]
    fn prop_fused_output_is_ordered(
        keyword in prop::collection::vec("[a-f]", 0..8),
        semantic in prop::collection::vec("[a-f]", 0..8),
        limit in 0usize..10,
    ) {
        let dedup = |ids: Vec<String>| {
            let mut seen = HashSet::new();
            ids.into_iter()
                .filter(|id| seen.insert(id.clone()))
                .map(|id| hit(&id))
                .collect::<Vec<_>>()
        };
        let keyword = dedup(keyword);
        let semantic = dedup(semantic);
        let fused = RrfFusion::new().fuse(&keyword, &semantic, limit);

        prop_assert!(fused.len() <= limit);
        let keys: HashSet<&str> = fused.iter().map(SearchHit::fusion_key).collect();
        prop_assert_eq!(keys.len(), fused.len());
        for pair in fused.windows(2) {
            prop_assert!(pair[0].score >= pair[1].score);
        }
        prop_assert!(fused.iter().all(|h| h.origin == HitOrigin::Fused));
    }

    /// Property: normalized relevance stays within `[0, 1]`.
    #[test]
    fn prop_normalized_relevance_bounded(score in -1.0f32..1.0) {
        let relevance = RrfFusion::new().normalized_relevance(score);
        prop_assert!((0.0..=1.0).contains(&relevance));
    }
}

// ============================================================================
// Query expansion
// ============================================================================

proptest! {
    /// Property: outside quoted terms an expression holds only grouping
    /// parentheses, spaces and `OR`.
    #[test]
    fn prop_expansion_never_leaks_operators(
        query in ".{0,80}",
        level in prop::sample::select(vec![
            ExpansionLevel::None,
            ExpansionLevel::Minimal,
            ExpansionLevel::Full,
        ]),
    ) {
        let expanded = expand_query(&query, level);
        let outside = unquoted(&expanded.expanded);
        let residue = outside.replace("OR", "");
        prop_assert!(
            residue.chars().all(|c| c == '(' || c == ')' || c == ' '),
            "unexpected text outside quotes: {:?}",
            outside
        );
    }

    /// Property: every original word survives expansion.
    #[test]
    fn prop_expansion_keeps_original_words(words in prop::collection::vec("[a-z]{2,8}", 1..6)) {
        let query = words.join(" ");
        let expanded = expand_query(&query, ExpansionLevel::Full);
        for word in &words {
            prop_assert!(expanded.terms.contains(word));
        }
    }
}

// ============================================================================
// Caching
// ============================================================================

proptest! {
    /// Property: an entry is live strictly before its TTL and gone at it.
    #[test]
    fn prop_cache_ttl(ttl_ms in 1u64..100_000, before in 0u64..100_000) {
        let clock = Arc::new(ManualClock::new(0));
        let cache: TtlCache<String, u32> =
            TtlCache::new("prop", 16, Duration::from_millis(ttl_ms), clock.clone());
        cache.set("k".to_string(), 7);

        let elapsed = before % ttl_ms;
        clock.set_ms(elapsed);
        prop_assert_eq!(cache.get(&"k".to_string()), Some(7));

        clock.set_ms(ttl_ms);
        prop_assert_eq!(cache.get(&"k".to_string()), None);
    }
}

#[test]
fn test_vcs_strategy_expansion_example() {
    let expanded = expand_query("vcs strategy", ExpansionLevel::Minimal);
    assert!(expanded.expanded.starts_with("(\"vcs\" OR "));
    assert!(expanded.expanded.ends_with(" \"strategy\""));
    assert!(expanded.terms.contains(&"version control system".to_string()));
    assert!(expanded.expansions_applied >= 1);
}

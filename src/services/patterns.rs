//! Static text patterns.
//!
//! Temporal cues, question intents and the references that become research
//! leads (change requests, commit hashes, file paths, ADR/RFC documents).
// Allow expect() on static regex patterns - these are guaranteed to compile
#![allow(clippy::expect_used)]

use regex::Regex;
use std::sync::LazyLock;

/// Phrases that ask about recent activity.
pub static TEMPORAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(recent(ly)?|lately|latest|yesterday|today|tonight|last\s+(week|month|sprint|night|few\s+days)|this\s+(week|month|morning|sprint)|past\s+(week|month|few\s+days)|working\s+on|been\s+doing)\b",
    )
    .expect("static regex: temporal")
});

/// Questions about who owns or knows something.
pub static EXPERTISE_INTENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(who\s+(owns|maintains|knows|wrote|built|reviews|is\s+responsible|works\s+on|worked\s+on)|expert|owner|maintainer|point\s+of\s+contact)\b",
    )
    .expect("static regex: expertise intent")
});

/// Questions about why a choice was made.
pub static DECISION_INTENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(why\s+(did|do|does|was|were|is|are)|decid(e|ed|ing)|decision|cho(ose|se|sen)|rationale|trade-?offs?|instead\s+of)\b",
    )
    .expect("static regex: decision intent")
});

/// Questions about change over time.
pub static HISTORY_INTENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(when|history|timeline|evolv(e|ed|ing)|over\s+time|used\s+to)\b")
        .expect("static regex: history intent")
});

/// Pull/merge request references: `#42`, `PR 42`, `MR !7`, `pull request 42`.
pub static CHANGE_REQUEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:\b(?:pr|mr|pull\s+request|merge\s+request)\s*[#!]?\s*|#)(\d{1,7})\b")
        .expect("static regex: change request")
});

/// Hash-like tokens. Callers require a digit and a letter.
pub static COMMIT_HASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[0-9a-f]{7,40}\b").expect("static regex: commit hash"));

/// Source file paths with a known extension.
pub static FILE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b((?:[\w.-]+/)*[\w-]+\.(?:rs|ts|tsx|js|jsx|py|go|java|kt|rb|swift|c|h|cc|cpp|hpp|cs|toml|yaml|yml|json|md|sql|sh|proto|tf))\b",
    )
    .expect("static regex: file path")
});

/// Design document references: `ADR-12`, `RFC 7`.
pub static CROSS_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(adr|rfc)[-\s]?(\d{1,5})\b").expect("static regex: cross reference")
});

/// Returns true if `token` looks like a commit hash rather than a word or number.
#[must_use]
pub fn is_hash_like(token: &str) -> bool {
    token.len() >= 7
        && token.chars().any(|c| c.is_ascii_digit())
        && token.chars().any(|c| c.is_ascii_alphabetic())
}

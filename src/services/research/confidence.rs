//! Confidence assessment over accumulated evidence.

use crate::models::{ConfidenceAssessment, ConfidenceLevel, Evidence};
use std::collections::HashMap;

/// Assesses all evidence gathered so far.
///
/// Evidence is strong when its confidence is at least `strong_threshold`.
///
/// | Level | Rule |
/// |-------|------|
/// | High | two strong items and two distinct authors, or three strong items from one author |
/// | Medium | at least one strong item, or at least two items in total |
/// | Low | anything else (not confident) |
#[must_use]
pub fn assess_confidence(evidence: &[Evidence], strong_threshold: f32) -> ConfidenceAssessment {
    // Authors are counted over all evidence; unattributed items add strength only.
    let mut strong_by_author: HashMap<String, usize> = HashMap::new();
    let mut strong = 0;
    for item in evidence {
        let is_strong = item.confidence >= strong_threshold;
        strong += usize::from(is_strong);
        let author = item.author().trim().to_lowercase();
        if author.is_empty() {
            continue;
        }
        *strong_by_author.entry(author).or_default() += usize::from(is_strong);
    }
    let authors = strong_by_author.len();
    let top_author = strong_by_author.values().copied().max().unwrap_or(0);

    if strong >= 2 && authors >= 2 {
        return assessment(
            ConfidenceLevel::High,
            format!("{strong} strong of {} items from {authors} authors", evidence.len()),
        );
    }
    if top_author >= 3 {
        return assessment(
            ConfidenceLevel::High,
            format!("{top_author} strong items from one author"),
        );
    }
    if strong >= 1 || evidence.len() >= 2 {
        return assessment(
            ConfidenceLevel::Medium,
            format!("{strong} strong of {} items", evidence.len()),
        );
    }

    ConfidenceAssessment {
        confident: false,
        level: ConfidenceLevel::Low,
        reason: if evidence.is_empty() {
            "no evidence".to_string()
        } else {
            "a single weak item".to_string()
        },
    }
}

const fn assessment(level: ConfidenceLevel, reason: String) -> ConfidenceAssessment {
    ConfidenceAssessment {
        confident: true,
        level,
        reason,
    }
}

//! Answer synthesis.
//!
//! [`EvidenceSynthesizer`] assembles an answer directly from the evidence,
//! with a distinct assembly rule per question intent:
//!
//! | Intent | Rule |
//! |--------|------|
//! | Expertise | rank authors by evidence count |
//! | Temporal | newest evidence first, flag approaches that evolved |
//! | Decision | prefer decision, review and document records |
//! | General | rank by confidence |
//!
//! Citations are deduplicated by source, contradictions between members of
//! a technology family become caveats, and a low-confidence answer always
//! carries at least one caveat.

use crate::models::{
    Citation, ConfidenceAssessment, ConfidenceLevel, Evidence, SynthesizedAnswer,
};
use crate::services::patterns::{
    DECISION_INTENT, EXPERTISE_INTENT, HISTORY_INTENT, TEMPORAL,
};
use chrono::DateTime;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

/// Maximum citations attached to an answer.
pub const MAX_CITATIONS: usize = 10;

/// Supporting lines quoted in an answer body.
const SUPPORTING_LINES: usize = 3;

const MS_PER_DAY: u64 = 86_400_000;

/// Caveat attached to every low-confidence answer without a more specific one.
pub const LOW_CONFIDENCE_CAVEAT: &str = "Evidence is limited; treat this answer as a starting \
    point and verify with the people involved.";

/// Interchangeable technologies. Each member lists its aliases.
const TECHNOLOGY_FAMILIES: &[(&str, &[&[&str]])] = &[
    (
        "database",
        &[
            &["postgres", "postgresql"],
            &["mysql", "mariadb"],
            &["sqlite"],
            &["mongodb", "mongo"],
            &["dynamodb"],
            &["cassandra"],
        ],
    ),
    (
        "message queue",
        &[&["kafka"], &["rabbitmq"], &["sqs"], &["nats"], &["pulsar"]],
    ),
    ("cache", &[&["redis"], &["memcached"]]),
    (
        "frontend framework",
        &[&["react"], &["vue"], &["angular"], &["svelte"]],
    ),
    (
        "cloud provider",
        &[&["aws"], &["gcp", "google cloud"], &["azure"]],
    ),
    (
        "ci system",
        &[
            &["jenkins"],
            &["circleci"],
            &["github actions"],
            &["gitlab ci"],
        ],
    ),
];

/// What a question is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuestionIntent {
    /// Who owns or knows something.
    Expertise,
    /// What happened, and when.
    Temporal,
    /// Why a choice was made.
    Decision,
    /// Anything else.
    General,
}

impl QuestionIntent {
    /// Classifies a question by keyword patterns.
    #[must_use]
    pub fn classify(question: &str) -> Self {
        if EXPERTISE_INTENT.is_match(question) {
            Self::Expertise
        } else if DECISION_INTENT.is_match(question) {
            Self::Decision
        } else if TEMPORAL.is_match(question) || HISTORY_INTENT.is_match(question) {
            Self::Temporal
        } else {
            Self::General
        }
    }

    /// Returns the intent as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Expertise => "expertise",
            Self::Temporal => "temporal",
            Self::Decision => "decision",
            Self::General => "general",
        }
    }
}

impl fmt::Display for QuestionIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Turns evidence into an answer.
pub trait AnswerSynthesizer: Send + Sync {
    /// Synthesizes an answer to `question`.
    fn synthesize(
        &self,
        question: &str,
        evidence: &[Evidence],
        assessment: &ConfidenceAssessment,
    ) -> SynthesizedAnswer;
}

/// Rule-based synthesizer that quotes the evidence it was given.
#[derive(Debug, Clone)]
pub struct EvidenceSynthesizer {
    evolution_window_ms: u64,
}

impl Default for EvidenceSynthesizer {
    fn default() -> Self {
        Self::new(30)
    }
}

impl EvidenceSynthesizer {
    /// Creates a synthesizer that flags evolved approaches older than
    /// `evolution_window_days`.
    #[must_use]
    pub const fn new(evolution_window_days: u64) -> Self {
        Self {
            evolution_window_ms: evolution_window_days.saturating_mul(MS_PER_DAY),
        }
    }

    fn expertise(evidence: &[Evidence]) -> (String, Vec<&Evidence>) {
        let mut counts: HashMap<&str, (usize, f32)> = HashMap::new();
        for item in evidence {
            let author = item.author().trim();
            if author.is_empty() {
                continue;
            }
            let entry = counts.entry(author).or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 = entry.1.max(item.confidence);
        }
        let mut ranked: Vec<(&str, usize, f32)> =
            counts.into_iter().map(|(a, (n, c))| (a, n, c)).collect();
        ranked.sort_by(|a, b| {
            b.1.cmp(&a.1)
                .then_with(|| b.2.total_cmp(&a.2))
                .then_with(|| a.0.cmp(b.0))
        });

        let answer = match ranked.as_slice() {
            [] => "No author could be identified from the records found.".to_string(),
            [(top, n, _)] => format!("{top} appears to be the main contact ({n} {}).", records(*n)),
            [(top, n, _), rest @ ..] => {
                let others = rest
                    .iter()
                    .take(2)
                    .map(|(a, n, _)| format!("{a} ({n})"))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "{top} appears to be the main contact ({n} {}), followed by {others}.",
                    records(*n)
                )
            },
        };

        let rank: HashMap<&str, usize> = ranked
            .iter()
            .enumerate()
            .map(|(i, (a, _, _))| (*a, i))
            .collect();
        let mut ordered: Vec<&Evidence> = evidence.iter().collect();
        ordered.sort_by(|a, b| {
            let ra = rank.get(a.author().trim()).copied().unwrap_or(usize::MAX);
            let rb = rank.get(b.author().trim()).copied().unwrap_or(usize::MAX);
            ra.cmp(&rb).then_with(|| b.confidence.total_cmp(&a.confidence))
        });
        (answer, ordered)
    }

    fn temporal(evidence: &[Evidence]) -> (String, Vec<&Evidence>) {
        let mut ordered: Vec<&Evidence> = evidence.iter().collect();
        ordered.sort_by(|a, b| {
            timestamp(b)
                .cmp(&timestamp(a))
                .then_with(|| b.confidence.total_cmp(&a.confidence))
        });
        let answer = ordered.first().map_or_else(String::new, |newest| {
            match newest.citation.timestamp.and_then(format_date) {
                Some(date) => format!("Most recently ({date}): {}", newest.claim),
                None => format!("Most recently: {}", newest.claim),
            }
        });
        (answer, ordered)
    }

    fn decision(evidence: &[Evidence]) -> (String, Vec<&Evidence>) {
        let mut ordered: Vec<&Evidence> = evidence.iter().collect();
        ordered.sort_by(|a, b| {
            rationale(b)
                .cmp(&rationale(a))
                .then_with(|| b.confidence.total_cmp(&a.confidence))
        });
        let answer = ordered.first().map_or_else(String::new, |top| {
            if rationale(top) {
                format!("The reasoning is recorded in {}: {}", top.citation.source, top.claim)
            } else {
                format!(
                    "No explicit decision record was found. The closest context is {}: {}",
                    top.citation.source, top.claim
                )
            }
        });
        (answer, ordered)
    }

    fn general(evidence: &[Evidence]) -> (String, Vec<&Evidence>) {
        let mut ordered: Vec<&Evidence> = evidence.iter().collect();
        ordered.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        let answer = ordered
            .first()
            .map_or_else(String::new, |top| top.claim.clone());
        (answer, ordered)
    }

    fn evolution_caveat(&self, evidence: &[Evidence]) -> Option<String> {
        let dated: Vec<(&Evidence, u64)> = evidence
            .iter()
            .filter_map(|e| e.citation.timestamp.map(|ts| (e, ts)))
            .collect();
        let (oldest, oldest_ts) = dated.iter().min_by_key(|(_, ts)| *ts).copied()?;
        let (newest, newest_ts) = dated.iter().max_by_key(|(_, ts)| *ts).copied()?;
        if newest_ts.saturating_sub(oldest_ts) <= self.evolution_window_ms
            || normalize(&oldest.claim) == normalize(&newest.claim)
        {
            return None;
        }
        Some(format!(
            "The approach evolved over time: earlier records ({}) say \"{}\", \
             while later ones ({}) say \"{}\".",
            format_date(oldest_ts).unwrap_or_default(),
            oldest.claim,
            format_date(newest_ts).unwrap_or_default(),
            newest.claim
        ))
    }
}

impl AnswerSynthesizer for EvidenceSynthesizer {
    fn synthesize(
        &self,
        question: &str,
        evidence: &[Evidence],
        assessment: &ConfidenceAssessment,
    ) -> SynthesizedAnswer {
        if evidence.is_empty() {
            return SynthesizedAnswer {
                answer: "I couldn't find any records that answer this question.".to_string(),
                confidence: ConfidenceLevel::Low,
                citations: Vec::new(),
                caveats: vec![
                    "No supporting records were found; the answer may be incomplete.".to_string(),
                ],
            };
        }

        let intent = QuestionIntent::classify(question);
        let (lead, ordered) = match intent {
            QuestionIntent::Expertise => Self::expertise(evidence),
            QuestionIntent::Temporal => Self::temporal(evidence),
            QuestionIntent::Decision => Self::decision(evidence),
            QuestionIntent::General => Self::general(evidence),
        };

        let mut caveats = Vec::new();
        if intent == QuestionIntent::Temporal {
            caveats.extend(self.evolution_caveat(evidence));
        }
        caveats.extend(contradiction_caveats(evidence));
        let level = if assessment.confident {
            assessment.level
        } else {
            ConfidenceLevel::Low
        };
        if level == ConfidenceLevel::Low && caveats.is_empty() {
            caveats.push(LOW_CONFIDENCE_CAVEAT.to_string());
        }

        let mut answer = lead;
        let supporting: Vec<String> = ordered
            .iter()
            .skip(1)
            .take(SUPPORTING_LINES)
            .map(|e| format!("- {} ({})", e.claim, e.citation.source))
            .collect();
        if !supporting.is_empty() {
            answer.push_str("\n\nSupporting records:\n");
            answer.push_str(&supporting.join("\n"));
        }

        SynthesizedAnswer {
            answer,
            confidence: level,
            citations: dedup_citations(ordered.iter().map(|e| &e.citation)),
            caveats,
        }
    }
}

/// Keeps the first citation per source, up to [`MAX_CITATIONS`].
#[must_use]
pub fn dedup_citations<'a>(citations: impl IntoIterator<Item = &'a Citation>) -> Vec<Citation> {
    let mut seen = HashSet::new();
    citations
        .into_iter()
        .filter(|c| seen.insert(c.source.as_str()))
        .take(MAX_CITATIONS)
        .cloned()
        .collect()
}

/// Returns one caveat per technology family whose members appear in
/// different evidence items.
#[must_use]
pub fn contradiction_caveats(evidence: &[Evidence]) -> Vec<String> {
    let phrases: Vec<String> = evidence.iter().map(|e| phrase_text(&e.claim)).collect();
    let mut caveats = Vec::new();
    for (family, members) in TECHNOLOGY_FAMILIES {
        let mut mentioned: BTreeSet<&str> = BTreeSet::new();
        let mut items = 0;
        for text in &phrases {
            let found: Vec<&str> = members
                .iter()
                .filter(|aliases| aliases.iter().any(|a| contains_phrase(text, a)))
                .filter_map(|aliases| aliases.first().copied())
                .collect();
            if !found.is_empty() {
                items += 1;
                mentioned.extend(found);
            }
        }
        if mentioned.len() >= 2 && items >= 2 {
            caveats.push(format!(
                "Records mention different {family} choices ({}); \
                 they may reflect different periods or teams.",
                mentioned.into_iter().collect::<Vec<_>>().join(", ")
            ));
        }
    }
    caveats
}

fn phrase_text(text: &str) -> String {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    format!(" {} ", words.join(" "))
}

fn contains_phrase(text: &str, phrase: &str) -> bool {
    text.contains(&format!(" {phrase} "))
}

fn normalize(claim: &str) -> String {
    phrase_text(claim).trim().to_string()
}

fn timestamp(evidence: &Evidence) -> u64 {
    evidence.citation.timestamp.unwrap_or(0)
}

fn rationale(evidence: &Evidence) -> bool {
    evidence
        .record_type
        .is_some_and(|t| t.carries_rationale())
}

const fn records(n: usize) -> &'static str {
    if n == 1 { "record" } else { "records" }
}

fn format_date(timestamp_ms: u64) -> Option<String> {
    let millis = i64::try_from(timestamp_ms).ok()?;
    DateTime::from_timestamp_millis(millis).map(|d| d.format("%Y-%m-%d").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordType;
    use test_case::test_case;

    const DAY: u64 = MS_PER_DAY;

    fn evidence(source: &str, author: &str, claim: &str, ts: u64, kind: RecordType) -> Evidence {
        Evidence {
            citation: Citation {
                source: source.to_string(),
                excerpt: claim.to_string(),
                relevance: 0.9,
                timestamp: Some(ts),
                author: Some(author.to_string()),
                record_id: None,
                browse_url: None,
            },
            claim: claim.to_string(),
            confidence: 0.9,
            record_type: Some(kind),
            files: Vec::new(),
        }
    }

    fn confident(level: ConfidenceLevel) -> ConfidenceAssessment {
        ConfidenceAssessment {
            confident: level != ConfidenceLevel::Low,
            level,
            reason: String::new(),
        }
    }

    #[test_case("Who owns the billing service?", QuestionIntent::Expertise)]
    #[test_case("Why did we choose Postgres?", QuestionIntent::Decision)]
    #[test_case("What changed in auth recently?", QuestionIntent::Temporal)]
    #[test_case("How does the retry queue work?", QuestionIntent::General)]
    fn test_classify(question: &str, expected: QuestionIntent) {
        assert_eq!(QuestionIntent::classify(question), expected);
    }

    #[test]
    fn test_expertise_ranks_authors() {
        let evidence = vec![
            evidence("a", "bob", "tuned billing retries", DAY, RecordType::Commit),
            evidence("b", "alice", "billing schema", DAY, RecordType::Commit),
            evidence("c", "alice", "billing exports", DAY, RecordType::Commit),
        ];
        let answer = EvidenceSynthesizer::default().synthesize(
            "who owns billing?",
            &evidence,
            &confident(ConfidenceLevel::High),
        );
        let expected = "alice appears to be the main contact (2 records), followed by bob (1)";
        assert!(answer.answer.starts_with(expected));
        assert_eq!(answer.citations.first().map(|c| c.source.as_str()), Some("b"));
    }

    #[test]
    fn test_temporal_evolution_caveat() {
        let evidence = vec![
            evidence("a", "alice", "deploys run from jenkins", 10 * DAY, RecordType::Commit),
            evidence("b", "bob", "deploys moved to github actions", 100 * DAY, RecordType::Commit),
        ];
        let answer = EvidenceSynthesizer::default().synthesize(
            "how have deploys evolved?",
            &evidence,
            &confident(ConfidenceLevel::High),
        );
        assert!(
            answer
                .answer
                .starts_with("Most recently (1970-04-11): deploys moved to github actions")
        );
        assert!(answer.caveats.iter().any(|c| c.starts_with("The approach evolved")));
        assert!(answer.caveats.iter().any(|c| c.contains("ci system")));
    }

    #[test]
    fn test_no_evolution_caveat_within_window() {
        let evidence = vec![
            evidence("a", "alice", "use feature flags", 10 * DAY, RecordType::Commit),
            evidence("b", "bob", "remove feature flags", 20 * DAY, RecordType::Commit),
        ];
        let answer = EvidenceSynthesizer::default().synthesize(
            "what happened with feature flags recently?",
            &evidence,
            &confident(ConfidenceLevel::Medium),
        );
        assert!(answer.caveats.is_empty());
    }

    #[test]
    fn test_decision_prefers_rationale_records() {
        let evidence = vec![
            evidence("commit-1", "alice", "add postgres driver", DAY, RecordType::Commit),
            evidence(
                "adr-3",
                "bob",
                "postgres for transactional guarantees",
                DAY,
                RecordType::Document,
            ),
        ];
        let answer = EvidenceSynthesizer::default().synthesize(
            "why did we choose postgres?",
            &evidence,
            &confident(ConfidenceLevel::High),
        );
        assert!(answer.answer.starts_with("The reasoning is recorded in adr-3"));
    }

    #[test]
    fn test_contradictions_need_two_items() {
        let single = vec![evidence(
            "a",
            "alice",
            "migrated from mysql to postgresql",
            DAY,
            RecordType::Commit,
        )];
        assert!(contradiction_caveats(&single).is_empty());

        let pair = vec![
            evidence("a", "alice", "orders live in postgres", DAY, RecordType::Commit),
            evidence("b", "bob", "orders table in MySQL", DAY, RecordType::Commit),
        ];
        let caveats = contradiction_caveats(&pair);
        assert_eq!(caveats.len(), 1);
        assert!(caveats.first().is_some_and(|c| c.contains("mysql, postgres")));
    }

    #[test]
    fn test_low_confidence_always_has_caveat() {
        let evidence = vec![evidence("a", "alice", "something", DAY, RecordType::Other)];
        let answer = EvidenceSynthesizer::default().synthesize(
            "what about the thing?",
            &evidence,
            &confident(ConfidenceLevel::Low),
        );
        assert_eq!(answer.confidence, ConfidenceLevel::Low);
        assert_eq!(answer.caveats, vec![LOW_CONFIDENCE_CAVEAT.to_string()]);

        let empty = EvidenceSynthesizer::default().synthesize(
            "anything?",
            &[],
            &confident(ConfidenceLevel::Low),
        );
        assert!(!empty.caveats.is_empty());
    }

    #[test]
    fn test_citations_deduplicated_by_source() {
        let evidence = vec![
            evidence("repo", "alice", "one", DAY, RecordType::Commit),
            evidence("repo", "bob", "two", DAY, RecordType::Commit),
            evidence("docs", "carol", "three", DAY, RecordType::Document),
        ];
        let answer = EvidenceSynthesizer::default().synthesize(
            "how does it work",
            &evidence,
            &confident(ConfidenceLevel::High),
        );
        assert_eq!(answer.citations.len(), 2);
    }
}

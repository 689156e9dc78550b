//! Lead queue and lead extraction.

use crate::models::{Evidence, Lead, LeadKind};
use crate::services::patterns::{
    CHANGE_REQUEST, COMMIT_HASH, CROSS_REFERENCE, FILE_PATH, is_hash_like,
};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

/// Base priority of a commit lead.
pub const COMMIT_PRIORITY: f32 = 0.8;
/// Base priority of a change request lead.
pub const CHANGE_REQUEST_PRIORITY: f32 = 0.7;
/// Base priority of a cross reference lead.
pub const CROSS_REFERENCE_PRIORITY: f32 = 0.6;
/// Base priority of a file lead.
pub const FILE_PRIORITY: f32 = 0.5;
/// Base priority of an author lead.
pub const AUTHOR_PRIORITY: f32 = 0.4;

/// Returns the base priority of a lead kind.
#[must_use]
pub const fn base_priority(kind: &LeadKind) -> f32 {
    match kind {
        LeadKind::Initial { .. } => 1.0,
        LeadKind::Commit { .. } => COMMIT_PRIORITY,
        LeadKind::ChangeRequest { .. } => CHANGE_REQUEST_PRIORITY,
        LeadKind::CrossReference { .. } => CROSS_REFERENCE_PRIORITY,
        LeadKind::File { .. } => FILE_PRIORITY,
        LeadKind::Author { .. } => AUTHOR_PRIORITY,
    }
}

struct QueuedLead {
    lead: Lead,
    sequence: u64,
}

impl PartialEq for QueuedLead {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedLead {}

impl PartialOrd for QueuedLead {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedLead {
    // Max-heap: higher priority first, then earlier insertion.
    fn cmp(&self, other: &Self) -> Ordering {
        self.lead
            .priority
            .total_cmp(&other.lead.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Priority queue of leads with FIFO tie-breaking.
///
/// A lead id is accepted at most once per session: leads that are already
/// queued or explored are ignored.
#[derive(Default)]
pub struct LeadQueue {
    heap: BinaryHeap<QueuedLead>,
    seen: HashSet<String>,
    explored: HashSet<String>,
    sequence: u64,
}

impl LeadQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a lead. Returns false if its id was seen before.
    pub fn push(&mut self, lead: Lead) -> bool {
        if !self.seen.insert(lead.id.clone()) {
            return false;
        }
        self.sequence += 1;
        self.heap.push(QueuedLead {
            lead,
            sequence: self.sequence,
        });
        true
    }

    /// Pops the highest-priority lead and marks it explored.
    pub fn pop(&mut self) -> Option<Lead> {
        let queued = self.heap.pop()?;
        self.explored.insert(queued.lead.id.clone());
        Some(queued.lead)
    }

    /// Returns true if the lead id has been popped.
    #[must_use]
    pub fn is_explored(&self, id: &str) -> bool {
        self.explored.contains(id)
    }

    /// Returns the number of explored leads.
    #[must_use]
    pub fn explored_count(&self) -> usize {
        self.explored.len()
    }

    /// Returns the number of queued leads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// Extracts follow-up leads from a piece of evidence.
///
/// Each lead gets `base_priority(kind) * parent_priority`.
#[must_use]
pub fn extract_leads(evidence: &Evidence, parent_priority: f32) -> Vec<Lead> {
    let mut kinds = reference_kinds(&evidence.claim);
    if evidence.citation.excerpt != evidence.claim {
        kinds.extend(reference_kinds(&evidence.citation.excerpt));
    }
    kinds.extend(evidence.files.iter().map(|path| LeadKind::File {
        path: path.clone(),
    }));
    let author = evidence.author().trim();
    if !author.is_empty() {
        kinds.push(LeadKind::Author {
            name: author.to_string(),
        });
    }
    into_leads(kinds, parent_priority)
}

/// Extracts leads referenced directly in a question.
#[must_use]
pub fn extract_question_leads(question: &str) -> Vec<Lead> {
    into_leads(reference_kinds(question), 1.0)
}

fn into_leads(kinds: Vec<LeadKind>, parent_priority: f32) -> Vec<Lead> {
    let mut seen = HashSet::new();
    kinds
        .into_iter()
        .filter(|kind| seen.insert(kind.dedup_key()))
        .map(|kind| {
            let priority = base_priority(&kind) * parent_priority;
            Lead::new(kind, priority)
        })
        .collect()
}

/// Finds commit, change request, cross reference and file references.
fn reference_kinds(text: &str) -> Vec<LeadKind> {
    let mut kinds = Vec::new();

    let lower = text.to_lowercase();
    kinds.extend(
        COMMIT_HASH
            .find_iter(&lower)
            .map(|m| m.as_str())
            .filter(|token| is_hash_like(token))
            .map(|sha| LeadKind::Commit {
                sha: sha.to_string(),
            }),
    );

    kinds.extend(
        CHANGE_REQUEST
            .captures_iter(text)
            .filter_map(|c| c.get(1)?.as_str().parse::<u64>().ok())
            .map(|number| LeadKind::ChangeRequest { number }),
    );

    kinds.extend(CROSS_REFERENCE.captures_iter(text).filter_map(|c| {
        let prefix = c.get(1)?.as_str().to_uppercase();
        let number = c.get(2)?.as_str();
        Some(LeadKind::CrossReference {
            reference: format!("{prefix}-{number}"),
        })
    }));

    kinds.extend(
        FILE_PATH
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| LeadKind::File {
                path: m.as_str().to_string(),
            }),
    );

    kinds
}

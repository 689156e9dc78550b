//! Data models for teamrecall.
//!
//! This module contains the typed entities that flow between components:
//! records from the storage collaborator, user contexts and scopes, search
//! hits, leads, evidence and the result shapes returned to callers.

mod context;
mod record;
mod research;
mod search;
mod team;

pub use context::{Scope, UserContext};
pub use record::{Record, RecordId, RecordType};
pub(crate) use record::references_path;
pub use research::{
    Citation, ClarificationRequest, ConfidenceAssessment, ConfidenceLevel, Evidence, Lead,
    LeadKind, ResearchResult, ResearchState, SynthesizedAnswer,
};
pub use search::{HitMetadata, HitOrigin, SearchHit, SourceSummary};
pub use team::{OrgLearning, QueryStats, ScopeCounts, TeamMemoryResult};

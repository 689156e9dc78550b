//! Business logic services.
//!
//! Services orchestrate the storage collaborators and provide the
//! high-level operations: hybrid retrieval, the fallback chain, the
//! research loop and the team query façade.

mod fallback;
mod hybrid_search;
mod keywords;
mod org_learnings;
mod patterns;
mod query_expansion;
pub mod research;
mod rrf_fusion;
mod team_query;

pub use fallback::{
    FallbackChain, FallbackOutcome, FallbackStrategy, clarification_request, is_temporal, is_vague,
};
pub use hybrid_search::HybridSearchService;
pub use keywords::{extract_keywords, is_stop_word, keyword_overlap, strip_stop_words};
pub use org_learnings::OrgLearningsService;
pub use query_expansion::{
    DEFAULT_MAX_TERMS_PER_WORD, ExpandedQuery, ExpansionLevel, ExpansionTables, QueryExpander,
    ensure_builtin_expansion, expand_query, validate_term,
};
pub use research::{
    AnswerSynthesizer, CancellationFlag, EvidenceSynthesizer, ResearchEngine,
    ResearchEngineBuilder, assess_confidence,
};
pub use rrf_fusion::{DEFAULT_RRF_K, RrfConfig, RrfFusion};
pub use team_query::{GET_RECORD_OPERATION, TEAM_QUERY_OPERATION, TeamQueryService};

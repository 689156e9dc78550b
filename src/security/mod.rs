//! Access control.
//!
//! Scope-based permission filtering and sliding-window rate limiting.

mod permissions;
mod rate_limit;

pub use permissions::{
    AccessDecision, OrgPredicate, PermissionFilter, PermissionFilterResult, PersonalPredicate,
    ProjectPredicate, ScopePredicate, TeamPredicate, ValidationOutcome, validate_results,
};
pub use rate_limit::{RateLimitResult, RateLimitRule, RateLimiter, rate_key};

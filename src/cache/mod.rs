//! Caching.
//!
//! A generic capacity-bounded [`TtlCache`] and the three team-query caches
//! built on it ([`TeamCaches`]).

mod hasher;
mod team;
mod ttl;

pub use hasher::ContentHasher;
pub use team::{PermittedKey, PermittedRecords, QueryKey, TeamCaches};
pub use ttl::TtlCache;

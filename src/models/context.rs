//! User context and visibility scopes.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Visibility tier, ordered from narrowest to widest.
///
/// A grant at one scope never implies another; each scope has its own
/// predicate in [`crate::security::PermissionFilter`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Records the user owns or authored.
    #[default]
    Personal,
    /// Records in projects the user can access.
    Project,
    /// Records in repositories shared with the user's team.
    Team,
    /// Records visible to the whole organization.
    Org,
}

impl Scope {
    /// Returns all scopes, narrowest first.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Personal, Self::Project, Self::Team, Self::Org]
    }

    /// Returns every scope up to and including `self`, narrowest first.
    #[must_use]
    pub fn up_to(self) -> impl Iterator<Item = Self> {
        Self::all().iter().copied().filter(move |s| *s <= self)
    }

    /// Returns the scope as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Personal => "personal",
            Self::Project => "project",
            Self::Team => "team",
            Self::Org => "org",
        }
    }

    /// Parses a scope string, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "personal" | "user" | "me" => Some(Self::Personal),
            "project" => Some(Self::Project),
            "team" | "repo" => Some(Self::Team),
            "org" | "organization" => Some(Self::Org),
            _ => None,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The identity and grants of the user issuing a request.
///
/// Supplied by the caller and immutable for the duration of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    /// User identifier.
    pub user_id: String,
    /// Organization the user belongs to.
    #[serde(default)]
    pub org_id: Option<String>,
    /// Primary email.
    #[serde(default)]
    pub email: Option<String>,
    /// Other names the user authors records under.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Projects the user may read.
    #[serde(default)]
    pub accessible_projects: HashSet<String>,
    /// Repositories the user may read.
    #[serde(default)]
    pub accessible_repos: HashSet<String>,
}

impl UserContext {
    /// Creates a context for a user with no grants.
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    /// Sets the organization.
    #[must_use]
    pub fn with_org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    /// Sets the primary email.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Adds an author alias.
    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Grants read access to a project.
    #[must_use]
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.accessible_projects.insert(project_id.into());
        self
    }

    /// Grants read access to a repository.
    #[must_use]
    pub fn with_repo(mut self, repo_id: impl Into<String>) -> Self {
        self.accessible_repos.insert(repo_id.into());
        self
    }

    /// Returns true if `author` is this user's email or one of their aliases.
    #[must_use]
    pub fn is_author(&self, author: &str) -> bool {
        let author = author.trim();
        if author.is_empty() {
            return false;
        }
        self.email
            .iter()
            .chain(self.aliases.iter())
            .any(|name| name.trim().eq_ignore_ascii_case(author))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_ordering() {
        assert!(Scope::Personal < Scope::Project);
        assert!(Scope::Project < Scope::Team);
        assert!(Scope::Team < Scope::Org);
    }

    #[test]
    fn test_scope_up_to() {
        let scopes: Vec<_> = Scope::Team.up_to().collect();
        assert_eq!(scopes, vec![Scope::Personal, Scope::Project, Scope::Team]);
        let scopes: Vec<_> = Scope::Personal.up_to().collect();
        assert_eq!(scopes, vec![Scope::Personal]);
    }

    #[test]
    fn test_scope_parse_roundtrip() {
        for scope in Scope::all() {
            assert_eq!(Scope::parse(scope.as_str()), Some(*scope));
        }
        assert_eq!(Scope::parse("ORGANIZATION"), Some(Scope::Org));
        assert_eq!(Scope::parse("galaxy"), None);
    }

    #[test]
    fn test_is_author_matches_email_and_aliases() {
        let ctx = UserContext::new("u1")
            .with_email("alice@example.com")
            .with_alias("Alice Smith");
        assert!(ctx.is_author("ALICE@example.com"));
        assert!(ctx.is_author("alice smith"));
        assert!(!ctx.is_author("bob"));
        assert!(!ctx.is_author(""));
    }
}

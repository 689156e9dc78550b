//! Query expansion.
//!
//! Rewrites a raw query into the keyword index's boolean grammar, widening
//! each word with known full forms (acronyms) and, at the `full` level,
//! general synonyms.
//!
//! ```text
//! "vcs strategy" (minimal)
//!   => ("vcs" OR "version control system" OR "version control" OR "git") "strategy"
//! ```
//!
//! Every term is quoted with embedded quotes doubled, so user input can never
//! reach the index as an operator. Table entries are checked when the tables
//! are built: an entry containing a boolean keyword (`AND`, `OR`, `NOT`,
//! `NEAR`) or an operator character is rejected before any query runs.

use crate::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::error;

/// Default cap on candidate terms per word, including the word itself.
pub const DEFAULT_MAX_TERMS_PER_WORD: usize = 5;

const OPERATOR_KEYWORDS: [&str; 4] = ["and", "or", "not", "near"];
const OPERATOR_CHARS: [char; 6] = ['"', '(', ')', '*', '^', ':'];

/// How aggressively to expand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExpansionLevel {
    /// Quote each word, nothing else.
    None,
    /// Add acronym full forms.
    #[default]
    Minimal,
    /// Add acronym full forms and general synonyms.
    Full,
}

impl ExpansionLevel {
    /// Returns the level name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Minimal => "minimal",
            Self::Full => "full",
        }
    }

    /// Parses a level name, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" | "off" => Some(Self::None),
            "minimal" | "min" => Some(Self::Minimal),
            "full" | "max" => Some(Self::Full),
            _ => None,
        }
    }
}

/// An expanded query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExpandedQuery {
    /// Boolean expression for the keyword index.
    pub expanded: String,
    /// Every candidate term, in expression order.
    pub terms: Vec<String>,
    /// Number of candidate terms added beyond the original words.
    pub expansions_applied: usize,
}

/// Validated acronym and synonym tables.
#[derive(Debug, Clone, Default)]
pub struct ExpansionTables {
    acronyms: HashMap<String, Vec<String>>,
    synonyms: HashMap<String, Vec<String>>,
}

impl ExpansionTables {
    /// Builds tables, rejecting any entry that could act as an operator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming the first offending entry.
    pub fn new(
        acronyms: HashMap<String, Vec<String>>,
        synonyms: HashMap<String, Vec<String>>,
    ) -> Result<Self> {
        let acronyms = normalize_table("acronym", acronyms)?;
        let synonyms = normalize_table("synonym", synonyms)?;
        Ok(Self { acronyms, synonyms })
    }

    /// Builds the built-in tables.
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in entry fails validation.
    pub fn builtin() -> Result<Self> {
        Self::new(to_table(BUILTIN_ACRONYMS), to_table(BUILTIN_SYNONYMS))
    }

    /// Returns the full forms for an acronym.
    #[must_use]
    pub fn acronym(&self, word: &str) -> &[String] {
        self.acronyms.get(word).map_or(&[], Vec::as_slice)
    }

    /// Returns the synonyms of a word.
    #[must_use]
    pub fn synonyms(&self, word: &str) -> &[String] {
        self.synonyms.get(word).map_or(&[], Vec::as_slice)
    }

    /// Iterates every expansion candidate in both tables.
    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        self.acronyms
            .values()
            .chain(self.synonyms.values())
            .flatten()
            .map(String::as_str)
    }
}

/// Query expander over validated tables.
#[derive(Debug, Clone)]
pub struct QueryExpander {
    tables: ExpansionTables,
    max_terms_per_word: usize,
}

impl QueryExpander {
    /// Creates an expander. `max_terms_per_word` is at least one.
    #[must_use]
    pub fn new(tables: ExpansionTables, max_terms_per_word: usize) -> Self {
        Self {
            tables,
            max_terms_per_word: max_terms_per_word.max(1),
        }
    }

    /// Creates an expander over the built-in tables.
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in entry fails validation.
    pub fn builtin(max_terms_per_word: usize) -> Result<Self> {
        Ok(Self::new(ExpansionTables::builtin()?, max_terms_per_word))
    }

    /// Returns the tables.
    #[must_use]
    pub const fn tables(&self) -> &ExpansionTables {
        &self.tables
    }

    /// Expands a raw query.
    #[must_use]
    pub fn expand(&self, query: &str, level: ExpansionLevel) -> ExpandedQuery {
        let mut groups: Vec<Vec<&str>> = Vec::new();
        let mut seen_words: Vec<String> = Vec::new();
        let mut expansions_applied = 0;

        let words: Vec<String> = query.split_whitespace().filter_map(clean_word).collect();
        for word in &words {
            if seen_words.contains(word) {
                continue;
            }
            seen_words.push(word.clone());

            let mut group: Vec<&str> = vec![word.as_str()];
            let synonyms: &[String] = match level {
                ExpansionLevel::Full => self.tables.synonyms(word),
                ExpansionLevel::None | ExpansionLevel::Minimal => &[],
            };
            let acronyms: &[String] = match level {
                ExpansionLevel::None => &[],
                ExpansionLevel::Minimal | ExpansionLevel::Full => self.tables.acronym(word),
            };
            for candidate in acronyms.iter().chain(synonyms) {
                if group.len() >= self.max_terms_per_word {
                    break;
                }
                if !group.contains(&candidate.as_str()) {
                    group.push(candidate.as_str());
                    expansions_applied += 1;
                }
            }
            groups.push(group);
        }

        let expanded = groups
            .iter()
            .map(|group| match group.as_slice() {
                [single] => quote(single),
                terms => format!(
                    "({})",
                    terms.iter().map(|t| quote(t)).collect::<Vec<_>>().join(" OR ")
                ),
            })
            .collect::<Vec<_>>()
            .join(" ");

        ExpandedQuery {
            expanded,
            terms: groups.into_iter().flatten().map(ToString::to_string).collect(),
            expansions_applied,
        }
    }
}

static BUILTIN_EXPANDER: LazyLock<std::result::Result<QueryExpander, String>> =
    LazyLock::new(|| {
        QueryExpander::builtin(DEFAULT_MAX_TERMS_PER_WORD).map_err(|e| e.to_string())
    });

/// Validates the built-in tables backing [`expand_query`].
///
/// Call during startup so a bad table fails construction instead of
/// silently disabling expansion.
///
/// # Errors
///
/// Returns an error if a built-in entry fails validation.
pub fn ensure_builtin_expansion() -> Result<()> {
    BUILTIN_EXPANDER
        .as_ref()
        .map(|_| ())
        .map_err(|cause| Error::InvalidInput(format!("built-in expansion tables: {cause}")))
}

/// Expands a query with the built-in tables and default term cap.
///
/// Falls back to plain quoting if the built-in tables are invalid; see
/// [`ensure_builtin_expansion`].
#[must_use]
pub fn expand_query(query: &str, level: ExpansionLevel) -> ExpandedQuery {
    match BUILTIN_EXPANDER.as_ref() {
        Ok(expander) => expander.expand(query, level),
        Err(cause) => {
            error!(error = %cause, "Built-in expansion tables failed validation");
            QueryExpander::new(ExpansionTables::default(), DEFAULT_MAX_TERMS_PER_WORD)
                .expand(query, level)
        },
    }
}

/// Quotes a term for the index grammar, doubling embedded quotes.
#[must_use]
pub fn quote(term: &str) -> String {
    format!("\"{}\"", term.replace('"', "\"\""))
}

/// Checks that a table entry cannot act as an index operator.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the entry is empty, contains an
/// operator character, or contains a boolean keyword as a whole word.
pub fn validate_term(term: &str) -> Result<()> {
    operator_violation(term).map_or(Ok(()), |violation| {
        Err(Error::InvalidInput(format!(
            "expansion entry '{term}' {violation}"
        )))
    })
}

fn operator_violation(term: &str) -> Option<String> {
    if term.trim().is_empty() {
        return Some("is empty".to_string());
    }
    if let Some(c) = term.chars().find(|c| OPERATOR_CHARS.contains(c)) {
        return Some(format!("contains operator character '{c}'"));
    }
    term.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .find(|w| OPERATOR_KEYWORDS.contains(&w.as_str()))
        .map(|keyword| format!("contains boolean operator '{}'", keyword.to_uppercase()))
}

fn normalize_table(
    kind: &str,
    table: HashMap<String, Vec<String>>,
) -> Result<HashMap<String, Vec<String>>> {
    let mut normalized = HashMap::with_capacity(table.len());
    for (key, values) in table {
        let key = key.trim().to_lowercase();
        if let Some(violation) = operator_violation(&key) {
            return Err(Error::InvalidInput(format!(
                "{kind} key '{key}' {violation}"
            )));
        }
        let mut entries: Vec<String> = Vec::with_capacity(values.len());
        for value in values {
            if let Some(violation) = operator_violation(&value) {
                return Err(Error::InvalidInput(format!(
                    "{kind} entry '{value}' for '{key}' {violation}"
                )));
            }
            let value = value.trim().to_lowercase();
            if value != key && !entries.contains(&value) {
                entries.push(value);
            }
        }
        normalized.insert(key, entries);
    }
    Ok(normalized)
}

fn to_table(entries: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.iter().map(ToString::to_string).collect()))
        .collect()
}

/// Lowercases a word and strips sentence punctuation around it.
fn clean_word(word: &str) -> Option<String> {
    let cleaned = word
        .trim_matches(|c: char| {
            matches!(c, '?' | '!' | ',' | ';' | ':' | '(' | ')' | '"' | '\'' | '`')
        })
        .trim_end_matches('.')
        .to_lowercase();
    (!cleaned.is_empty()).then_some(cleaned)
}

const BUILTIN_ACRONYMS: &[(&str, &[&str])] = &[
    ("vcs", &["version control system", "version control", "git"]),
    ("ci", &["continuous integration"]),
    ("cd", &["continuous delivery", "continuous deployment"]),
    ("pr", &["pull request", "merge request"]),
    ("mr", &["merge request", "pull request"]),
    ("db", &["database"]),
    ("k8s", &["kubernetes"]),
    ("api", &["application programming interface", "endpoint"]),
    ("auth", &["authentication", "authorization"]),
    ("adr", &["architecture decision record"]),
    ("rfc", &["request for comments"]),
    ("ui", &["user interface", "frontend"]),
    ("ux", &["user experience"]),
    ("sso", &["single sign-on"]),
    ("mfa", &["multi-factor authentication"]),
    ("jwt", &["json web token"]),
    ("infra", &["infrastructure"]),
    ("iac", &["infrastructure as code"]),
    ("repo", &["repository"]),
    ("config", &["configuration"]),
    ("env", &["environment"]),
    ("perf", &["performance"]),
    ("deps", &["dependencies"]),
    ("e2e", &["end-to-end"]),
    ("orm", &["object relational mapping"]),
    ("sla", &["service level agreement"]),
    ("tdd", &["test driven development"]),
    ("ml", &["machine learning"]),
    ("llm", &["large language model"]),
];

const BUILTIN_SYNONYMS: &[(&str, &[&str])] = &[
    ("bug", &["defect", "issue", "error"]),
    ("fix", &["patch", "repair", "resolve"]),
    ("owner", &["maintainer", "owns"]),
    ("owns", &["maintains", "owner"]),
    ("decision", &["choice", "decided", "chose"]),
    ("choose", &["chose", "selected", "picked"]),
    ("database", &["datastore", "storage"]),
    ("deploy", &["release", "rollout", "ship"]),
    ("test", &["tests", "testing", "spec"]),
    ("refactor", &["restructure", "cleanup", "rewrite"]),
    ("strategy", &["approach", "plan", "pattern"]),
    ("architecture", &["design", "structure"]),
    ("slow", &["latency", "performance"]),
    ("error", &["failure", "exception"]),
    ("migrate", &["migration", "port", "move"]),
    ("remove", &["delete", "drop"]),
];

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn expander() -> QueryExpander {
        QueryExpander::builtin(DEFAULT_MAX_TERMS_PER_WORD).unwrap_or_else(|_| {
            QueryExpander::new(ExpansionTables::default(), DEFAULT_MAX_TERMS_PER_WORD)
        })
    }

    #[test]
    fn test_builtin_tables_validate() {
        assert!(ExpansionTables::builtin().is_ok());
        assert!(ensure_builtin_expansion().is_ok());
    }

    #[test]
    fn test_vcs_strategy_minimal() {
        let result = expander().expand("vcs strategy", ExpansionLevel::Minimal);
        assert_eq!(
            result.expanded,
            r#"("vcs" OR "version control system" OR "version control" OR "git") "strategy""#
        );
        assert_eq!(result.expansions_applied, 3);
        assert_eq!(result.terms.first().map(String::as_str), Some("vcs"));
    }

    #[test]
    fn test_none_level_only_quotes() {
        let result = expander().expand("VCS Strategy", ExpansionLevel::None);
        assert_eq!(result.expanded, r#""vcs" "strategy""#);
        assert_eq!(result.expansions_applied, 0);
    }

    #[test]
    fn test_full_level_adds_synonyms() {
        let result = expander().expand("db strategy", ExpansionLevel::Full);
        assert!(result.expanded.contains(r#""approach""#));
        assert!(result.expanded.contains(r#""database""#));
        assert!(!result.expanded.contains(r#""datastore""#));
    }

    #[test]
    fn test_cap_includes_original() {
        let expander = QueryExpander::new(
            ExpansionTables::builtin().unwrap_or_default(),
            2,
        );
        let result = expander.expand("vcs", ExpansionLevel::Full);
        assert_eq!(result.expanded, r#"("vcs" OR "version control system")"#);
    }

    #[test]
    fn test_user_quotes_are_doubled() {
        let result = expander().expand(r#"say"hi" OR (x)"#, ExpansionLevel::None);
        assert_eq!(result.expanded, r#""say""hi" "or" "x""#);
    }

    #[test]
    fn test_punctuation_and_duplicates() {
        let result = expander().expand("Who owns billing? billing", ExpansionLevel::None);
        assert_eq!(result.expanded, r#""who" "owns" "billing""#);
    }

    #[test]
    fn test_empty_query() {
        let result = expand_query("   ", ExpansionLevel::Full);
        assert!(result.expanded.is_empty());
        assert!(result.terms.is_empty());
    }

    #[test_case("AND"; "and keyword")]
    #[test_case("rock or roll"; "lowercase or")]
    #[test_case("near/3"; "near with distance")]
    #[test_case("wild*"; "wildcard")]
    #[test_case("col:value"; "column filter")]
    #[test_case("\"quoted\""; "quote")]
    #[test_case("(group)"; "paren")]
    #[test_case("boost^2"; "caret")]
    #[test_case("   "; "blank")]
    fn test_operator_entries_rejected(entry: &str) {
        let mut acronyms = HashMap::new();
        acronyms.insert("x".to_string(), vec![entry.to_string()]);
        assert!(matches!(
            ExpansionTables::new(acronyms, HashMap::new()),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_operator_like_substrings_allowed() {
        let mut synonyms = HashMap::new();
        synonyms.insert(
            "store".to_string(),
            vec!["android".to_string(), "ordering".to_string(), "nearby".to_string()],
        );
        assert!(ExpansionTables::new(HashMap::new(), synonyms).is_ok());
    }

    #[test]
    fn test_level_parse() {
        assert_eq!(ExpansionLevel::parse("FULL"), Some(ExpansionLevel::Full));
        assert_eq!(ExpansionLevel::parse("none"), Some(ExpansionLevel::None));
        assert_eq!(ExpansionLevel::parse("extreme"), None);
    }
}

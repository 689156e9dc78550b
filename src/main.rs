//! Binary entry point for teamrecall.
//!
//! Loads a JSON corpus of records into the in-memory store and answers
//! questions over it.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use teamrecall::config::TeamRecallConfig;
use teamrecall::models::{Citation, ClarificationRequest, Record};
use teamrecall::observability;
use teamrecall::services::{ExpansionLevel, QueryExpander, ResearchEngine, TeamQueryService};
use teamrecall::storage::{InMemoryStore, RecordCatalog, SearchBackend};
use teamrecall::{RateLimiter, Scope, UserContext};

/// Teamrecall - permission-scoped research over team activity records.
#[derive(Parser)]
#[command(name = "teamrecall")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true, env = "TEAMRECALL_CONFIG")]
    config: Option<PathBuf>,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Research a question over every record in the corpus.
    Ask {
        /// The question.
        question: String,

        /// JSON file holding an array of records.
        #[arg(long, env = "TEAMRECALL_CORPUS")]
        corpus: PathBuf,
    },

    /// Answer a question from the records visible to one user.
    TeamQuery {
        /// The question.
        question: String,

        /// JSON file holding an array of records.
        #[arg(long, env = "TEAMRECALL_CORPUS")]
        corpus: PathBuf,

        /// Requesting user id.
        #[arg(short, long)]
        user: String,

        /// Requesting user's organization.
        #[arg(short, long)]
        org: Option<String>,

        /// Visibility scope: personal, project, team or org.
        #[arg(short, long, default_value = "org")]
        scope: String,

        /// Projects the user may read (comma-separated).
        #[arg(long, value_delimiter = ',')]
        projects: Vec<String>,

        /// Repositories the user may read (comma-separated).
        #[arg(long, value_delimiter = ',')]
        repos: Vec<String>,

        /// Maximum number of results (0 uses the configured default).
        #[arg(short, long, default_value = "0")]
        limit: usize,
    },

    /// Show how a query is expanded for keyword search.
    Expand {
        /// The query.
        query: String,

        /// Expansion level: none, minimal or full.
        #[arg(short, long, default_value = "full")]
        level: String,
    },

    /// Show the rate limit window for a user and operation.
    RateStatus {
        /// User id.
        #[arg(short, long)]
        user: String,

        /// Operation name, as configured under `rate_limits.operations`.
        #[arg(short, long, default_value = "team_query")]
        operation: String,

        /// Requests to record before reporting.
        #[arg(long, default_value = "0")]
        checks: usize,
    },
}

fn main() -> ExitCode {
    // A missing .env file is not an error.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        },
    };

    if let Err(e) = observability::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run_command(cli, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Loads configuration from an explicit path or the default location.
fn load_config(path: Option<&Path>) -> anyhow::Result<TeamRecallConfig> {
    match path {
        Some(path) => TeamRecallConfig::load_from_file(path)
            .with_context(|| format!("reading {}", path.display())),
        None => {
            let config = TeamRecallConfig::load_default();
            config.validate()?;
            Ok(config)
        },
    }
}

/// Runs the selected command.
fn run_command(cli: Cli, config: &TeamRecallConfig) -> anyhow::Result<()> {
    match cli.command {
        Commands::Ask { question, corpus } => cmd_ask(config, &question, &corpus, cli.json),
        Commands::TeamQuery {
            question,
            corpus,
            user,
            org,
            scope,
            projects,
            repos,
            limit,
        } => {
            let Some(scope) = Scope::parse(&scope) else {
                bail!("unknown scope '{scope}' (expected personal, project, team or org)");
            };
            let mut context = UserContext::new(user);
            context.org_id = org;
            context.accessible_projects = projects.into_iter().collect();
            context.accessible_repos = repos.into_iter().collect();
            cmd_team_query(config, &question, &corpus, &context, scope, limit, cli.json)
        },
        Commands::Expand { query, level } => cmd_expand(config, &query, &level, cli.json),
        Commands::RateStatus {
            user,
            operation,
            checks,
        } => cmd_rate_status(config, &user, &operation, checks, cli.json),
    }
}

/// Reads a corpus file and indexes it into a fresh store.
fn load_corpus(path: &Path, config: &TeamRecallConfig) -> anyhow::Result<Arc<InMemoryStore>> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let records: Vec<Record> = serde_json::from_str(&contents)
        .with_context(|| format!("parsing records from {}", path.display()))?;
    let store = InMemoryStore::new();
    let indexed = store.index_documents(&config.search.collection, &records)?;
    tracing::info!(records = records.len(), indexed, "Corpus loaded");
    Ok(Arc::new(store))
}

fn cmd_ask(
    config: &TeamRecallConfig,
    question: &str,
    corpus: &Path,
    json: bool,
) -> anyhow::Result<()> {
    let store = load_corpus(corpus, config)?;
    let catalog: Arc<dyn RecordCatalog> = store.clone();
    let engine = ResearchEngine::builder(store)
        .config(config)
        .catalog(catalog)
        .build()?;
    let result = engine.research_question(question)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }
    println!("{}", result.answer);
    println!();
    println!(
        "Confidence: {} ({}, {} leads)",
        result.confidence,
        result.state.as_str(),
        result.leads_investigated
    );
    print_details(&result.citations, &result.caveats, result.clarification.as_ref());
    Ok(())
}

fn cmd_team_query(
    config: &TeamRecallConfig,
    question: &str,
    corpus: &Path,
    context: &UserContext,
    scope: Scope,
    limit: usize,
    json: bool,
) -> anyhow::Result<()> {
    let store = load_corpus(corpus, config)?;
    let backend: Arc<dyn SearchBackend> = store.clone();
    let service = TeamQueryService::new(backend, store, config)?;
    let result = service.query_team_memory(question, context, scope, limit, false)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }
    println!("{}", result.answer);
    println!();
    println!(
        "Confidence: {} ({} sources, {} permitted records)",
        result.confidence, result.sessions_searched, result.stats.permitted_records
    );
    if let Some(strategy) = &result.stats.fallback_strategy {
        println!("Fallback: {strategy}");
    }
    print_details(&result.citations, &result.caveats, result.clarification.as_ref());
    Ok(())
}

fn cmd_expand(
    config: &TeamRecallConfig,
    query: &str,
    level: &str,
    json: bool,
) -> anyhow::Result<()> {
    let Some(level) = ExpansionLevel::parse(level) else {
        bail!("unknown expansion level '{level}' (expected none, minimal or full)");
    };
    let expander = QueryExpander::builtin(config.search.max_terms_per_word)?;
    let expanded = expander.expand(query, level);

    if json {
        println!("{}", serde_json::to_string_pretty(&expanded)?);
        return Ok(());
    }
    println!("{}", expanded.expanded);
    println!();
    println!(
        "{} terms, {} added by {} expansion",
        expanded.terms.len(),
        expanded.expansions_applied,
        level.as_str()
    );
    Ok(())
}

fn cmd_rate_status(
    config: &TeamRecallConfig,
    user: &str,
    operation: &str,
    checks: usize,
    json: bool,
) -> anyhow::Result<()> {
    let limiter = RateLimiter::new(config.rate_limits.clone());
    let admitted = (0..checks)
        .filter(|_| limiter.check_rate_limit(user, operation).allowed)
        .count();
    let status = limiter.status_for(user, operation);

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }
    println!(
        "{operation} for {user}: {}/{} remaining, resets in {} ms",
        status.remaining, status.limit, status.reset_in_ms
    );
    if checks > 0 {
        println!("{admitted} of {checks} recorded requests admitted");
    }
    if !status.allowed {
        println!("Next request would be rejected");
    }
    Ok(())
}

fn print_details(
    citations: &[Citation],
    caveats: &[String],
    clarification: Option<&ClarificationRequest>,
) {
    if !citations.is_empty() {
        println!();
        println!("Citations:");
        for citation in citations {
            let author = citation.author.as_deref().unwrap_or("unknown");
            println!(
                "  [{:.2}] {} ({author}): {}",
                citation.relevance, citation.source, citation.excerpt
            );
            if let Some(url) = &citation.browse_url {
                println!("         {url}");
            }
        }
    }
    if !caveats.is_empty() {
        println!();
        println!("Caveats:");
        for caveat in caveats {
            println!("  - {caveat}");
        }
    }
    if let Some(request) = clarification {
        if !request.suggestions.is_empty() {
            println!();
            println!("Try narrowing to one of:");
            for suggestion in &request.suggestions {
                println!("  - {suggestion}");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_rate_status_defaults_to_team_query() {
        let cli = Cli::try_parse_from(["teamrecall", "rate-status", "--user", "dana"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::RateStatus { ref user, ref operation, checks: 0 }
                if user == "dana" && operation == "team_query"
        ));
    }

    #[test]
    fn test_rate_status_runs_against_configured_rule() {
        let config = TeamRecallConfig::default();
        assert!(cmd_rate_status(&config, "dana", "team_query", 3, true).is_ok());
        assert!(cmd_rate_status(&config, "dana", "unlisted", 0, false).is_ok());
    }
}

//! Configuration management.
//!
//! Runtime configuration lives in [`TeamRecallConfig`]. It is built from
//! defaults, optionally overlaid with a TOML file ([`ConfigFile`]) and then
//! with `TEAMRECALL_*` environment variables.
//!
//! # Example TOML
//!
//! ```toml
//! [search]
//! collection = "team_records"
//! rrf_k = 60.0
//! expansion_level = "minimal"
//!
//! [cache]
//! permitted_ids_ttl_secs = 300
//! query_results_ttl_secs = 3600
//!
//! [rate_limits.default]
//! max_requests = 30
//! window_ms = 60000
//!
//! [rate_limits.operations.team_query]
//! max_requests = 10
//! window_ms = 60000
//!
//! [research]
//! strong_threshold = 0.5
//! max_leads = 25
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

use crate::observability::{LogFormat, LoggingConfig};
use crate::security::RateLimitRule;
use crate::services::ExpansionLevel;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Default collection name shared by indexing and search.
pub const DEFAULT_COLLECTION: &str = "team_records";

/// Main configuration for teamrecall.
#[derive(Debug, Clone, Default)]
pub struct TeamRecallConfig {
    /// Retrieval settings.
    pub search: SearchSettings,
    /// Cache TTLs and sweep cadence.
    pub cache: CacheSettings,
    /// Rate limit rules.
    pub rate_limits: RateLimitSettings,
    /// Research loop thresholds.
    pub research: ResearchSettings,
    /// Fallback chain settings.
    pub fallback: FallbackSettings,
    /// Org learning promotion thresholds.
    pub learnings: LearningSettings,
    /// Logging output.
    pub logging: LoggingConfig,
}

/// Retrieval settings.
#[derive(Debug, Clone)]
pub struct SearchSettings {
    /// Collection used for indexing and search.
    pub collection: String,
    /// RRF dampening constant.
    pub rrf_k: f32,
    /// Default result limit.
    pub default_limit: usize,
    /// Expansion level applied to keyword queries.
    pub expansion_level: ExpansionLevel,
    /// Maximum candidate terms per query word, including the original.
    pub max_terms_per_word: usize,
    /// Base URL used to build citation browse links.
    pub browse_base_url: Option<String>,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            rrf_k: 60.0,
            default_limit: 10,
            expansion_level: ExpansionLevel::Minimal,
            max_terms_per_word: 5,
            browse_base_url: None,
        }
    }
}

/// Cache settings.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// TTL for permitted record-id sets.
    pub permitted_ids_ttl: Duration,
    /// TTL for full query results.
    pub query_results_ttl: Duration,
    /// TTL for promoted org learnings.
    pub org_learnings_ttl: Duration,
    /// Maximum entries per cache.
    pub capacity: usize,
    /// Interval between background expiry sweeps.
    pub sweep_interval: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            permitted_ids_ttl: Duration::from_secs(5 * 60),
            query_results_ttl: Duration::from_secs(60 * 60),
            org_learnings_ttl: Duration::from_secs(15 * 60),
            capacity: 1_000,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Rate limit settings.
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    /// Rule for operations without an explicit entry.
    pub default: RateLimitRule,
    /// Per-operation rules.
    pub operations: HashMap<String, RateLimitRule>,
    /// Interval between idle-key sweeps.
    pub sweep_interval: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        let mut operations = HashMap::new();
        operations.insert("team_query".to_string(), RateLimitRule::new(20, 60_000));
        operations.insert("research".to_string(), RateLimitRule::new(10, 60_000));
        Self {
            default: RateLimitRule::new(60, 60_000),
            operations,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl RateLimitSettings {
    /// Returns the rule for `operation`, or the default rule.
    #[must_use]
    pub fn rule_for(&self, operation: &str) -> RateLimitRule {
        self.operations
            .get(operation)
            .copied()
            .unwrap_or(self.default)
    }

    /// Returns the longest window across all rules.
    #[must_use]
    pub fn longest_window_ms(&self) -> u64 {
        self.operations
            .values()
            .map(|r| r.window_ms)
            .chain(std::iter::once(self.default.window_ms))
            .max()
            .unwrap_or(self.default.window_ms)
    }
}

/// Research loop settings.
#[derive(Debug, Clone)]
pub struct ResearchSettings {
    /// Minimum individual confidence for evidence to count as strong.
    pub strong_threshold: f32,
    /// Upper bound on investigated leads per session.
    pub max_leads: usize,
    /// Results requested per lead investigation.
    pub results_per_lead: usize,
    /// Age gap (days) beyond which differing oldest/newest claims are flagged.
    pub evolution_window_days: u64,
}

impl Default for ResearchSettings {
    fn default() -> Self {
        Self {
            strong_threshold: 0.5,
            max_leads: 25,
            results_per_lead: 10,
            evolution_window_days: 30,
        }
    }
}

/// Fallback chain settings.
#[derive(Debug, Clone)]
pub struct FallbackSettings {
    /// Sources examined by the recency scan.
    pub recency_max_sources: usize,
    /// Decay constant (hours) of the recency score.
    pub recency_decay_hours: f64,
    /// Whether the exhaustive scan may run.
    pub exhaustive_enabled: bool,
    /// Wall-clock budget for the exhaustive scan.
    pub exhaustive_timeout: Duration,
    /// Result cap for either scan.
    pub max_results: usize,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            recency_max_sources: 50,
            recency_decay_hours: 24.0,
            exhaustive_enabled: true,
            exhaustive_timeout: Duration::from_secs(5),
            max_results: 20,
        }
    }
}

/// Org learning promotion thresholds.
#[derive(Debug, Clone)]
pub struct LearningSettings {
    /// Minimum observations before promotion.
    pub promotion_occurrences: usize,
    /// Minimum mean confidence before promotion.
    pub promotion_confidence: f32,
}

impl Default for LearningSettings {
    fn default() -> Self {
        Self {
            promotion_occurrences: 3,
            promotion_confidence: 0.8,
        }
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Search section.
    pub search: Option<ConfigFileSearch>,
    /// Cache section.
    pub cache: Option<ConfigFileCache>,
    /// Rate limits section.
    pub rate_limits: Option<ConfigFileRateLimits>,
    /// Research section.
    pub research: Option<ConfigFileResearch>,
    /// Fallback section.
    pub fallback: Option<ConfigFileFallback>,
    /// Learnings section.
    pub learnings: Option<ConfigFileLearnings>,
    /// Logging section.
    pub logging: Option<ConfigFileLogging>,
}

/// Search section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileSearch {
    /// Collection name.
    pub collection: Option<String>,
    /// RRF k.
    pub rrf_k: Option<f32>,
    /// Default limit.
    pub default_limit: Option<usize>,
    /// Expansion level name.
    pub expansion_level: Option<String>,
    /// Max terms per word.
    pub max_terms_per_word: Option<usize>,
    /// Browse base URL.
    pub browse_base_url: Option<String>,
}

/// Cache section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileCache {
    /// Permitted ids TTL.
    pub permitted_ids_ttl_secs: Option<u64>,
    /// Query results TTL.
    pub query_results_ttl_secs: Option<u64>,
    /// Org learnings TTL.
    pub org_learnings_ttl_secs: Option<u64>,
    /// Capacity.
    pub capacity: Option<usize>,
    /// Sweep interval.
    pub sweep_interval_secs: Option<u64>,
}

/// Rate limits section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileRateLimits {
    /// Default rule.
    pub default: Option<RateLimitRule>,
    /// Per-operation rules.
    #[serde(default)]
    pub operations: HashMap<String, RateLimitRule>,
    /// Sweep interval.
    pub sweep_interval_secs: Option<u64>,
}

/// Research section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileResearch {
    /// Strong evidence threshold.
    pub strong_threshold: Option<f32>,
    /// Max leads.
    pub max_leads: Option<usize>,
    /// Results per lead.
    pub results_per_lead: Option<usize>,
    /// Evolution window.
    pub evolution_window_days: Option<u64>,
}

/// Fallback section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileFallback {
    /// Recency max sources.
    pub recency_max_sources: Option<usize>,
    /// Recency decay hours.
    pub recency_decay_hours: Option<f64>,
    /// Exhaustive enabled.
    pub exhaustive_enabled: Option<bool>,
    /// Exhaustive timeout.
    pub exhaustive_timeout_ms: Option<u64>,
    /// Max results.
    pub max_results: Option<usize>,
}

/// Learnings section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileLearnings {
    /// Promotion occurrences.
    pub promotion_occurrences: Option<usize>,
    /// Promotion confidence.
    pub promotion_confidence: Option<f32>,
}

/// Logging section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileLogging {
    /// Filter directive (e.g. `info`, `teamrecall=debug`).
    pub level: Option<String>,
    /// `pretty` or `json`.
    pub format: Option<String>,
}

impl TeamRecallConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path, then applies env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or a value is
    /// out of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parses configuration from TOML text, then applies env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the text cannot be parsed or a value is out of range.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;
        let config = Self::from_config_file(file)?.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from the default location.
    ///
    /// Checks `<config_dir>/teamrecall/config.toml`, then
    /// `~/.config/teamrecall/config.toml`. Falls back to defaults (with env
    /// overrides) when neither exists or parsing fails.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default().with_env_overrides();
        };

        let candidates = [
            base_dirs.config_dir().join("teamrecall").join("config.toml"),
            base_dirs
                .home_dir()
                .join(".config")
                .join("teamrecall")
                .join("config.toml"),
        ];

        for path in candidates {
            if !path.exists() {
                continue;
            }
            match Self::load_from_file(&path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Ignoring invalid config file"
                    );
                },
            }
        }

        Self::default().with_env_overrides()
    }

    /// Converts a `ConfigFile` to `TeamRecallConfig`.
    fn from_config_file(file: ConfigFile) -> Result<Self> {
        let mut config = Self::default();

        if let Some(search) = file.search {
            if let Some(v) = search.collection {
                config.search.collection = v;
            }
            if let Some(v) = search.rrf_k {
                config.search.rrf_k = v;
            }
            if let Some(v) = search.default_limit {
                config.search.default_limit = v;
            }
            if let Some(v) = search.expansion_level {
                config.search.expansion_level = ExpansionLevel::parse(&v).ok_or_else(|| {
                    Error::InvalidInput(format!("unknown expansion level '{v}'"))
                })?;
            }
            if let Some(v) = search.max_terms_per_word {
                config.search.max_terms_per_word = v;
            }
            config.search.browse_base_url = search.browse_base_url;
        }

        if let Some(cache) = file.cache {
            if let Some(v) = cache.permitted_ids_ttl_secs {
                config.cache.permitted_ids_ttl = Duration::from_secs(v);
            }
            if let Some(v) = cache.query_results_ttl_secs {
                config.cache.query_results_ttl = Duration::from_secs(v);
            }
            if let Some(v) = cache.org_learnings_ttl_secs {
                config.cache.org_learnings_ttl = Duration::from_secs(v);
            }
            if let Some(v) = cache.capacity {
                config.cache.capacity = v;
            }
            if let Some(v) = cache.sweep_interval_secs {
                config.cache.sweep_interval = Duration::from_secs(v);
            }
        }

        if let Some(limits) = file.rate_limits {
            if let Some(v) = limits.default {
                config.rate_limits.default = v;
            }
            config.rate_limits.operations.extend(limits.operations);
            if let Some(v) = limits.sweep_interval_secs {
                config.rate_limits.sweep_interval = Duration::from_secs(v);
            }
        }

        if let Some(research) = file.research {
            if let Some(v) = research.strong_threshold {
                config.research.strong_threshold = v;
            }
            if let Some(v) = research.max_leads {
                config.research.max_leads = v;
            }
            if let Some(v) = research.results_per_lead {
                config.research.results_per_lead = v;
            }
            if let Some(v) = research.evolution_window_days {
                config.research.evolution_window_days = v;
            }
        }

        if let Some(fallback) = file.fallback {
            if let Some(v) = fallback.recency_max_sources {
                config.fallback.recency_max_sources = v;
            }
            if let Some(v) = fallback.recency_decay_hours {
                config.fallback.recency_decay_hours = v;
            }
            if let Some(v) = fallback.exhaustive_enabled {
                config.fallback.exhaustive_enabled = v;
            }
            if let Some(v) = fallback.exhaustive_timeout_ms {
                config.fallback.exhaustive_timeout = Duration::from_millis(v);
            }
            if let Some(v) = fallback.max_results {
                config.fallback.max_results = v;
            }
        }

        if let Some(learnings) = file.learnings {
            if let Some(v) = learnings.promotion_occurrences {
                config.learnings.promotion_occurrences = v;
            }
            if let Some(v) = learnings.promotion_confidence {
                config.learnings.promotion_confidence = v;
            }
        }

        if let Some(logging) = file.logging {
            if let Some(v) = logging.level {
                config.logging.level = v;
            }
            if let Some(v) = logging.format {
                config.logging.format = LogFormat::parse(&v)
                    .ok_or_else(|| Error::InvalidInput(format!("unknown log format '{v}'")))?;
            }
        }

        Ok(config)
    }

    /// Applies environment variable overrides.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `TEAMRECALL_COLLECTION` | `search.collection` |
    /// | `TEAMRECALL_EXPANSION_LEVEL` | `search.expansion_level` |
    /// | `TEAMRECALL_RATE_LIMIT_MAX_REQUESTS` | `rate_limits.default.max_requests` |
    /// | `TEAMRECALL_RATE_LIMIT_WINDOW_MS` | `rate_limits.default.window_ms` |
    /// | `TEAMRECALL_STRONG_THRESHOLD` | `research.strong_threshold` |
    /// | `TEAMRECALL_MAX_LEADS` | `research.max_leads` |
    /// | `TEAMRECALL_EXHAUSTIVE_TIMEOUT_MS` | `fallback.exhaustive_timeout` |
    /// | `TEAMRECALL_LOG_FORMAT` | `logging.format` |
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_string("TEAMRECALL_COLLECTION") {
            self.search.collection = v;
        }
        if let Some(level) = env_string("TEAMRECALL_EXPANSION_LEVEL")
            .as_deref()
            .and_then(ExpansionLevel::parse)
        {
            self.search.expansion_level = level;
        }
        if let Some(v) = env_parse::<usize>("TEAMRECALL_RATE_LIMIT_MAX_REQUESTS") {
            self.rate_limits.default.max_requests = v;
        }
        if let Some(v) = env_parse::<u64>("TEAMRECALL_RATE_LIMIT_WINDOW_MS") {
            self.rate_limits.default.window_ms = v;
        }
        if let Some(v) = env_parse::<f32>("TEAMRECALL_STRONG_THRESHOLD") {
            self.research.strong_threshold = v;
        }
        if let Some(v) = env_parse::<usize>("TEAMRECALL_MAX_LEADS") {
            self.research.max_leads = v;
        }
        if let Some(v) = env_parse::<u64>("TEAMRECALL_EXHAUSTIVE_TIMEOUT_MS") {
            self.fallback.exhaustive_timeout = Duration::from_millis(v);
        }
        if let Some(format) = env_string("TEAMRECALL_LOG_FORMAT")
            .as_deref()
            .and_then(LogFormat::parse)
        {
            self.logging.format = format;
        }
        self
    }

    /// Checks value ranges and the built-in expansion tables.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.search.collection.trim().is_empty() {
            return Err(Error::InvalidInput("search.collection is empty".to_string()));
        }
        if self.search.rrf_k <= 0.0 {
            return Err(Error::InvalidInput("search.rrf_k must be positive".to_string()));
        }
        if self.search.default_limit == 0 || self.search.max_terms_per_word == 0 {
            return Err(Error::InvalidInput(
                "search limits must be at least 1".to_string(),
            ));
        }
        if self.cache.capacity == 0 {
            return Err(Error::InvalidInput("cache.capacity must be at least 1".to_string()));
        }
        let rules = self
            .rate_limits
            .operations
            .iter()
            .map(|(name, rule)| (name.as_str(), rule))
            .chain(std::iter::once(("default", &self.rate_limits.default)));
        for (name, rule) in rules {
            if rule.max_requests == 0 || rule.window_ms == 0 {
                return Err(Error::InvalidInput(format!(
                    "rate limit rule '{name}' must allow at least one request per non-empty window"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.research.strong_threshold) {
            return Err(Error::InvalidInput(
                "research.strong_threshold must be within [0, 1]".to_string(),
            ));
        }
        if self.research.max_leads == 0 || self.research.results_per_lead == 0 {
            return Err(Error::InvalidInput(
                "research limits must be at least 1".to_string(),
            ));
        }
        if self.fallback.recency_decay_hours <= 0.0 {
            return Err(Error::InvalidInput(
                "fallback.recency_decay_hours must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.learnings.promotion_confidence) {
            return Err(Error::InvalidInput(
                "learnings.promotion_confidence must be within [0, 1]".to_string(),
            ));
        }
        crate::services::ensure_builtin_expansion()
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}

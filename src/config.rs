//! Environment-driven configuration
//!
//! `.env` is loaded first (if present), then each setting falls back to its
//! default when the variable is unset. A set-but-unparsable value is an error.

use crate::datastore::postgres::DEFAULT_MAX_ATTEMPTS;
use crate::error::OrchestrationError;
use crate::graph::DEFAULT_MAX_CYCLES;
use crate::insights::InsightThresholds;
use crate::llm::gemini::DEFAULT_MODEL;
use crate::llm::RetryPolicy;
use crate::planner::PlannerStrategy;
use crate::Result;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HISTORY_WINDOW: usize = 10;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub planner_strategy: PlannerStrategy,
    pub max_cycles: u32,
    pub tool_timeout: Duration,
    pub provider_retry: RetryPolicy,
    pub cache_capacity: usize,
    pub thresholds: InsightThresholds,
    /// Prior messages handed to the delegated planner
    pub history_window: usize,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    /// Overrides the Gemini endpoint (proxies, regional gateways)
    pub gemini_base_url: Option<String>,
    pub database_url: Option<String>,
    pub database_max_attempts: u32,
    pub port: u16,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            planner_strategy: PlannerStrategy::Deterministic,
            max_cycles: DEFAULT_MAX_CYCLES,
            tool_timeout: crate::execution::DEFAULT_TOOL_TIMEOUT,
            provider_retry: RetryPolicy::default(),
            cache_capacity: crate::cache::DEFAULT_CAPACITY,
            thresholds: InsightThresholds::default(),
            history_window: DEFAULT_HISTORY_WINDOW,
            gemini_api_key: None,
            gemini_model: DEFAULT_MODEL.to_string(),
            gemini_base_url: None,
            database_url: None,
            database_max_attempts: DEFAULT_MAX_ATTEMPTS,
            port: DEFAULT_PORT,
        }
    }
}

impl OrchestratorConfig {
    /// Load `.env`, then read the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (the environment in production, a map in tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let thresholds = InsightThresholds {
            cost_high: parse(&get, "COST_HIGH_THRESHOLD", defaults.thresholds.cost_high)?,
            cost_medium: parse(&get, "COST_MEDIUM_THRESHOLD", defaults.thresholds.cost_medium)?,
            idle_age_days: parse(&get, "IDLE_AGE_DAYS", defaults.thresholds.idle_age_days)?,
            ..defaults.thresholds
        };
        if thresholds.cost_medium > thresholds.cost_high {
            return Err(OrchestrationError::Config(
                "COST_MEDIUM_THRESHOLD must not exceed COST_HIGH_THRESHOLD".to_string(),
            ));
        }

        let max_cycles: u32 = parse(&get, "MAX_CYCLES", defaults.max_cycles)?;
        if max_cycles == 0 {
            return Err(OrchestrationError::Config("MAX_CYCLES must be at least 1".to_string()));
        }

        Ok(Self {
            planner_strategy: parse(&get, "PLANNER_STRATEGY", defaults.planner_strategy)?,
            max_cycles,
            tool_timeout: Duration::from_secs(parse(
                &get,
                "TOOL_TIMEOUT_SECS",
                defaults.tool_timeout.as_secs(),
            )?),
            provider_retry: RetryPolicy {
                max_retries: parse(&get, "PROVIDER_MAX_RETRIES", defaults.provider_retry.max_retries)?,
                timeout: Duration::from_secs(parse(
                    &get,
                    "PROVIDER_TIMEOUT_SECS",
                    defaults.provider_retry.timeout.as_secs(),
                )?),
                base_backoff: Duration::from_millis(parse(
                    &get,
                    "PROVIDER_BACKOFF_MS",
                    defaults.provider_retry.base_backoff.as_millis() as u64,
                )?),
            },
            cache_capacity: parse(&get, "CACHE_CAPACITY", defaults.cache_capacity)?,
            thresholds,
            history_window: parse(&get, "HISTORY_WINDOW", defaults.history_window)?,
            gemini_api_key: get("GEMINI_API_KEY"),
            gemini_model: get("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            gemini_base_url: get("GEMINI_BASE_URL"),
            database_url: get("DATABASE_URL"),
            database_max_attempts: parse(&get, "DATABASE_MAX_ATTEMPTS", defaults.database_max_attempts)?,
            port: parse(&get, "PORT", defaults.port)?,
        })
    }
}

fn parse<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T> {
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.parse::<T>().map_err(|_| {
            OrchestrationError::Config(format!("invalid value for {}: '{}'", key, raw))
        }),
    }
}

//! Runtime configuration for the pipeline.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Environment variable overrides (`REFINERY_*`)
//! 2. Values loaded from a TOML file (CLI `--config`)
//! 3. Built-in defaults

use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Default OpenAI-compatible gateway serving the enumerated model set.
const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
/// Retry attempt ceiling for a single model call.
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// First backoff delay; doubles per retry.
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1_000;
/// Backoff ceiling.
const DEFAULT_MAX_BACKOFF_MS: u64 = 10_000;
/// Per-request HTTP timeout.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
/// Completion budget per call.
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 1_024;
/// Sampling temperature for refine calls.
const DEFAULT_SOLUTION_TEMPERATURE: f64 = 0.7;
/// Sampling temperature for judge/critique calls (lower = steadier rubric).
const DEFAULT_CRITIQUE_TEMPERATURE: f64 = 0.6;
/// Early-stop score on the 0–10 scale when a threshold is enabled via env.
pub const DEFAULT_QUALITY_THRESHOLD: f64 = 8.5;

const ENV_BASE_URL: &str = "REFINERY_BASE_URL";
const ENV_MAX_ATTEMPTS: &str = "REFINERY_MAX_ATTEMPTS";
const ENV_INITIAL_BACKOFF_MS: &str = "REFINERY_INITIAL_BACKOFF_MS";
const ENV_MAX_BACKOFF_MS: &str = "REFINERY_MAX_BACKOFF_MS";
const ENV_REQUEST_TIMEOUT_SECS: &str = "REFINERY_REQUEST_TIMEOUT_SECS";
const ENV_MAX_OUTPUT_TOKENS: &str = "REFINERY_MAX_OUTPUT_TOKENS";
const ENV_SOLUTION_TEMPERATURE: &str = "REFINERY_SOLUTION_TEMPERATURE";
const ENV_CRITIQUE_TEMPERATURE: &str = "REFINERY_CRITIQUE_TEMPERATURE";
const ENV_QUALITY_THRESHOLD: &str = "REFINERY_QUALITY_THRESHOLD";

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

/// Pipeline configuration. Construct via `default()` (env-aware) or
/// [`PipelineConfig::from_toml_file`], then [`validate`](Self::validate).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Base URL of the OpenAI-compatible chat-completions endpoint.
    pub base_url: String,
    /// Total attempts per model call (first try + retries).
    pub max_attempts: u32,
    /// First retry delay in milliseconds.
    pub initial_backoff_ms: u64,
    /// Retry delay ceiling in milliseconds.
    pub max_backoff_ms: u64,
    /// HTTP timeout per attempt, seconds.
    pub request_timeout_secs: u64,
    /// `max_tokens` sent with every completion request.
    pub max_output_tokens: u32,
    /// Temperature for refine calls.
    pub solution_temperature: f64,
    /// Temperature for judge and critique calls.
    pub critique_temperature: f64,
    /// Stop iterating once a record's overall score reaches this value
    /// (0–10). `None` disables early termination.
    pub quality_threshold: Option<f64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_url: env::var(ENV_BASE_URL).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            max_attempts: env_parsed(ENV_MAX_ATTEMPTS, DEFAULT_MAX_ATTEMPTS),
            initial_backoff_ms: env_parsed(ENV_INITIAL_BACKOFF_MS, DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff_ms: env_parsed(ENV_MAX_BACKOFF_MS, DEFAULT_MAX_BACKOFF_MS),
            request_timeout_secs: env_parsed(ENV_REQUEST_TIMEOUT_SECS, DEFAULT_REQUEST_TIMEOUT_SECS),
            max_output_tokens: env_parsed(ENV_MAX_OUTPUT_TOKENS, DEFAULT_MAX_OUTPUT_TOKENS),
            solution_temperature: env_parsed(ENV_SOLUTION_TEMPERATURE, DEFAULT_SOLUTION_TEMPERATURE),
            critique_temperature: env_parsed(ENV_CRITIQUE_TEMPERATURE, DEFAULT_CRITIQUE_TEMPERATURE),
            quality_threshold: env::var(ENV_QUALITY_THRESHOLD)
                .ok()
                .and_then(|raw| raw.parse().ok()),
        }
    }
}

impl PipelineConfig {
    /// Load from a TOML file, then apply environment overrides on top.
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let mut config: Self = toml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var(ENV_BASE_URL) {
            self.base_url = url;
        }
        self.max_attempts = env_parsed(ENV_MAX_ATTEMPTS, self.max_attempts);
        self.initial_backoff_ms = env_parsed(ENV_INITIAL_BACKOFF_MS, self.initial_backoff_ms);
        self.max_backoff_ms = env_parsed(ENV_MAX_BACKOFF_MS, self.max_backoff_ms);
        self.request_timeout_secs = env_parsed(ENV_REQUEST_TIMEOUT_SECS, self.request_timeout_secs);
        self.max_output_tokens = env_parsed(ENV_MAX_OUTPUT_TOKENS, self.max_output_tokens);
        self.solution_temperature = env_parsed(ENV_SOLUTION_TEMPERATURE, self.solution_temperature);
        self.critique_temperature = env_parsed(ENV_CRITIQUE_TEMPERATURE, self.critique_temperature);
        if let Ok(raw) = env::var(ENV_QUALITY_THRESHOLD) {
            self.quality_threshold = raw.parse().ok();
        }
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validate all fields; returns an error string naming the first problem.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_url.trim().is_empty() {
            return Err("base_url must not be empty".to_string());
        }
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(format!(
                "initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                self.initial_backoff_ms, self.max_backoff_ms
            ));
        }
        if self.max_output_tokens == 0 {
            return Err("max_output_tokens must be at least 1".to_string());
        }
        for (name, value) in [
            ("solution_temperature", self.solution_temperature),
            ("critique_temperature", self.critique_temperature),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{name} must be in [0, 1], got {value}"));
            }
        }
        if let Some(threshold) = self.quality_threshold {
            if !(0.0..=crate::types::SCORE_MAX).contains(&threshold) {
                return Err(format!(
                    "quality_threshold must be in [0, {}], got {threshold}",
                    crate::types::SCORE_MAX
                ));
            }
        }
        Ok(())
    }
}

//! Domain types shared across the pipeline.
//!
//! | Type                | Produced by        | Consumed by                    |
//! |---------------------|--------------------|--------------------------------|
//! | `RefinementRequest` | caller             | `RefinementPipeline`           |
//! | `ScoreReport`       | `Judge`            | `Critiquer`, `Refiner`, result |
//! | `IterationRecord`   | pipeline loop      | `RefinementResult`             |
//! | `RefinementResult`  | pipeline           | caller (serializes losslessly) |

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::RefineryError;

// ── Model identity ───────────────────────────────────────────────────────────

/// The closed set of model identifiers a request may name.
///
/// `TestModel` exists so deterministic in-process doubles can be selected by
/// configuration rather than by environment branching; the HTTP transport
/// refuses it instead of sending billable traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelId {
    #[serde(rename = "gemini-2.5-pro")]
    GeminiPro,
    #[serde(rename = "gemini-2.5-flash")]
    GeminiFlash,
    #[serde(rename = "gpt-4o")]
    Gpt4o,
    #[serde(rename = "test-model")]
    TestModel,
}

impl ModelId {
    /// The public identifier, as accepted by `FromStr` and emitted by serde.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GeminiPro => "gemini-2.5-pro",
            Self::GeminiFlash => "gemini-2.5-flash",
            Self::Gpt4o => "gpt-4o",
            Self::TestModel => "test-model",
        }
    }

    /// Upstream model slug on the OpenAI-compatible gateway.
    ///
    /// Returns `None` for `TestModel`, which must never reach the network.
    pub fn provider_slug(self) -> Option<&'static str> {
        match self {
            Self::GeminiPro => Some("google/gemini-2.5-pro"),
            Self::GeminiFlash => Some("google/gemini-2.5-flash"),
            Self::Gpt4o => Some("openai/gpt-4o"),
            Self::TestModel => None,
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelId {
    type Err = RefineryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gemini-2.5-pro" => Ok(Self::GeminiPro),
            "gemini-2.5-flash" => Ok(Self::GeminiFlash),
            "gpt-4o" => Ok(Self::Gpt4o),
            "test-model" => Ok(Self::TestModel),
            other => Err(RefineryError::InvalidRequest(format!(
                "unsupported model id: {other}"
            ))),
        }
    }
}

/// Opaque API credential. `Debug` redacts the value so request structs can be
/// logged without leaking secrets.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiCredential(String);

impl ApiCredential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiCredential(***)")
    }
}

// ── Request ──────────────────────────────────────────────────────────────────

/// Input to a refinement run. Immutable once the run starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementRequest {
    /// The original user prompt the answer was generated for.
    pub original_prompt: String,
    /// The existing AI-generated answer to improve.
    pub initial_output: String,
    /// Which model executes every judge/critique/refine call of the run.
    pub model_id: ModelId,
    /// Per-run provider credential.
    pub credential: ApiCredential,
    /// Number of judge→critique→refine passes (≥ 1).
    pub max_iterations: u32,
}

impl RefinementRequest {
    /// Check the request before any external call is made.
    ///
    /// # Errors
    ///
    /// Returns [`RefineryError::InvalidRequest`] naming the first offending
    /// field.
    pub fn validate(&self) -> Result<(), RefineryError> {
        if self.original_prompt.trim().is_empty() {
            return Err(RefineryError::InvalidRequest(
                "original_prompt must not be empty".into(),
            ));
        }
        if self.initial_output.trim().is_empty() {
            return Err(RefineryError::InvalidRequest(
                "initial_output must not be empty".into(),
            ));
        }
        if self.credential.is_empty() {
            return Err(RefineryError::InvalidRequest(
                "credential must not be empty".into(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(RefineryError::InvalidRequest(
                "max_iterations must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// ── Scoring ──────────────────────────────────────────────────────────────────

/// The fixed criterion set every solution is scored against, each on the
/// 0–10 scale.
pub const CRITERIA: [&str; 4] = ["novelty", "clarity", "feasibility", "correctness"];

/// Top of the scoring scale. Scores are `0.0..=SCORE_MAX`.
pub const SCORE_MAX: f64 = 10.0;

/// Structured evaluation of one candidate solution.
///
/// Invariant: `overall` is the arithmetic mean of the `details` values. The
/// only constructor enforcing it is [`ScoreReport::from_details`]; keep using
/// it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    /// Mean of `details`, 0–10.
    pub overall: f64,
    /// Per-criterion scores, 0–10, keyed by the [`CRITERIA`] names.
    pub details: BTreeMap<String, f64>,
}

impl ScoreReport {
    /// Build a report whose `overall` is the mean of `details`.
    pub fn from_details(details: BTreeMap<String, f64>) -> Self {
        let overall = if details.is_empty() {
            0.0
        } else {
            details.values().sum::<f64>() / details.len() as f64
        };
        Self { overall, details }
    }

    /// The `n` lowest-scoring criteria, weakest first. Used by the critiquer
    /// to focus feedback.
    pub fn weakest(&self, n: usize) -> Vec<(&str, f64)> {
        let mut ranked: Vec<(&str, f64)> = self
            .details
            .iter()
            .map(|(name, score)| (name.as_str(), *score))
            .collect();
        ranked.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(n);
        ranked
    }
}

// ── Run history ──────────────────────────────────────────────────────────────

/// One completed judge→critique→refine pass. Append-only; never mutated after
/// creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 1-based pass number.
    pub index: u32,
    /// The refined output this pass produced.
    pub solution: String,
    /// Critique of the pre-refinement solution that drove the pass.
    pub critique: String,
    /// Judge's evaluation of the pre-refinement solution.
    pub score: ScoreReport,
    /// When the pass completed.
    pub timestamp: DateTime<Utc>,
}

/// Final output of a refinement run. Owned solely by the invoking caller;
/// serializes losslessly through serde_json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementResult {
    /// The solution the run settled on.
    pub refined_output: String,
    /// Every completed pass, indices ascending.
    pub iterations: Vec<IterationRecord>,
    /// Score backing `refined_output` (the last record's on completion, the
    /// best record's on cancellation).
    pub scores: ScoreReport,
}

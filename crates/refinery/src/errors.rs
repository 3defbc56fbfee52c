//! Error taxonomy for the refinement pipeline, with retry classification.
//!
//! Every error surfaced by the pipeline is represented here. Callers can query
//! `is_transient()` without string matching; the retry loop in
//! [`crate::client::RetryingClient`] uses that classification as its single
//! source of truth.
//!
//! | Kind               | Transient | Origin                                  |
//! |--------------------|-----------|-----------------------------------------|
//! | InvalidRequest     | no        | request validation, unsupported model   |
//! | InvalidCredential  | no        | provider 401/403                        |
//! | RateLimited        | yes       | provider 429                            |
//! | ModelUnavailable   | yes       | provider 5xx                            |
//! | TransientNetwork   | yes       | connect/timeout, empty completion       |
//! | EvaluationParse    | no        | judge response failed schema parse twice|
//! | Cancelled          | no        | caller-initiated cancellation           |

use thiserror::Error;

/// Unified error type for all pipeline operations.
///
/// Only transient kinds are retried, and only inside the model client; every
/// other kind propagates unchanged to the pipeline controller, which aborts
/// the run rather than degrading it.
#[derive(Debug, Error)]
pub enum RefineryError {
    /// The request failed validation before any external call was made.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The provider rejected the credential (401/403).
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    /// The provider rate-limited the call (429).
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The provider returned a server-side error (5xx).
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// Network-level failure (connect error, timeout, empty completion).
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// The judge's structured response could not be parsed, even after the
    /// strict-format re-ask.
    #[error("evaluation parse error: {0}")]
    EvaluationParse(String),

    /// The run was cancelled by the caller.
    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl RefineryError {
    /// `true` if the model client may retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::ModelUnavailable(_) | Self::TransientNetwork(_)
        )
    }

    /// Stable machine-readable kind string for outer layers (HTTP mappers,
    /// log aggregation). Never changes once shipped.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidCredential(_) => "invalid_credential",
            Self::RateLimited(_) => "rate_limited",
            Self::ModelUnavailable(_) => "model_unavailable",
            Self::TransientNetwork(_) => "transient_network",
            Self::EvaluationParse(_) => "evaluation_parse",
            Self::Cancelled(_) => "cancelled",
        }
    }
}

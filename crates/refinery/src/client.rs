//! Model client seam: one retried call to the external generative model.
//!
//! The seam is split in two so every piece is testable without a network:
//!
//! | Piece             | Responsibility                                       |
//! |-------------------|------------------------------------------------------|
//! | [`ModelTransport`]| exactly one HTTP exchange, classified errors         |
//! | [`RetryingClient`]| bounded exponential backoff over any transport       |
//! | [`Sleeper`]       | injected delay, mocked in tests                      |
//!
//! Judge/Critiquer/Refiner only ever see [`ModelClient`]; whether it is the
//! real HTTP stack or a deterministic double is wiring, not branching.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::errors::RefineryError;
use crate::types::{ApiCredential, ModelId};

// ── Call descriptor ──────────────────────────────────────────────────────────

/// One model invocation: a purpose-specific prompt plus the run's model and
/// credential.
#[derive(Debug, Clone)]
pub struct ModelCall<'a> {
    pub prompt: &'a str,
    pub model: ModelId,
    pub credential: &'a ApiCredential,
    /// Sampling temperature for this call (judge/critique run cooler than
    /// refine).
    pub temperature: f64,
}

// ── Traits ───────────────────────────────────────────────────────────────────

/// The retried seam the pipeline components call through.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Issue one logical model call, retrying transient failures internally.
    async fn invoke(&self, call: &ModelCall<'_>) -> Result<String, RefineryError>;
}

/// A single un-retried exchange with the provider.
#[async_trait]
pub trait ModelTransport: Send + Sync {
    async fn send(&self, call: &ModelCall<'_>) -> Result<String, RefineryError>;
}

/// Injected delay so backoff schedules are assertable in tests.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

/// Production sleeper: suspends only the calling task.
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

// ── Retry policy ─────────────────────────────────────────────────────────────

/// Bounded exponential backoff: `base × 2^attempt`, capped.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts (first try + retries), ≥ 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.initial_backoff(),
            max_delay: config.max_backoff(),
        }
    }

    /// Delay before retry number `attempt` (0-based: the delay after the
    /// first failure is `delay_for(0)`).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

// ── Retrying client ──────────────────────────────────────────────────────────

/// Wraps any transport with the retry policy. Transient errors are retried
/// until the attempt budget runs out, then the last error is surfaced;
/// non-transient errors propagate immediately.
pub struct RetryingClient {
    transport: Arc<dyn ModelTransport>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryingClient {
    pub fn new(
        transport: Arc<dyn ModelTransport>,
        policy: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            transport,
            policy,
            sleeper,
        }
    }
}

#[async_trait]
impl ModelClient for RetryingClient {
    async fn invoke(&self, call: &ModelCall<'_>) -> Result<String, RefineryError> {
        let mut attempt: u32 = 0;
        loop {
            match self.transport.send(call).await {
                Ok(text) => {
                    debug!(model = %call.model, attempt = attempt + 1, "model call succeeded");
                    return Ok(text);
                }
                Err(err) if err.is_transient() => {
                    attempt += 1;
                    if attempt >= self.policy.max_attempts {
                        warn!(
                            model = %call.model,
                            attempts = attempt,
                            error = %err,
                            "model call failed after exhausting retries"
                        );
                        return Err(err);
                    }
                    let delay = self.policy.delay_for(attempt - 1);
                    warn!(
                        model = %call.model,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient model error, backing off"
                    );
                    self.sleeper.sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

// ── HTTP transport ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f64,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    content: String,
}

/// Real transport: one bearer-authenticated POST to an OpenAI-compatible
/// `/chat/completions` endpoint per `send`.
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
    max_tokens: u32,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_tokens: config.max_output_tokens,
            timeout: config.request_timeout(),
        }
    }

    fn classify_status(status: reqwest::StatusCode, body: &str) -> RefineryError {
        let detail = crate::prompts::truncate_chars(body, 200).to_string();
        match status.as_u16() {
            401 | 403 => RefineryError::InvalidCredential(format!("provider returned {status}")),
            429 => RefineryError::RateLimited(detail),
            500..=599 => RefineryError::ModelUnavailable(format!("provider returned {status}")),
            _ => RefineryError::InvalidRequest(format!("provider rejected request ({status}): {detail}")),
        }
    }

    fn classify_send_error(err: reqwest::Error) -> RefineryError {
        if err.is_timeout() {
            RefineryError::TransientNetwork("request timed out".to_string())
        } else if err.is_connect() {
            RefineryError::TransientNetwork(format!("connection failed: {err}"))
        } else {
            RefineryError::TransientNetwork(err.to_string())
        }
    }
}

#[async_trait]
impl ModelTransport for HttpTransport {
    async fn send(&self, call: &ModelCall<'_>) -> Result<String, RefineryError> {
        let slug = call.model.provider_slug().ok_or_else(|| {
            RefineryError::InvalidRequest(format!(
                "model {} cannot be sent to the network",
                call.model
            ))
        })?;

        let request = ChatRequest {
            model: slug,
            messages: vec![ChatMessage {
                role: "user",
                content: call.prompt,
            }],
            max_tokens: self.max_tokens,
            temperature: call.temperature,
            stream: false,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(self.timeout)
            .bearer_auth(call.credential.expose())
            .json(&request)
            .send()
            .await
            .map_err(Self::classify_send_error)?;

        let status = response.status();
        let body = response.text().await.map_err(Self::classify_send_error)?;

        if !status.is_success() {
            return Err(Self::classify_status(status, &body));
        }

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            RefineryError::TransientNetwork(format!("malformed completion response: {e}"))
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(RefineryError::TransientNetwork(
                "empty completion from provider".to_string(),
            ));
        }

        Ok(content)
    }
}

//! Judge: scores a candidate solution against the fixed criterion set.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::client::{ModelCall, ModelClient};
use crate::errors::RefineryError;
use crate::parse::parse_score_report;
use crate::prompts;
use crate::types::{ApiCredential, ModelId, ScoreReport};

/// Scores solutions via one retried model call per evaluation, with a single
/// strict-format re-ask when the response fails to parse.
pub struct Judge {
    client: Arc<dyn ModelClient>,
    temperature: f64,
}

impl Judge {
    pub fn new(client: Arc<dyn ModelClient>, temperature: f64) -> Self {
        Self {
            client,
            temperature,
        }
    }

    /// Evaluate `solution` against `original_prompt`.
    ///
    /// # Errors
    ///
    /// Propagates model-call errors unchanged; returns
    /// [`RefineryError::EvaluationParse`] only after the re-ask also fails to
    /// parse.
    pub async fn evaluate(
        &self,
        original_prompt: &str,
        solution: &str,
        model: ModelId,
        credential: &ApiCredential,
    ) -> Result<ScoreReport, RefineryError> {
        let prompt = prompts::evaluation_prompt(original_prompt, solution);
        let raw = self
            .client
            .invoke(&ModelCall {
                prompt: &prompt,
                model,
                credential,
                temperature: self.temperature,
            })
            .await?;

        match parse_score_report(&raw) {
            Ok(report) => {
                debug!(overall = report.overall, "evaluation parsed");
                Ok(report)
            }
            Err(first) => {
                warn!(error = %first, "judge response failed to parse, re-asking with strict format");
                let strict = format!("{prompt}\n\n{}", prompts::STRICT_JSON_REMINDER);
                let raw = self
                    .client
                    .invoke(&ModelCall {
                        prompt: &strict,
                        model,
                        credential,
                        temperature: self.temperature,
                    })
                    .await?;
                parse_score_report(&raw)
            }
        }
    }
}

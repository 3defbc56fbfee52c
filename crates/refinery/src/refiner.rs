//! Refiner: produces the next candidate solution from the previous one plus
//! its critique.

use std::sync::Arc;

use tracing::warn;

use crate::client::{ModelCall, ModelClient};
use crate::critic::{extract_improvements, format_improvements};
use crate::errors::RefineryError;
use crate::prompts;
use crate::types::{ApiCredential, ModelId};

pub struct Refiner {
    client: Arc<dyn ModelClient>,
    temperature: f64,
}

impl Refiner {
    pub fn new(client: Arc<dyn ModelClient>, temperature: f64) -> Self {
        Self {
            client,
            temperature,
        }
    }

    /// Produce an improved solution addressing `critique`.
    ///
    /// An empty refined output falls back to the previous solution with a
    /// warning; the pipeline's stagnation counter picks that up. Detecting
    /// stagnation itself is the controller's job, since only it sees
    /// consecutive passes.
    pub async fn refine(
        &self,
        original_prompt: &str,
        solution: &str,
        critique: &str,
        model: ModelId,
        credential: &ApiCredential,
    ) -> Result<String, RefineryError> {
        let improvements = extract_improvements(critique);
        let prompt = prompts::refine_prompt(
            original_prompt,
            solution,
            critique,
            &format_improvements(&improvements),
        );

        let raw = self
            .client
            .invoke(&ModelCall {
                prompt: &prompt,
                model,
                credential,
                temperature: self.temperature,
            })
            .await?;

        let text = raw.trim();
        if text.is_empty() {
            warn!("refiner returned empty output, keeping previous solution");
            return Ok(solution.to_string());
        }
        Ok(text.to_string())
    }
}

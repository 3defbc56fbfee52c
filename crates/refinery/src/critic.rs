//! Critiquer: actionable feedback on a scored solution, plus helpers for
//! pulling improvement bullets out of critique text for the refiner prompt.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::warn;

use crate::client::{ModelCall, ModelClient};
use crate::errors::RefineryError;
use crate::prompts;
use crate::types::{ApiCredential, ModelId, ScoreReport};

/// A bulleted (`-`, `*`) or numbered (`1.`, `2)`) list item.
static BULLET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*]|\d+[.)])\s+(.+)$").expect("BULLET_RE regex should compile")
});

/// Heading of the improvements section critiques are asked to emit.
static IMPROVEMENTS_HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:#+\s*)?(?:top\s+)?(?:improvements?|priorities)\b")
        .expect("IMPROVEMENTS_HEADING_RE regex should compile")
});

/// Any other ALL-CAPS section heading (e.g. `STRENGTHS:`), ending collection.
static SECTION_HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:#+\s*)?[A-Z][A-Z ]+:\s*$").expect("SECTION_HEADING_RE regex should compile")
});

/// Pull actionable improvement items out of a critique.
///
/// Prefers bullets under an `IMPROVEMENTS`/`PRIORITIES` heading; when the
/// critique has no such section, falls back to every bullet in the text.
pub fn extract_improvements(critique: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut in_section = false;

    for line in critique.lines() {
        if IMPROVEMENTS_HEADING_RE.is_match(line) {
            in_section = true;
            continue;
        }
        if !in_section {
            continue;
        }
        if let Some(cap) = BULLET_RE.captures(line) {
            items.push(cap[1].trim().to_string());
        } else if SECTION_HEADING_RE.is_match(line) {
            break;
        }
    }

    if items.is_empty() {
        for line in critique.lines() {
            if let Some(cap) = BULLET_RE.captures(line) {
                items.push(cap[1].trim().to_string());
            }
        }
    }

    items
}

/// Render improvements as the numbered list the refine prompt embeds.
pub fn format_improvements(improvements: &[String]) -> String {
    if improvements.is_empty() {
        return "No specific improvements were identified from the critique.".to_string();
    }
    improvements
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {item}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Produces free-text feedback referencing the lowest-scoring criteria.
pub struct Critiquer {
    client: Arc<dyn ModelClient>,
    temperature: f64,
}

impl Critiquer {
    pub fn new(client: Arc<dyn ModelClient>, temperature: f64) -> Self {
        Self {
            client,
            temperature,
        }
    }

    /// Critique `solution` in light of its score report.
    ///
    /// Empty or whitespace-only feedback is a recoverable defect: the generic
    /// fallback critique is substituted with a warning instead of failing the
    /// run.
    pub async fn critique(
        &self,
        original_prompt: &str,
        solution: &str,
        report: &ScoreReport,
        model: ModelId,
        credential: &ApiCredential,
    ) -> Result<String, RefineryError> {
        let prompt = prompts::critique_prompt(original_prompt, solution, report);
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
            warn!("critiquer returned empty feedback, substituting fallback critique");
            return Ok(prompts::FALLBACK_CRITIQUE.to_string());
        }
        Ok(text.to_string())
    }
}

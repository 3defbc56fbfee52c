//! Parsing of judge responses into [`ScoreReport`]s.
//!
//! Models wrap JSON in markdown fences or prose more often than not, so the
//! parser strips fences, pulls out the outermost `{...}` fragment, and only
//! then hands the text to serde. Every failure is an
//! [`RefineryError::EvaluationParse`] with enough detail to debug the raw
//! response.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::errors::RefineryError;
use crate::types::{ScoreReport, CRITERIA, SCORE_MAX};

/// Preview budget for raw responses quoted inside parse errors.
const ERROR_PREVIEW_CHARS: usize = 200;

/// Strip markdown code fences from a response.
pub(crate) fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = if let Some(rest) = trimmed.strip_prefix("```json") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest
    } else {
        trimmed
    };
    let clean = clean.strip_suffix("```").unwrap_or(clean);
    clean.trim()
}

/// Extract the outermost JSON object fragment, if any.
pub(crate) fn extract_json_fragment(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if start <= end {
        Some(&text[start..=end])
    } else {
        None
    }
}

/// Wire shape of the judge's evaluation. The model's own `overall_score` is
/// advisory; `overall` is always recomputed from the details.
#[derive(Deserialize)]
struct RawEvaluation {
    scores: BTreeMap<String, f64>,
}

fn preview(raw: &str) -> &str {
    crate::prompts::truncate_chars(raw, ERROR_PREVIEW_CHARS)
}

/// Parse a raw judge response into a [`ScoreReport`].
///
/// Requires every criterion in [`CRITERIA`] with a score in `0..=SCORE_MAX`;
/// unknown extra keys are ignored.
///
/// # Errors
///
/// [`RefineryError::EvaluationParse`] when no JSON object is present, the
/// object does not deserialize, a criterion is missing, or a score is out of
/// range.
pub fn parse_score_report(raw: &str) -> Result<ScoreReport, RefineryError> {
    let clean = strip_markdown_fences(raw);
    let fragment = extract_json_fragment(clean).ok_or_else(|| {
        RefineryError::EvaluationParse(format!(
            "no JSON object in judge response: {}",
            preview(clean)
        ))
    })?;

    let parsed: RawEvaluation = serde_json::from_str(fragment).map_err(|e| {
        RefineryError::EvaluationParse(format!(
            "judge response is not a valid evaluation object ({e}): {}",
            preview(fragment)
        ))
    })?;

    let mut details = BTreeMap::new();
    for criterion in CRITERIA {
        let score = *parsed.scores.get(criterion).ok_or_else(|| {
            RefineryError::EvaluationParse(format!("missing criterion score: {criterion}"))
        })?;
        if !(0.0..=SCORE_MAX).contains(&score) || !score.is_finite() {
            return Err(RefineryError::EvaluationParse(format!(
                "score for {criterion} out of range [0, {SCORE_MAX}]: {score}"
            )));
        }
        details.insert(criterion.to_string(), score);
    }

    Ok(ScoreReport::from_details(details))
}

//! Prompt templates for the judge, critiquer, and refiner roles.
//!
//! Prompt versioning: bump `PROMPT_VERSION` whenever template content changes.
//! The version is logged with every run so regressions in model behavior can
//! be traced back to the prompt revision that produced them.

use crate::types::{ScoreReport, CRITERIA, SCORE_MAX};

/// Prompt version. Bump on any template content change.
pub const PROMPT_VERSION: &str = "1.2.0";

/// Character budget for the candidate solution inside the evaluation prompt.
/// Keeps judge calls inside the completion window on long answers.
const EVAL_SOLUTION_LIMIT: usize = 2_000;

/// Substitute critique when the model returns empty/whitespace feedback.
pub const FALLBACK_CRITIQUE: &str = "No specific critique was produced. Re-examine the \
solution against the original prompt and improve clarity, correctness, and completeness.";

/// Appended to the evaluation prompt on the strict-format re-ask after a
/// parse failure.
pub const STRICT_JSON_REMINDER: &str = "REMINDER: Respond with ONLY the JSON object described \
above. No markdown fences, no commentary, no text before or after the JSON.";

/// Truncate to a character budget without splitting a code point.
pub(crate) fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Evaluation prompt: demands a JSON score object over the fixed criteria.
pub fn evaluation_prompt(original_prompt: &str, solution: &str) -> String {
    let scores_skeleton = CRITERIA
        .iter()
        .map(|c| format!("        \"{c}\": 0"))
        .collect::<Vec<_>>()
        .join(",\n");

    format!(
        "You are an expert judge evaluating a solution.\n\
        Your response MUST be a valid JSON object with the following structure:\n\
        {{\n    \"scores\": {{\n{scores_skeleton}\n    }},\n    \"overall_score\": 0\n}}\n\n\
        Rate each criterion from 0 to {SCORE_MAX}:\n\
        1. novelty: How original and innovative is the solution?\n\
        2. clarity: How clear and well-defined is the solution?\n\
        3. feasibility: How practical and implementable is the solution?\n\
        4. correctness: How accurate and sound is the solution?\n\n\
        PROMPT TO EVALUATE:\n{original_prompt}\n\n\
        SOLUTION TO EVALUATE:\n{truncated}\n\n\
        Provide your evaluation in valid JSON format as specified above.",
        truncated = truncate_chars(solution, EVAL_SOLUTION_LIMIT),
    )
}

/// Critique prompt: free-text actionable feedback, focused on the weakest
/// criteria from the score report.
pub fn critique_prompt(original_prompt: &str, solution: &str, report: &ScoreReport) -> String {
    let score_lines = report
        .details
        .iter()
        .map(|(name, score)| format!("- {name}: {score:.1}/{SCORE_MAX}"))
        .collect::<Vec<_>>()
        .join("\n");

    let focus = report
        .weakest(2)
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(" and ");

    format!(
        "You are a rigorous reviewer. Provide a detailed, actionable critique of the \
        solution below. Concentrate on the lowest-scoring criteria: {focus}.\n\n\
        ORIGINAL PROMPT:\n{original_prompt}\n\n\
        CURRENT SOLUTION:\n{solution}\n\n\
        EVALUATION:\n{score_lines}\n\n\
        Structure your critique as:\n\
        STRENGTHS:\n- ...\n\n\
        IMPROVEMENTS:\n- one concrete, actionable change per bullet\n\n\
        Be terse and specific; every improvement bullet must be implementable as written."
    )
}

/// Refine prompt: produce the next candidate from solution + critique.
pub fn refine_prompt(
    original_prompt: &str,
    solution: &str,
    critique: &str,
    improvements: &str,
) -> String {
    format!(
        "You are refining an answer to the prompt below. Produce an improved version that \
        addresses ALL of the critique. Respond with the improved answer only — no preamble, \
        no explanation of your changes.\n\n\
        ORIGINAL PROMPT:\n{original_prompt}\n\n\
        PREVIOUS ANSWER:\n{solution}\n\n\
        CRITIQUE:\n{critique}\n\n\
        IMPROVEMENT PRIORITIES:\n{improvements}"
    )
}

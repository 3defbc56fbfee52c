//! Recursive refinement pipeline: submit a prompt plus an existing
//! AI-generated answer, get back an iteratively improved answer after several
//! judge→critique→refine cycles against an external model API.
//!
//! ## Modules
//!
//! | Module     | Purpose                                              |
//! |------------|------------------------------------------------------|
//! | `errors`   | Unified error taxonomy with transient classification |
//! | `types`    | Request/record/score/result domain types             |
//! | `config`   | Env-first runtime configuration                      |
//! | `client`   | Model transport + retrying client seam               |
//! | `prompts`  | Versioned prompt templates per role                  |
//! | `judge`    | Structured scoring with one strict-format re-ask     |
//! | `critic`   | Feedback generation + improvement extraction         |
//! | `refiner`  | Next-candidate generation                            |
//! | `state`    | Run state machine with transition log                |
//! | `pipeline` | The controller driving one run end to end            |

pub mod client;
pub mod config;
pub mod critic;
pub mod errors;
pub mod judge;
mod parse;
pub mod pipeline;
pub mod prompts;
pub mod refiner;
pub mod state;
pub mod types;

// Convenience re-exports for callers wiring a pipeline.
pub use client::{
    HttpTransport, ModelCall, ModelClient, ModelTransport, RetryPolicy, RetryingClient, Sleeper,
    TokioSleeper,
};
pub use config::PipelineConfig;
pub use errors::RefineryError;
pub use pipeline::{RefinementPipeline, RunContext};
pub use types::{
    ApiCredential, IterationRecord, ModelId, RefinementRequest, RefinementResult, ScoreReport,
    CRITERIA, SCORE_MAX,
};

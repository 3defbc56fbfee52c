//! Run state machine with explicit states and legal transition guards.
//!
//! The pipeline controller calls `advance()` to move between states. Each
//! call validates the transition and records it in the transition log, so a
//! run's lifecycle is auditable after the fact.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// The set of run states.
///
/// Every run starts at `Initialized` and terminates at `Completed`, `Stopped`
/// (cancelled with usable history), or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Validating the request; no external call has been made.
    Initialized,
    /// Executing judge→critique→refine passes.
    Iterating,
    /// Normal exit at the iteration limit or quality threshold.
    Completed,
    /// Cancelled by the caller with at least one completed record.
    Stopped,
    /// Aborted on an unrecovered error; history is discarded.
    Failed,
}

impl RunState {
    /// Whether this is a terminal state (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initialized => write!(f, "Initialized"),
            Self::Iterating => write!(f, "Iterating"),
            Self::Completed => write!(f, "Completed"),
            Self::Stopped => write!(f, "Stopped"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Legal transitions:
/// ```text
/// Initialized → Iterating | Failed
/// Iterating   → Completed | Stopped | Failed
/// ```
fn is_legal_transition(from: RunState, to: RunState) -> bool {
    use RunState::*;

    // Any non-terminal state can transition to Failed.
    if to == Failed && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Initialized, Iterating) | (Iterating, Completed) | (Iterating, Stopped)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: RunState,
    pub to: RunState,
    /// Iteration number at the time of transition (0 before the loop).
    pub iteration: u32,
    /// Milliseconds since the state machine was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone)]
pub struct IllegalTransition {
    pub from: RunState,
    pub to: RunState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal state transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// Tracks the current state, enforces legal transitions, and keeps a complete
/// transition log for diagnostics.
pub struct RunStateMachine {
    current: RunState,
    iteration: u32,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl RunStateMachine {
    pub fn new() -> Self {
        Self {
            current: RunState::Initialized,
            iteration: 0,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> RunState {
        self.current
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Set the iteration counter (called by the pipeline loop).
    pub fn set_iteration(&mut self, iteration: u32) {
        self.iteration = iteration;
    }

    /// Attempt to advance to the next state.
    pub fn advance(&mut self, to: RunState, reason: Option<&str>) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        let record = TransitionRecord {
            from: self.current,
            to,
            iteration: self.iteration,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        };

        tracing::debug!(
            from = %self.current,
            to = %to,
            iteration = self.iteration,
            "run state transition"
        );

        self.transitions.push(record);
        self.current = to;
        Ok(())
    }

    /// Transition to `Failed` — always legal from non-terminal states.
    pub fn fail(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(RunState::Failed, Some(reason))
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }
}

impl Default for RunStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state() {
        let sm = RunStateMachine::new();
        assert_eq!(sm.current(), RunState::Initialized);
        assert!(!sm.is_terminal());
        assert!(sm.transitions().is_empty());
    }

    #[test]
    fn happy_path_transitions() {
        let mut sm = RunStateMachine::new();
        sm.advance(RunState::Iterating, Some("request validated"))
            .unwrap();
        sm.set_iteration(2);
        sm.advance(RunState::Completed, Some("iteration limit reached"))
            .unwrap();

        assert!(sm.is_terminal());
        assert_eq!(sm.transitions().len(), 2);
        assert_eq!(sm.transitions()[1].iteration, 2);
    }

    #[test]
    fn cancellation_path() {
        let mut sm = RunStateMachine::new();
        sm.advance(RunState::Iterating, None).unwrap();
        sm.advance(RunState::Stopped, Some("cancelled by caller"))
            .unwrap();
        assert_eq!(sm.current(), RunState::Stopped);
    }

    #[test]
    fn failure_from_any_non_terminal_state() {
        for state in [RunState::Initialized, RunState::Iterating] {
            let mut sm = RunStateMachine {
                current: state,
                iteration: 0,
                created_at: Instant::now(),
                transitions: Vec::new(),
            };
            assert!(sm.fail("test failure").is_ok());
            assert!(sm.is_terminal());
        }
    }

    #[test]
    fn cannot_skip_to_completed() {
        let mut sm = RunStateMachine::new();
        let err = sm.advance(RunState::Completed, None).unwrap_err();
        assert_eq!(err.from, RunState::Initialized);
        assert_eq!(err.to, RunState::Completed);
    }

    #[test]
    fn cannot_transition_from_terminal() {
        let mut sm = RunStateMachine::new();
        sm.advance(RunState::Iterating, None).unwrap();
        sm.advance(RunState::Completed, None).unwrap();

        assert!(sm.advance(RunState::Iterating, None).is_err());
        assert!(sm.fail("nope").is_err());
    }

    #[test]
    fn transition_record_serde_roundtrip() {
        let record = TransitionRecord {
            from: RunState::Iterating,
            to: RunState::Stopped,
            iteration: 3,
            elapsed_ms: 1234,
            reason: Some("cancelled by caller".into()),
        };

        let json = serde_json::to_string(&record).unwrap();
        let restored: TransitionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.from, RunState::Iterating);
        assert_eq!(restored.to, RunState::Stopped);
        assert_eq!(restored.reason.as_deref(), Some("cancelled by caller"));
    }
}

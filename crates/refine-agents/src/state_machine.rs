//! Pipeline state machine: explicit states and legal transition guards.
//!
//! Gives the refinement loop a typed state model so that:
//! 1. Every state transition is auditable and logged.
//! 2. Illegal transitions are rejected by `advance()` instead of silently
//!    corrupting the loop.
//! 3. The transcript can reconstruct the exact sequence of states.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// The set of pipeline states.
///
/// Every run starts at `Init` and terminates at `Success`, `Exhausted` or
/// `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Nothing generated yet.
    Init,
    /// Initial solution obtained.
    Solved,
    /// Sampling the verifier against the current solution.
    RobustnessChecking,
    /// Round reached consensus.
    Consensus,
    /// Round failed; a correction is due.
    NeedsCorrection,
    /// Corrected solution obtained.
    Corrected,
    /// Solution accepted (terminal).
    Success,
    /// Loop budget consumed without consensus (terminal).
    Exhausted,
    /// Fatal service error (terminal).
    Aborted,
}

impl PipelineStage {
    /// Whether this is a terminal state (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Exhausted | Self::Aborted)
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "Init"),
            Self::Solved => write!(f, "Solved"),
            Self::RobustnessChecking => write!(f, "RobustnessChecking"),
            Self::Consensus => write!(f, "Consensus"),
            Self::NeedsCorrection => write!(f, "NeedsCorrection"),
            Self::Corrected => write!(f, "Corrected"),
            Self::Success => write!(f, "Success"),
            Self::Exhausted => write!(f, "Exhausted"),
            Self::Aborted => write!(f, "Aborted"),
        }
    }
}

/// Legal transitions between pipeline states.
///
/// ```text
/// Init → Solved
/// Solved → RobustnessChecking | Exhausted
/// RobustnessChecking → Consensus | NeedsCorrection
/// Consensus → Success
/// NeedsCorrection → Corrected
/// Corrected → RobustnessChecking | Exhausted
/// ```
fn is_legal_transition(from: PipelineStage, to: PipelineStage) -> bool {
    use PipelineStage::*;

    // Any non-terminal state can abort.
    if to == Aborted && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Init, Solved)
            | (Solved, RobustnessChecking)
            | (Solved, Exhausted)
            | (RobustnessChecking, Consensus)
            | (RobustnessChecking, NeedsCorrection)
            | (Consensus, Success)
            | (NeedsCorrection, Corrected)
            | (Corrected, RobustnessChecking)
            | (Corrected, Exhausted)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: PipelineStage,
    pub to: PipelineStage,
    /// Refinement loop index at the time of transition (0 before the first round).
    pub loop_index: u32,
    /// Milliseconds since the state machine was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone)]
pub struct IllegalTransition {
    pub from: PipelineStage,
    pub to: PipelineStage,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal state transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// The pipeline state machine.
pub struct StateMachine {
    current: PipelineStage,
    loop_index: u32,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current: PipelineStage::Init,
            loop_index: 0,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> PipelineStage {
        self.current
    }

    pub fn loop_index(&self) -> u32 {
        self.loop_index
    }

    /// Set the loop counter (called by the controller's outer loop).
    pub fn set_loop_index(&mut self, loop_index: u32) {
        self.loop_index = loop_index;
    }

    /// Attempt to advance to the next state.
    ///
    /// Returns the recorded transition, or `IllegalTransition` if the edge
    /// is not in the state graph.
    pub fn advance(
        &mut self,
        to: PipelineStage,
        reason: Option<&str>,
    ) -> Result<&TransitionRecord, IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        tracing::debug!(
            from = %self.current,
            to = %to,
            loop_index = self.loop_index,
            "State transition"
        );

        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            loop_index: self.loop_index,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(&self.transitions[self.transitions.len() - 1])
    }

    /// Transition to `Aborted` from any non-terminal state.
    pub fn abort(&mut self, reason: &str) -> Result<&TransitionRecord, IllegalTransition> {
        self.advance(PipelineStage::Aborted, Some(reason))
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn into_transitions(self) -> Vec<TransitionRecord> {
        self.transitions
    }

    /// One-line summary of the path taken.
    pub fn summary(&self) -> String {
        let mut path = vec![PipelineStage::Init.to_string()];
        path.extend(self.transitions.iter().map(|t| t.to.to_string()));
        format!(
            "{} ({}ms, {} transitions)",
            path.join(" → "),
            self.created_at.elapsed().as_millis(),
            self.transitions.len()
        )
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let sm = StateMachine::new();
        assert_eq!(sm.current(), PipelineStage::Init);
        assert!(!sm.is_terminal());
        assert!(sm.transitions().is_empty());
    }

    #[test]
    fn test_immediate_success_path() {
        let mut sm = StateMachine::new();
        sm.advance(PipelineStage::Solved, None).unwrap();
        sm.set_loop_index(1);
        sm.advance(PipelineStage::RobustnessChecking, None).unwrap();
        sm.advance(PipelineStage::Consensus, Some("5/5 approved"))
            .unwrap();
        sm.advance(PipelineStage::Success, None).unwrap();

        assert!(sm.is_terminal());
        assert_eq!(sm.transitions().len(), 4);
        assert_eq!(sm.transitions()[2].loop_index, 1);
    }

    #[test]
    fn test_correction_cycle() {
        let mut sm = StateMachine::new();
        sm.advance(PipelineStage::Solved, None).unwrap();
        sm.set_loop_index(1);
        sm.advance(PipelineStage::RobustnessChecking, None).unwrap();
        sm.advance(PipelineStage::NeedsCorrection, Some("rejected at check 1"))
            .unwrap();
        sm.advance(PipelineStage::Corrected, None).unwrap();
        sm.set_loop_index(2);
        sm.advance(PipelineStage::RobustnessChecking, None).unwrap();
        sm.advance(PipelineStage::Consensus, None).unwrap();
        sm.advance(PipelineStage::Success, None).unwrap();
        assert_eq!(sm.current(), PipelineStage::Success);
    }

    #[test]
    fn test_exhaustion_after_correction() {
        let mut sm = StateMachine::new();
        sm.advance(PipelineStage::Solved, None).unwrap();
        sm.advance(PipelineStage::RobustnessChecking, None).unwrap();
        sm.advance(PipelineStage::NeedsCorrection, None).unwrap();
        sm.advance(PipelineStage::Corrected, None).unwrap();
        sm.advance(PipelineStage::Exhausted, Some("budget consumed"))
            .unwrap();
        assert!(sm.is_terminal());
    }

    #[test]
    fn test_abort_from_any_non_terminal_state() {
        for state in [
            PipelineStage::Init,
            PipelineStage::Solved,
            PipelineStage::RobustnessChecking,
            PipelineStage::Consensus,
            PipelineStage::NeedsCorrection,
            PipelineStage::Corrected,
        ] {
            let mut sm = StateMachine {
                current: state,
                loop_index: 0,
                created_at: Instant::now(),
                transitions: Vec::new(),
            };
            assert!(sm.abort("service unavailable").is_ok());
            assert_eq!(sm.current(), PipelineStage::Aborted);
        }
    }

    #[test]
    fn test_cannot_leave_terminal_state() {
        let mut sm = StateMachine::new();
        sm.abort("no response").unwrap();
        let err = sm.advance(PipelineStage::Solved, None).unwrap_err();
        assert_eq!(err.from, PipelineStage::Aborted);
        assert_eq!(err.to, PipelineStage::Solved);
        assert!(sm.abort("again").is_err());
    }

    #[test]
    fn test_cannot_skip_verification() {
        let mut sm = StateMachine::new();
        sm.advance(PipelineStage::Solved, None).unwrap();
        assert!(sm.advance(PipelineStage::Success, None).is_err());
        assert!(sm.advance(PipelineStage::Consensus, None).is_err());
    }

    #[test]
    fn test_correction_requires_failed_round() {
        let mut sm = StateMachine::new();
        sm.advance(PipelineStage::Solved, None).unwrap();
        assert!(sm.advance(PipelineStage::Corrected, None).is_err());
    }

    #[test]
    fn test_transition_record_serde_roundtrip() {
        let record = TransitionRecord {
            from: PipelineStage::RobustnessChecking,
            to: PipelineStage::NeedsCorrection,
            loop_index: 3,
            elapsed_ms: 12345,
            reason: Some("rejected at check 2".into()),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"robustness_checking\""));
        let restored: TransitionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.to, PipelineStage::NeedsCorrection);
        assert_eq!(restored.loop_index, 3);
    }

    #[test]
    fn test_summary() {
        let mut sm = StateMachine::new();
        sm.advance(PipelineStage::Solved, None).unwrap();
        sm.abort("test").unwrap();
        let summary = sm.summary();
        assert!(summary.starts_with("Init → Solved → Aborted"));
        assert!(summary.contains("2 transitions"));
    }
}

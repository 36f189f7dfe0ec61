//! Step events emitted by the controller.
//!
//! The controller does no I/O of its own. Every externally obtained
//! response, round result and state transition is published on an unbounded
//! channel; persistence adapters (the transcript logger) consume it on their
//! own task.
//!
//! ```text
//! PipelineController ──emit──▶ StepEmitter ──mpsc──▶ TranscriptLogger
//! ```

use chrono::{DateTime, Utc};
use coordination::RoundOutcome;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::state_machine::TransitionRecord;

/// Which pipeline step produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    InitialSolve,
    Verification,
    Correction,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InitialSolve => "solution",
            Self::Verification => "verification",
            Self::Correction => "correction",
        }
    }
}

/// Everything the controller reports while running.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepEvent {
    /// Raw text returned by the reasoning service.
    Response {
        step: Step,
        loop_index: u32,
        /// 1-based verification sample within the round.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sample: Option<u32>,
        text: String,
        timestamp: DateTime<Utc>,
    },

    /// A reasoning call returned an error instead of text.
    CallFailed {
        step: Step,
        loop_index: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sample: Option<u32>,
        kind: String,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// A robustness round finished.
    RoundCompleted {
        loop_index: u32,
        outcome: RoundOutcome,
        timestamp: DateTime<Utc>,
    },

    /// The state machine moved.
    Transition(TransitionRecord),
}

impl StepEvent {
    pub fn response(step: Step, loop_index: u32, sample: Option<u32>, text: &str) -> Self {
        Self::Response {
            step,
            loop_index,
            sample,
            text: text.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Event type as a string (for logging).
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Response { .. } => "response",
            Self::CallFailed { .. } => "call_failed",
            Self::RoundCompleted { .. } => "round_completed",
            Self::Transition(_) => "transition",
        }
    }
}

/// Create a connected emitter/receiver pair.
pub fn channel() -> (StepEmitter, mpsc::UnboundedReceiver<StepEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
        StepEmitter {
            sender: Some(sender),
        },
        receiver,
    )
}

/// Sending half held by the controller.
#[derive(Debug, Clone, Default)]
pub struct StepEmitter {
    sender: Option<mpsc::UnboundedSender<StepEvent>>,
}

impl StepEmitter {
    /// Emitter that drops every event.
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    pub fn emit(&self, event: StepEvent) {
        let event_type = event.event_type();
        if let Some(sender) = &self.sender {
            // A closed receiver only means nobody is persisting.
            if sender.send(event).is_err() {
                debug!(event_type, "Step event dropped (receiver closed)");
            }
        }
    }
}

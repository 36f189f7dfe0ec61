//! Error taxonomy for reasoning-service calls and pipeline setup.
//!
//! | Error          | During solve / correct | During verification          |
//! |----------------|------------------------|------------------------------|
//! | Unavailable    | abort                  | abort                        |
//! | NoResponse     | abort                  | round failure                |
//! | RateLimited    | abort (with warning)   | round failure (with warning) |
//! | Failed         | abort                  | round failure                |

use thiserror::Error;

use crate::state_machine::IllegalTransition;

/// Failure of a single reasoning-service call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReasoningError {
    /// Executable or service could not be reached. Configuration problem.
    #[error("reasoning service unavailable: {0}")]
    Unavailable(String),

    /// Timed out or returned an empty result.
    #[error("no response: {0}")]
    NoResponse(String),

    /// A rate-limit marker was found in the service output.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Service completed with a non-zero status.
    #[error("reasoning call failed (status {code:?}): {diagnostic}")]
    Failed {
        code: Option<i32>,
        diagnostic: String,
    },
}

impl ReasoningError {
    /// Errors that stop the pipeline no matter which step raised them.
    pub fn is_fatal_everywhere(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }

    /// Short label for logs and transcripts.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::NoResponse(_) => "no_response",
            Self::RateLimited(_) => "rate_limited",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Errors raised by the pipeline itself rather than the service.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),
}

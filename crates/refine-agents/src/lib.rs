//! Solve → consensus-verify → correct controller over a reasoning CLI.
//!
//! A solver role drafts a solution, a verifier role is sampled until it
//! approves the same solution N times in a row, and any rejection sends the
//! verifier's report back to the solver for a correction. The loop is bounded
//! by a refinement budget.

pub mod app;
pub mod artifact;
pub mod cli_port;
pub mod config;
pub mod context;
pub mod errors;
pub mod events;
pub mod orchestrator;
pub mod port;
pub mod prompts;
pub mod state_machine;
pub mod transcript;

pub use app::{run_pipeline, RunSummary};
pub use config::{Configuration, RefineConfig};
pub use errors::{PipelineError, ReasoningError};
pub use orchestrator::{PipelineController, PipelineOutcome, PipelineReport, Solution};
pub use port::ReasoningPort;

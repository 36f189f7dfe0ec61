//! Deterministic decision policy for the refinement loop.
//!
//! This crate holds the parts of the pipeline that never touch I/O:
//! - `verdict`: map a verifier response to `Approved` / `Rejected` / `Unparseable`
//! - `consensus`: reduce a round of verifier samples into a `RoundOutcome`
//!
//! The agent crate drives the external service and feeds raw responses here.

pub mod consensus;
pub mod verdict;

pub use consensus::{ConsensusPolicy, RoundOutcome, RoundProgress, RoundTally};
pub use verdict::{Verdict, VerdictMarkers, VerdictParser, VerificationReport};

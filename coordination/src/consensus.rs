//! Consensus policy for robustness rounds.
//!
//! A round samples the verifier repeatedly against one unchanged candidate.
//! It reaches consensus only when `required_passes` samples in a row are
//! `Approved`. The first non-approved sample ends the round; passes that came
//! before it are discarded. This is a strict unanimity rule, not a majority
//! vote.
//!
//! ```text
//! sequential:  A A A R      → failed at sample 4, pass_count = 3
//!              A A A A A    → consensus, pass_count = 5
//! parallel:    [A, R, A, A, A] → failed, failing report = sample 2
//! ```

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::verdict::VerificationReport;

/// Summary of one robustness round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundOutcome {
    pub consensus_reached: bool,
    /// Approved samples before the round ended. Always `<= required_passes`.
    pub pass_count: u32,
    /// The report that ended the round, if it failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failing_report: Option<VerificationReport>,
}

/// What the caller should do after feeding a sample to a [`RoundTally`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundProgress {
    /// Keep sampling.
    Continue,
    /// All required samples approved.
    Reached,
    /// A non-approved sample ended the round.
    Failed,
}

/// Round acceptance rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusPolicy {
    required_passes: u32,
}

impl ConsensusPolicy {
    pub fn new(required_passes: u32) -> Self {
        Self { required_passes }
    }

    pub fn required_passes(&self) -> u32 {
        self.required_passes
    }

    /// Start a sequential tally for a new round.
    pub fn tally(&self) -> RoundTally {
        RoundTally {
            required: self.required_passes,
            pass_count: 0,
            failing: None,
        }
    }

    /// Reduce the samples of a concurrently executed round.
    ///
    /// `samples[i]` is the report for sample `i`, or `None` if that call never
    /// completed. Completion order is irrelevant: any missing or non-approved
    /// sample fails the round, and the failing report is the one with the
    /// lowest index. `pass_count` counts the approved samples preceding it.
    pub fn reduce(&self, samples: Vec<Option<VerificationReport>>) -> RoundOutcome {
        let mut tally = self.tally();
        let received = samples.len();

        for (index, sample) in samples.into_iter().enumerate() {
            let report = sample.unwrap_or_else(|| {
                VerificationReport::unavailable(format!(
                    "Verification sample {} did not complete.",
                    index + 1
                ))
            });
            if tally.observe(report) != RoundProgress::Continue {
                break;
            }
        }

        // Fewer samples than required can never be consensus.
        if !tally.is_finished() {
            debug!(
                received,
                required = self.required_passes,
                "parallel round short of samples"
            );
            tally.failing = Some(VerificationReport::unavailable(format!(
                "Only {received} of {} verification samples were collected.",
                self.required_passes
            )));
        }

        tally.into_outcome()
    }
}

/// Sequential accumulator for one round.
#[derive(Debug, Clone)]
pub struct RoundTally {
    required: u32,
    pass_count: u32,
    failing: Option<VerificationReport>,
}

impl RoundTally {
    /// Record the next sample. Samples after the round finished are ignored.
    pub fn observe(&mut self, report: VerificationReport) -> RoundProgress {
        if let Some(progress) = self.finished_progress() {
            return progress;
        }

        if report.is_approved() {
            self.pass_count += 1;
        } else {
            self.failing = Some(report);
        }

        self.finished_progress().unwrap_or(RoundProgress::Continue)
    }

    pub fn pass_count(&self) -> u32 {
        self.pass_count
    }

    pub fn required(&self) -> u32 {
        self.required
    }

    pub fn is_finished(&self) -> bool {
        self.finished_progress().is_some()
    }

    fn finished_progress(&self) -> Option<RoundProgress> {
        if self.failing.is_some() {
            Some(RoundProgress::Failed)
        } else if self.pass_count >= self.required {
            Some(RoundProgress::Reached)
        } else {
            None
        }
    }

    pub fn into_outcome(self) -> RoundOutcome {
        RoundOutcome {
            consensus_reached: self.failing.is_none() && self.pass_count == self.required,
            pass_count: self.pass_count,
            last_failing_report: self.failing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verdict::parse;

    fn approved() -> VerificationReport {
        parse("[VERDICT: APPROVED]")
    }

    fn rejected(note: &str) -> VerificationReport {
        parse(&format!("[VERDICT: REJECTED] {note}"))
    }

    #[test]
    fn test_all_approved_reaches_consensus() {
        let policy = ConsensusPolicy::new(3);
        let mut tally = policy.tally();
        assert_eq!(tally.observe(approved()), RoundProgress::Continue);
        assert_eq!(tally.observe(approved()), RoundProgress::Continue);
        assert_eq!(tally.observe(approved()), RoundProgress::Reached);

        let outcome = tally.into_outcome();
        assert!(outcome.consensus_reached);
        assert_eq!(outcome.pass_count, 3);
        assert!(outcome.last_failing_report.is_none());
    }

    #[test]
    fn test_failure_on_last_sample_discards_passes() {
        let policy = ConsensusPolicy::new(3);
        let mut tally = policy.tally();
        tally.observe(approved());
        tally.observe(approved());
        assert_eq!(tally.observe(rejected("late")), RoundProgress::Failed);

        let outcome = tally.into_outcome();
        assert!(!outcome.consensus_reached);
        assert_eq!(outcome.pass_count, 2);
        assert!(outcome
            .last_failing_report
            .unwrap()
            .raw_text
            .contains("late"));
    }

    #[test]
    fn test_unparseable_counts_as_failure() {
        let mut tally = ConsensusPolicy::new(2).tally();
        assert_eq!(tally.observe(parse("hmm")), RoundProgress::Failed);
        assert_eq!(tally.pass_count(), 0);
    }

    #[test]
    fn test_observe_after_finish_is_ignored() {
        let mut tally = ConsensusPolicy::new(2).tally();
        tally.observe(rejected("first"));
        assert_eq!(tally.observe(approved()), RoundProgress::Failed);
        assert_eq!(tally.observe(approved()), RoundProgress::Failed);
        let outcome = tally.into_outcome();
        assert_eq!(outcome.pass_count, 0);
        let report = outcome.last_failing_report.unwrap();
        assert!(report.raw_text.contains("first"));
    }

    #[test]
    fn test_pass_count_never_exceeds_required() {
        let mut tally = ConsensusPolicy::new(1).tally();
        tally.observe(approved());
        tally.observe(approved());
        let outcome = tally.into_outcome();
        assert_eq!(outcome.pass_count, 1);
        assert!(outcome.consensus_reached);
    }

    #[test]
    fn test_reduce_all_approved() {
        let policy = ConsensusPolicy::new(4);
        let outcome = policy.reduce(vec![Some(approved()); 4]);
        assert!(outcome.consensus_reached);
        assert_eq!(outcome.pass_count, 4);
    }

    #[test]
    fn test_reduce_picks_lowest_index_failure() {
        let policy = ConsensusPolicy::new(4);
        let outcome = policy.reduce(vec![
            Some(approved()),
            Some(rejected("second")),
            Some(approved()),
            Some(rejected("fourth")),
        ]);
        assert!(!outcome.consensus_reached);
        assert_eq!(outcome.pass_count, 1);
        assert!(outcome
            .last_failing_report
            .unwrap()
            .raw_text
            .contains("second"));
    }

    #[test]
    fn test_reduce_missing_sample_fails_round() {
        let policy = ConsensusPolicy::new(3);
        let outcome = policy.reduce(vec![Some(approved()), None, Some(approved())]);
        assert!(!outcome.consensus_reached);
        assert_eq!(outcome.pass_count, 1);
        assert!(outcome
            .last_failing_report
            .unwrap()
            .raw_text
            .contains("did not complete"));
    }

    #[test]
    fn test_reduce_short_sample_set_fails_round() {
        let policy = ConsensusPolicy::new(3);
        let outcome = policy.reduce(vec![Some(approved()), Some(approved())]);
        assert!(!outcome.consensus_reached);
        assert_eq!(outcome.pass_count, 2);
        assert!(outcome.last_failing_report.is_some());
    }

    #[test]
    fn test_round_outcome_serde_roundtrip() {
        let outcome = RoundOutcome {
            consensus_reached: false,
            pass_count: 2,
            last_failing_report: Some(rejected("x")),
        };
        let json = serde_json::to_string(&outcome).unwrap();
        let restored: RoundOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, outcome);
    }
}

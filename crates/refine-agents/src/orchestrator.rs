//! Pipeline controller: solve → consensus-verify → correct.
//!
//! ```text
//! Init ─solve─▶ Solved ─▶ RobustnessChecking ─▶ Consensus ─▶ Success
//!                              ▲        │
//!                              │        ▼
//!                         Corrected ◀─ NeedsCorrection
//!                              │
//!                              └─(budget consumed)─▶ Exhausted
//! any non-terminal state ─(fatal service error)─▶ Aborted
//! ```
//!
//! The controller owns all pipeline state and performs no I/O besides the
//! reasoning calls. Responses, round results and transitions are published
//! as [`StepEvent`]s for persistence elsewhere.
//!
//! ## Failure policy
//!
//! - Solve / correction: any service error aborts the run.
//! - Verification: `Unavailable` aborts; other errors become an
//!   `Unparseable` report, which fails the round and triggers a correction.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use coordination::{ConsensusPolicy, RoundOutcome, RoundProgress, VerdictParser, VerificationReport};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::Configuration;
use crate::errors::{PipelineError, ReasoningError};
use crate::events::{Step, StepEmitter, StepEvent};
use crate::port::ReasoningPort;
use crate::prompts::PromptAssembler;
use crate::state_machine::{IllegalTransition, PipelineStage, StateMachine, TransitionRecord};

/// Where a solution came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolutionOrigin {
    Initial,
    /// Correction of the solution with this version.
    CorrectionOf(u32),
}

impl fmt::Display for SolutionOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::CorrectionOf(v) => write!(f, "correction-of-{v}"),
        }
    }
}

/// A candidate solution. Replaced, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Solution {
    pub text: String,
    pub origin: SolutionOrigin,
    /// 1 for the initial solution, +1 per correction.
    pub version: u32,
}

impl Solution {
    fn initial(text: String) -> Self {
        Self {
            text,
            origin: SolutionOrigin::Initial,
            version: 1,
        }
    }

    fn corrected(&self, text: String) -> Self {
        Self {
            text,
            origin: SolutionOrigin::CorrectionOf(self.version),
            version: self.version + 1,
        }
    }
}

/// One robustness round and the solution it judged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundRecord {
    pub loop_index: u32,
    pub solution: Solution,
    pub outcome: RoundOutcome,
}

/// Mutable state of a run. Lives only inside [`PipelineController::run`].
#[derive(Debug)]
pub struct PipelineState {
    pub current_solution: Solution,
    pub refinement_loop_index: u32,
    pub history: Vec<RoundRecord>,
}

impl PipelineState {
    fn new(initial: Solution) -> Self {
        Self {
            current_solution: initial,
            refinement_loop_index: 0,
            history: Vec::new(),
        }
    }
}

/// Terminal result of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// A round reached consensus; `solution` is the artifact.
    Success { solution: Solution },
    /// Loop budget consumed without consensus. No artifact.
    Exhausted,
    /// A fatal service error stopped the run. No artifact.
    Aborted { step: Step, error: ReasoningError },
}

/// Number of reasoning calls issued, per step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallCounts {
    pub solve: u32,
    pub verification: u32,
    pub correction: u32,
}

impl CallCounts {
    pub fn total(&self) -> u32 {
        self.solve + self.verification + self.correction
    }
}

/// Everything a finished run hands back.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub outcome: PipelineOutcome,
    pub history: Vec<RoundRecord>,
    pub transitions: Vec<TransitionRecord>,
    pub calls: CallCounts,
}

impl PipelineReport {
    /// The accepted solution, only on success.
    pub fn final_solution(&self) -> Option<&Solution> {
        match &self.outcome {
            PipelineOutcome::Success { solution } => Some(solution),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, PipelineOutcome::Success { .. })
    }
}

/// Why the loop stopped early.
enum Halt {
    Abort { step: Step, error: ReasoningError },
    Internal(PipelineError),
}

impl From<IllegalTransition> for Halt {
    fn from(e: IllegalTransition) -> Self {
        Self::Internal(e.into())
    }
}

/// Drives one problem through the refinement loop.
pub struct PipelineController {
    config: Configuration,
    port: Arc<dyn ReasoningPort>,
    prompts: PromptAssembler,
    parser: VerdictParser,
    policy: ConsensusPolicy,
    events: StepEmitter,
    sm: StateMachine,
    calls: CallCounts,
}

impl PipelineController {
    pub fn new(
        config: Configuration,
        port: Arc<dyn ReasoningPort>,
        prompts: PromptAssembler,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let policy = ConsensusPolicy::new(config.required_consecutive_passes);
        Ok(Self {
            config,
            port,
            prompts,
            parser: VerdictParser::new(),
            policy,
            events: StepEmitter::disabled(),
            sm: StateMachine::new(),
            calls: CallCounts::default(),
        })
    }

    /// Publish step events to `events`.
    pub fn with_events(mut self, events: StepEmitter) -> Self {
        self.events = events;
        self
    }

    /// Replace the verdict parser (e.g. to disable the heuristic layer).
    pub fn with_parser(mut self, parser: VerdictParser) -> Self {
        self.parser = parser;
        self
    }

    /// Run to completion. Consumes the controller; dropping it closes the
    /// event channel.
    ///
    /// Service failures are reported through [`PipelineOutcome::Aborted`];
    /// `Err` is reserved for internal state-machine violations.
    pub async fn run(mut self, problem: &str) -> Result<PipelineReport, PipelineError> {
        info!(
            problem = %preview(problem, 50),
            max_loops = self.config.max_refinement_loops,
            required_passes = self.config.required_consecutive_passes,
            "Starting verification pipeline"
        );

        let initial = match self.generate_initial(problem).await {
            Ok(solution) => solution,
            Err(halt) => return self.finish_halted(halt, Vec::new()),
        };

        let mut state = PipelineState::new(initial);
        match self.refine(problem, &mut state).await {
            Ok(outcome) => Ok(self.finish(outcome, state.history)),
            Err(halt) => self.finish_halted(halt, state.history),
        }
    }

    async fn refine(
        &mut self,
        problem: &str,
        state: &mut PipelineState,
    ) -> Result<PipelineOutcome, Halt> {
        let max_loops = self.config.max_refinement_loops;
        let required = self.config.required_consecutive_passes;

        for loop_index in 1..=max_loops {
            state.refinement_loop_index = loop_index;
            self.sm.set_loop_index(loop_index);
            info!(
                loop_index,
                max_loops,
                version = state.current_solution.version,
                origin = %state.current_solution.origin,
                "Refinement loop {loop_index}/{max_loops} (need {required} passes)"
            );
            self.transition(PipelineStage::RobustnessChecking, None)?;

            let outcome = self
                .run_robustness_round(problem, &state.current_solution, loop_index)
                .await?;

            self.events.emit(StepEvent::RoundCompleted {
                loop_index,
                outcome: outcome.clone(),
                timestamp: Utc::now(),
            });
            state.history.push(RoundRecord {
                loop_index,
                solution: state.current_solution.clone(),
                outcome: outcome.clone(),
            });

            if outcome.consensus_reached {
                let reason = format!("{}/{required} approved", outcome.pass_count);
                self.transition(PipelineStage::Consensus, Some(&reason))?;
                self.transition(PipelineStage::Success, None)?;
                info!(
                    version = state.current_solution.version,
                    "SUCCESS: solution passed robust verification"
                );
                return Ok(PipelineOutcome::Success {
                    solution: state.current_solution.clone(),
                });
            }

            let reason = format!("failed at check {}", outcome.pass_count + 1);
            self.transition(PipelineStage::NeedsCorrection, Some(&reason))?;
            warn!(
                loop_index,
                passes = outcome.pass_count,
                "Solution failed verification, attempting correction"
            );

            let report = outcome.last_failing_report.unwrap_or_else(|| {
                VerificationReport::unavailable("Verification round failed without a report.")
            });
            state.current_solution = self
                .correct(problem, &state.current_solution, &report, loop_index)
                .await?;
        }

        self.transition(PipelineStage::Exhausted, Some("budget consumed"))?;
        warn!(
            max_loops,
            "FAILURE: maximum refinement loops reached without robust success"
        );
        Ok(PipelineOutcome::Exhausted)
    }

    /// Obtain the initial candidate. Any service error is fatal.
    async fn generate_initial(&mut self, problem: &str) -> Result<Solution, Halt> {
        info!(role = %self.config.solver_role, "Step 1: initial solution generation");
        let prompt = self.prompts.solve(problem);
        self.calls.solve += 1;

        let text = self.invoke_solver(&prompt, Step::InitialSolve, 0).await?;
        let solution = Solution::initial(text);
        self.transition(PipelineStage::Solved, None)?;
        Ok(solution)
    }

    /// Sample the verifier until the round reaches consensus or fails.
    async fn run_robustness_round(
        &mut self,
        problem: &str,
        solution: &Solution,
        loop_index: u32,
    ) -> Result<RoundOutcome, Halt> {
        let prompt = self.prompts.verify(problem, &solution.text);
        if self.config.parallel_verification {
            return self.run_parallel_round(prompt, loop_index).await;
        }

        let required = self.policy.required_passes();
        let mut tally = self.policy.tally();

        for sample in 1..=required {
            info!(role = %self.config.verifier_role, sample, "Step 3: verification");
            self.calls.verification += 1;
            let result = self.port.invoke(&prompt, &self.config.verifier_role).await;
            let report = self.interpret_verification(result, loop_index, sample)?;

            match tally.observe(report) {
                RoundProgress::Continue | RoundProgress::Reached => {
                    info!("Pass {}/{required}", tally.pass_count());
                }
                RoundProgress::Failed => {
                    info!("Failed at check {sample}");
                    break;
                }
            }
            if tally.is_finished() {
                break;
            }
        }

        Ok(tally.into_outcome())
    }

    /// Issue every sample of the round at once and reduce the results.
    ///
    /// Consensus still needs every sample approved; completion order does not
    /// matter and no verdict is drawn until all calls have returned.
    async fn run_parallel_round(
        &mut self,
        prompt: String,
        loop_index: u32,
    ) -> Result<RoundOutcome, Halt> {
        let required = self.policy.required_passes();
        let prompt = Arc::new(prompt);
        let mut join_set = JoinSet::new();

        info!(
            role = %self.config.verifier_role,
            samples = required,
            "Step 3: verification (parallel)"
        );
        for sample in 1..=required {
            let port = Arc::clone(&self.port);
            let prompt = Arc::clone(&prompt);
            let role = self.config.verifier_role.clone();
            join_set.spawn(async move { (sample, port.invoke(&prompt, &role).await) });
        }
        self.calls.verification += required;

        let mut samples: Vec<Option<VerificationReport>> = vec![None; required as usize];
        let mut fatal = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((sample, result)) => {
                    match self.interpret_verification(result, loop_index, sample) {
                        Ok(report) => samples[(sample - 1) as usize] = Some(report),
                        Err(halt) => {
                            fatal.get_or_insert(halt);
                        }
                    }
                }
                Err(e) => warn!(error = %e, "verification task panicked"),
            }
        }

        if let Some(halt) = fatal {
            return Err(halt);
        }

        let outcome = self.policy.reduce(samples);
        if outcome.consensus_reached {
            info!("Pass {}/{required}", outcome.pass_count);
        } else {
            info!("Failed at check {}", outcome.pass_count + 1);
        }
        Ok(outcome)
    }

    /// Turn one verification call result into a report.
    fn interpret_verification(
        &self,
        result: Result<String, ReasoningError>,
        loop_index: u32,
        sample: u32,
    ) -> Result<VerificationReport, Halt> {
        match result {
            Ok(text) => {
                self.events.emit(StepEvent::response(
                    Step::Verification,
                    loop_index,
                    Some(sample),
                    &text,
                ));
                Ok(self.parser.parse(&text))
            }
            Err(error) => {
                self.report_call_failure(Step::Verification, loop_index, Some(sample), &error);
                if error.is_fatal_everywhere() {
                    return Err(Halt::Abort {
                        step: Step::Verification,
                        error,
                    });
                }
                let text = format!("Verification failed ({error}).");
                Ok(VerificationReport::unavailable(text))
            }
        }
    }

    /// Ask the solver for a revised solution. Any service error is fatal.
    async fn correct(
        &mut self,
        problem: &str,
        solution: &Solution,
        report: &VerificationReport,
        loop_index: u32,
    ) -> Result<Solution, Halt> {
        info!(
            role = %self.config.solver_role,
            version = solution.version,
            "Step 5: correction"
        );
        let prompt = self
            .prompts
            .correct(problem, &solution.text, &report.raw_text);
        self.calls.correction += 1;

        let text = self.invoke_solver(&prompt, Step::Correction, loop_index).await?;
        let corrected = solution.corrected(text);
        self.transition(
            PipelineStage::Corrected,
            Some(&format!("version {}", corrected.version)),
        )?;
        Ok(corrected)
    }

    /// Solver call shared by solve and correction. Empty text counts as no response.
    async fn invoke_solver(
        &mut self,
        prompt: &str,
        step: Step,
        loop_index: u32,
    ) -> Result<String, Halt> {
        let result = self
            .port
            .invoke(prompt, &self.config.solver_role)
            .await
            .and_then(|text| {
                if text.trim().is_empty() {
                    Err(ReasoningError::NoResponse("empty solution".into()))
                } else {
                    Ok(text)
                }
            });

        match result {
            Ok(text) => {
                self.events.emit(StepEvent::response(step, loop_index, None, &text));
                Ok(text)
            }
            Err(error) => {
                self.report_call_failure(step, loop_index, None, &error);
                Err(Halt::Abort { step, error })
            }
        }
    }

    fn report_call_failure(
        &self,
        step: Step,
        loop_index: u32,
        sample: Option<u32>,
        error: &ReasoningError,
    ) {
        if error.is_rate_limited() {
            warn!(
                step = step.as_str(),
                "Rate limit reached! Wait for the quota to reset: {error}"
            );
        } else {
            warn!(
                step = step.as_str(),
                kind = error.kind(),
                "Reasoning call failed: {error}"
            );
        }
        self.events.emit(StepEvent::CallFailed {
            step,
            loop_index,
            sample,
            kind: error.kind().to_string(),
            message: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn transition(&mut self, to: PipelineStage, reason: Option<&str>) -> Result<(), Halt> {
        let record = self.sm.advance(to, reason)?.clone();
        self.events.emit(StepEvent::Transition(record));
        Ok(())
    }

    fn finish(self, outcome: PipelineOutcome, history: Vec<RoundRecord>) -> PipelineReport {
        info!(summary = %self.sm.summary(), calls = self.calls.total(), "Pipeline finished");
        PipelineReport {
            outcome,
            history,
            calls: self.calls,
            transitions: self.sm.into_transitions(),
        }
    }

    fn finish_halted(
        mut self,
        halt: Halt,
        history: Vec<RoundRecord>,
    ) -> Result<PipelineReport, PipelineError> {
        match halt {
            Halt::Abort { step, error } => {
                let reason = format!("{} failed: {error}", step.as_str());
                let record = self.sm.abort(&reason)?.clone();
                self.events.emit(StepEvent::Transition(record));
                warn!(step = step.as_str(), "Aborted: {error}");
                let outcome = PipelineOutcome::Aborted { step, error };
                Ok(self.finish(outcome, history))
            }
            Halt::Internal(e) => Err(e),
        }
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use refine_agents::cli_port::CliReasoningPort;
use refine_agents::config::{RefineConfig, DEFAULT_PROBLEM};
use refine_agents::{run_pipeline, PipelineOutcome};

/// Refine a solution until an independent verifier approves it repeatedly.
#[derive(Parser, Debug)]
#[command(name = "refine-agents", version, about)]
struct Cli {
    /// Problem statement (words are joined with spaces).
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    problem: Vec<String>,
}

impl Cli {
    /// The joined problem words, or the built-in problem when none are given.
    fn problem_text(&self) -> String {
        if self.problem.is_empty() {
            DEFAULT_PROBLEM.to_string()
        } else {
            self.problem.join(" ")
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let problem = Cli::parse().problem_text();

    let config = RefineConfig::from_env()?;
    info!(
        bin = %config.cli_bin,
        solver = %config.pipeline.solver_role,
        verifier = %config.pipeline.verifier_role,
        "Refinement controller starting"
    );

    let port = Arc::new(CliReasoningPort::new(
        config.cli_bin.clone(),
        config.call_timeout,
    ));
    let summary = run_pipeline(&config, &problem, port).await?;

    match &summary.report.outcome {
        PipelineOutcome::Success { solution } => info!(
            version = solution.version,
            path = ?summary.artifact,
            "Solution accepted"
        ),
        PipelineOutcome::Exhausted => {
            warn!("No solution reached consensus within the refinement budget")
        }
        PipelineOutcome::Aborted { step, error } => {
            warn!(step = step.as_str(), "Pipeline aborted: {error}")
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hyphenated_words_are_part_of_the_problem() {
        let args = ["refine-agents", "What", "is", "-5", "squared"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.problem_text(), "What is -5 squared");

        let args = ["refine-agents", "--", "-x", "--y"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.problem_text(), "-x --y");
    }

    #[test]
    fn test_no_words_falls_back_to_default_problem() {
        let cli = Cli::try_parse_from(["refine-agents"]).unwrap();
        assert_eq!(cli.problem_text(), DEFAULT_PROBLEM);
    }
}

//! One pipeline run: prompt loading, controller, transcript and artifact.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::artifact::write_final_solution;
use crate::config::RefineConfig;
use crate::context::load_assembler;
use crate::events;
use crate::orchestrator::{PipelineController, PipelineReport};
use crate::port::ReasoningPort;
use crate::transcript::TranscriptLogger;

/// What a finished run produced on disk.
#[derive(Debug)]
pub struct RunSummary {
    pub report: PipelineReport,
    /// Set only when the run succeeded.
    pub artifact: Option<PathBuf>,
    pub run_id: String,
    pub log_files: usize,
}

/// Run the pipeline for `problem` against `port` using `config`.
///
/// Errors are limited to configuration and setup problems; every pipeline
/// outcome (success, exhaustion, abort) is returned in the summary.
pub async fn run_pipeline(
    config: &RefineConfig,
    problem: &str,
    port: Arc<dyn ReasoningPort>,
) -> Result<RunSummary> {
    let prompts = load_assembler(&config.prompts_dir, &config.context_dir)
        .context("Failed to load prompt templates")?;

    let (emitter, rx) = events::channel();
    let logger = TranscriptLogger::new(&config.log_dir);
    let run_id = logger.run_id().to_string();
    let logger_task = logger.spawn(rx);

    let controller = PipelineController::new(config.pipeline.clone(), port, prompts)
        .context("Invalid pipeline configuration")?
        .with_events(emitter);
    let report = controller.run(problem).await?;

    // The controller is gone, so the channel is closed and the task drains.
    let log_files = match logger_task.await {
        Ok(mut logger) => {
            logger.record_outcome(&report);
            logger.files_written()
        }
        Err(e) => {
            warn!("Transcript logger task failed: {e}");
            0
        }
    };

    let artifact = match report.final_solution() {
        Some(solution) => {
            write_final_solution(&config.output_path, solution)?;
            Some(config.output_path.clone())
        }
        None => None,
    };

    info!(
        run_id = %run_id,
        success = report.is_success(),
        calls = report.calls.total(),
        log_files,
        "Run complete"
    );

    Ok(RunSummary {
        report,
        artifact,
        run_id,
        log_files,
    })
}

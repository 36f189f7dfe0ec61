//! Pipeline policy and process settings, with `REFINE_*` environment overrides.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cli_port::{default_executable, DEFAULT_TIMEOUT_SECS};
use crate::errors::PipelineError;

/// Built-in problem used when none is given on the command line.
pub const DEFAULT_PROBLEM: &str = "Generate a Python script to scan a directory recursively.";

/// Immutable policy for one pipeline run. Injected into the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// Correction cycles allowed before giving up.
    pub max_refinement_loops: u32,
    /// Consecutive approvals needed for consensus.
    pub required_consecutive_passes: u32,
    /// Model selector for solve and correction calls.
    pub solver_role: String,
    /// Model selector for verification calls.
    pub verifier_role: String,
    /// Fan out the verification samples of a round concurrently.
    pub parallel_verification: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            max_refinement_loops: 5,
            required_consecutive_passes: 5,
            solver_role: "opus".into(),
            verifier_role: "opus".into(),
            parallel_verification: false,
        }
    }
}

impl Configuration {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_refinement_loops == 0 {
            return Err(PipelineError::Configuration(
                "max_refinement_loops must be at least 1".into(),
            ));
        }
        if self.required_consecutive_passes == 0 {
            return Err(PipelineError::Configuration(
                "required_consecutive_passes must be at least 1".into(),
            ));
        }
        if self.solver_role.trim().is_empty() || self.verifier_role.trim().is_empty() {
            return Err(PipelineError::Configuration(
                "solver and verifier roles must be non-empty".into(),
            ));
        }
        Ok(())
    }

    /// Upper bound on reasoning calls for one run.
    pub fn max_calls(&self) -> u64 {
        let loops = u64::from(self.max_refinement_loops);
        let passes = u64::from(self.required_consecutive_passes);
        1 + loops * (passes + 1)
    }
}

/// Process-level configuration: pipeline policy plus adapter settings.
#[derive(Debug, Clone)]
pub struct RefineConfig {
    pub pipeline: Configuration,
    /// Reasoning CLI executable.
    pub cli_bin: String,
    /// Absolute timeout per reasoning call.
    pub call_timeout: Duration,
    /// Directory holding `solver_prompt.md` and `verifier_prompt.md`.
    pub prompts_dir: PathBuf,
    /// Directory scanned for `*.md` context documents.
    pub context_dir: PathBuf,
    /// Transcript directory.
    pub log_dir: PathBuf,
    /// Final artifact location.
    pub output_path: PathBuf,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            pipeline: Configuration::default(),
            cli_bin: default_executable().into(),
            call_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            prompts_dir: PathBuf::from("prompts"),
            context_dir: PathBuf::from("context"),
            log_dir: PathBuf::from("logs"),
            output_path: PathBuf::from("final_solution.md"),
        }
    }
}

impl RefineConfig {
    /// Defaults overridden by `REFINE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let p = &mut config.pipeline;

        if let Some(v) = lookup("REFINE_SOLVER_MODEL") {
            p.solver_role = v;
        }
        if let Some(v) = lookup("REFINE_VERIFIER_MODEL") {
            p.verifier_role = v;
        }
        if let Some(v) = parse_var(&lookup, "REFINE_MAX_LOOPS")? {
            p.max_refinement_loops = v;
        }
        if let Some(v) = parse_var(&lookup, "REFINE_REQUIRED_PASSES")? {
            p.required_consecutive_passes = v;
        }
        if let Some(v) = parse_bool_var(&lookup, "REFINE_PARALLEL_VERIFY")? {
            p.parallel_verification = v;
        }

        if let Some(v) = lookup("REFINE_CLI_BIN") {
            config.cli_bin = v;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "REFINE_TIMEOUT_SECS")? {
            config.call_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = lookup("REFINE_PROMPTS_DIR") {
            config.prompts_dir = v.into();
        }
        if let Some(v) = lookup("REFINE_CONTEXT_DIR") {
            config.context_dir = v.into();
        }
        if let Some(v) = lookup("REFINE_LOG_DIR") {
            config.log_dir = v.into();
        }
        if let Some(v) = lookup("REFINE_OUTPUT") {
            config.output_path = v.into();
        }

        config.pipeline.validate()?;
        Ok(config)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("Invalid value for {key}: {raw:?}"))
        })
        .transpose()
}

fn parse_bool_var(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<bool>> {
    lookup(key)
        .map(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            _ => anyhow::bail!("Invalid value for {key}: {raw:?} (expected true/false)"),
        })
        .transpose()
}

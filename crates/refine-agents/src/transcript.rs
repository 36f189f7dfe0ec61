//! Transcript persistence.
//!
//! Every response gets its own text file under the log directory; every
//! event is also appended to `transcript.jsonl`. Write failures are logged
//! and otherwise ignored so persistence never affects the pipeline.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::StepEvent;
use crate::orchestrator::{CallCounts, PipelineOutcome, PipelineReport};

pub const TRANSCRIPT_FILE: &str = "transcript.jsonl";

/// One line of `transcript.jsonl`.
#[derive(Debug, Serialize)]
struct TranscriptLine<'a, T: Serialize> {
    run_id: &'a str,
    seq: u32,
    #[serde(flatten)]
    payload: &'a T,
}

/// Final line of a run.
#[derive(Debug, Serialize)]
struct OutcomeRecord<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    rounds: usize,
    calls: &'a CallCounts,
    timestamp: DateTime<Utc>,
}

/// Writes step events under `log_dir`.
#[derive(Debug)]
pub struct TranscriptLogger {
    dir: PathBuf,
    run_id: String,
    seq: u32,
    files_written: usize,
}

impl TranscriptLogger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            warn!(dir = %dir.display(), "Failed to create log directory: {e}");
        }
        Self {
            dir,
            run_id: Uuid::new_v4().to_string(),
            seq: 0,
            files_written: 0,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Response files written so far.
    pub fn files_written(&self) -> usize {
        self.files_written
    }

    /// File name for the next record with the given label.
    ///
    /// The run id prefix keeps loggers sharing a directory from colliding.
    fn next_key(&mut self, label: &str) -> String {
        self.seq += 1;
        let run = self.run_id.split('-').next().unwrap_or_default();
        format!(
            "log_{}_{run}_{:04}_{label}.txt",
            Local::now().format("%Y%m%d-%H%M%S"),
            self.seq
        )
    }

    /// Persist one event. Returns the response file path, if one was written.
    pub fn record(&mut self, event: &StepEvent) -> Option<PathBuf> {
        let written = match event {
            StepEvent::Response { step, text, .. } => {
                let key = self.next_key(step.as_str());
                let path = self.dir.join(key);
                match std::fs::write(&path, text) {
                    Ok(()) => {
                        self.files_written += 1;
                        info!(path = %path.display(), "Saved log");
                        Some(path)
                    }
                    Err(e) => {
                        warn!(path = %path.display(), "Failed to write response log: {e}");
                        None
                    }
                }
            }
            _ => {
                self.seq += 1;
                None
            }
        };
        self.append_line(event);
        written
    }

    /// Append the terminal outcome of a run.
    pub fn record_outcome(&mut self, report: &PipelineReport) {
        let (outcome, version, error) = match &report.outcome {
            PipelineOutcome::Success { solution } => ("success", Some(solution.version), None),
            PipelineOutcome::Exhausted => ("exhausted", None, None),
            PipelineOutcome::Aborted { step, error } => (
                "aborted",
                None,
                Some(format!("{}: {error}", step.as_str())),
            ),
        };
        self.seq += 1;
        self.append_line(&OutcomeRecord {
            kind: "outcome",
            outcome,
            version,
            error,
            rounds: report.history.len(),
            calls: &report.calls,
            timestamp: Utc::now(),
        });
    }

    fn append_line<T: Serialize>(&self, payload: &T) {
        let line = TranscriptLine {
            run_id: &self.run_id,
            seq: self.seq,
            payload,
        };
        let json = match serde_json::to_string(&line) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize transcript line: {e}");
                return;
            }
        };

        let path = self.dir.join(TRANSCRIPT_FILE);
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
        {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{json}") {
                    warn!("Failed to append transcript: {e}");
                }
            }
            Err(e) => warn!("Failed to open transcript file: {e}"),
        }
    }

    /// Consume events until every emitter is dropped, then hand the logger back.
    pub fn spawn(mut self, mut events: mpsc::UnboundedReceiver<StepEvent>) -> JoinHandle<Self> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                debug!(event_type = event.event_type(), "transcript event");
                self.record(&event);
            }
            self
        })
    }
}

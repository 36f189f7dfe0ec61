//! ReasoningPort backed by the reasoning CLI binary.
//!
//! The CLI has no library surface, so we shell out:
//!
//! ```text
//! <bin> --model <role> --print -     (prompt on stdin)
//! ```
//!
//! The prompt goes over stdin rather than argv so large prompts are not
//! subject to command-line length limits.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::errors::ReasoningError;
use crate::port::ReasoningPort;

/// Default absolute timeout per call.
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Substrings in CLI output that indicate a usage/rate limit.
const RATE_LIMIT_MARKERS: &[&str] = &["Limit reached"];

/// Platform default for the CLI executable name.
pub fn default_executable() -> &'static str {
    if cfg!(windows) {
        "claude.cmd"
    } else {
        "claude"
    }
}

/// Shell-out adapter for the reasoning CLI.
#[derive(Debug, Clone)]
pub struct CliReasoningPort {
    bin: String,
    timeout: Duration,
}

impl CliReasoningPort {
    pub fn new(bin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            bin: bin.into(),
            timeout,
        }
    }

    pub fn bin(&self) -> &str {
        &self.bin
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for CliReasoningPort {
    fn default() -> Self {
        Self::new(
            default_executable(),
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        )
    }
}

#[async_trait]
impl ReasoningPort for CliReasoningPort {
    async fn invoke(&self, prompt: &str, role: &str) -> Result<String, ReasoningError> {
        let mut child = Command::new(&self.bin)
            .args(["--model", role, "--print", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ReasoningError::Unavailable(format!("failed to start `{}`: {e}", self.bin))
            })?;

        let stdin = child.stdin.take();
        let input = prompt.as_bytes().to_vec();

        let exchange = async move {
            let write = async move {
                if let Some(mut stdin) = stdin {
                    if let Err(e) = stdin.write_all(&input).await {
                        // The child may exit without draining stdin; its
                        // exit status carries the real diagnosis.
                        debug!("failed to write prompt to stdin: {e}");
                    }
                }
            };
            let (_, output) = tokio::join!(write, child.wait_with_output());
            output
        };

        let output = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ReasoningError::Failed {
                    code: None,
                    diagnostic: format!("failed to collect output: {e}"),
                })
            }
            Err(_) => {
                return Err(ReasoningError::NoResponse(format!(
                    "timed out after {:?}",
                    self.timeout
                )))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        classify(
            output.status.success(),
            output.status.code(),
            &stdout,
            &stderr,
        )
    }
}

/// Map a finished CLI run to the port's result.
pub fn classify(
    success: bool,
    code: Option<i32>,
    stdout: &str,
    stderr: &str,
) -> Result<String, ReasoningError> {
    if !success {
        let diagnostic = if stderr.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            stderr.trim().to_string()
        };

        let rate_limited = RATE_LIMIT_MARKERS
            .iter()
            .any(|m| stdout.contains(m) || stderr.contains(m));
        if rate_limited {
            return Err(ReasoningError::RateLimited(diagnostic));
        }

        return Err(ReasoningError::Failed { code, diagnostic });
    }

    let text = stdout.trim();
    if text.is_empty() {
        return Err(ReasoningError::NoResponse("empty output".to_string()));
    }
    Ok(text.to_string())
}

//! Final artifact writer.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::orchestrator::Solution;

/// Write the accepted solution to `path`, creating parent directories.
pub fn write_final_solution(path: &Path, solution: &Solution) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, &solution.text)
        .with_context(|| format!("Failed to write final solution to {}", path.display()))?;
    info!(path = %path.display(), version = solution.version, "Final solution saved");
    Ok(())
}

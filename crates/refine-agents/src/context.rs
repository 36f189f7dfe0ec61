//! Loading of prompt templates and context documents from disk.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::prompts::{ContextDocument, PromptAssembler};

pub const SOLVER_TEMPLATE_FILE: &str = "solver_prompt.md";
pub const VERIFIER_TEMPLATE_FILE: &str = "verifier_prompt.md";

/// Read a template file. A missing file yields an empty template.
pub fn read_template(path: &Path) -> Result<String> {
    if !path.exists() {
        warn!(path = %path.display(), "Template not found, using empty template");
        return Ok(String::new());
    }
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read template {}", path.display()))
}

/// Load every `*.md` document in `dir`, sorted by file name.
///
/// A missing directory yields no documents.
pub fn load_context_documents(dir: &Path) -> Result<Vec<ContextDocument>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    info!(dir = %dir.display(), "Scanning for context documents");

    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "md"))
        .collect();
    paths.sort();

    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read context document {}", path.display()))?;
        info!(document = %name, "  loaded");
        documents.push(ContextDocument::new(name, content));
    }

    Ok(documents)
}

/// Build an assembler from `prompts_dir` templates and `context_dir` documents.
pub fn load_assembler(prompts_dir: &Path, context_dir: &Path) -> Result<PromptAssembler> {
    let solver = read_template(&prompts_dir.join(SOLVER_TEMPLATE_FILE))?;
    let verifier = read_template(&prompts_dir.join(VERIFIER_TEMPLATE_FILE))?;
    let documents = load_context_documents(context_dir)?;
    Ok(PromptAssembler::new(solver, verifier, &documents))
}

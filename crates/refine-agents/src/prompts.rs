//! Prompt assembly for each pipeline step.
//!
//! Section order is part of the contract with the reasoning service:
//!
//! ```text
//! solve:   template | context | problem
//! verify:  template | context | problem | solution
//! correct: template | context | problem | previous solution | report | instruction
//! ```
//!
//! Templates and context are loaded once (see `context`); assembly itself is
//! pure string concatenation.

/// Fixed instruction appended to every correction prompt.
pub const CORRECTION_INSTRUCTION: &str = "\
The previous solution was flagged with the issues above.
Please provide a **Corrected Solution** that addresses these findings.
Maintain the same output format (Summary + Detailed Solution).
";

/// A context document, labeled by its source file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextDocument {
    pub name: String,
    pub content: String,
}

impl ContextDocument {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// Render context documents into a single labeled block.
pub fn render_context(documents: &[ContextDocument]) -> String {
    documents
        .iter()
        .map(|doc| format!("\n\n[Context Document: {}]\n{}", doc.name, doc.content))
        .collect()
}

/// Builds solver and verifier prompts from immutable inputs.
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    solver_template: String,
    verifier_template: String,
    context_block: String,
}

impl PromptAssembler {
    pub fn new(
        solver_template: impl Into<String>,
        verifier_template: impl Into<String>,
        documents: &[ContextDocument],
    ) -> Self {
        Self {
            solver_template: solver_template.into(),
            verifier_template: verifier_template.into(),
            context_block: render_context(documents),
        }
    }

    pub fn context_block(&self) -> &str {
        &self.context_block
    }

    /// Prompt for the initial solve.
    pub fn solve(&self, problem: &str) -> String {
        format!(
            "{}\n\n### Context & Requirements ###\n{}\n\n### Request ###\n{}",
            self.solver_template, self.context_block, problem
        )
    }

    /// Prompt for one verification sample.
    pub fn verify(&self, problem: &str, solution: &str) -> String {
        format!(
            "{}\n\n### Context & Requirements ###\n{}\n\n### Problem ###\n{}\n\n\
             ### Solution ###\n{}",
            self.verifier_template, self.context_block, problem, solution
        )
    }

    /// Prompt asking the solver to fix `solution` given a failing report.
    pub fn correct(&self, problem: &str, solution: &str, report: &str) -> String {
        format!(
            "{}\n\n### Context & Requirements ###\n{}\n\n### Problem ###\n{}\n\n\
             ### Previous Solution ###\n{}\n\n### Verification Report ###\n{}\n\n\
             ### Instruction ###\n{}",
            self.solver_template,
            self.context_block,
            problem,
            solution,
            report,
            CORRECTION_INSTRUCTION
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembler() -> PromptAssembler {
        PromptAssembler::new(
            "SOLVER TEMPLATE",
            "VERIFIER TEMPLATE",
            &[
                ContextDocument::new("constraints.md", "Use only stdlib."),
                ContextDocument::new("style.md", "Be brief."),
            ],
        )
    }

    fn positions(haystack: &str, needles: &[&str]) -> Vec<usize> {
        needles
            .iter()
            .map(|n| haystack.find(n).unwrap_or_else(|| panic!("missing {n}")))
            .collect()
    }

    fn assert_ordered(haystack: &str, needles: &[&str]) {
        let pos = positions(haystack, needles);
        assert!(pos.windows(2).all(|w| w[0] < w[1]), "out of order: {pos:?}");
    }

    #[test]
    fn test_context_block_labels_each_document() {
        let block = assembler().context_block().to_string();
        assert_eq!(
            block,
            "\n\n[Context Document: constraints.md]\nUse only stdlib.\
             \n\n[Context Document: style.md]\nBe brief."
        );
    }

    #[test]
    fn test_empty_context() {
        assert_eq!(render_context(&[]), "");
    }

    #[test]
    fn test_solve_order() {
        let prompt = assembler().solve("Scan a directory.");
        assert!(prompt.starts_with("SOLVER TEMPLATE"));
        assert_ordered(
            &prompt,
            &[
                "SOLVER TEMPLATE",
                "[Context Document: constraints.md]",
                "### Request ###",
                "Scan a directory.",
            ],
        );
        assert!(!prompt.contains("VERIFIER"));
    }

    #[test]
    fn test_verify_order() {
        let prompt = assembler().verify("PROBLEM-TEXT", "SOLUTION-TEXT");
        assert!(prompt.starts_with("VERIFIER TEMPLATE"));
        assert_ordered(
            &prompt,
            &[
                "VERIFIER TEMPLATE",
                "[Context Document: style.md]",
                "PROBLEM-TEXT",
                "SOLUTION-TEXT",
            ],
        );
    }

    #[test]
    fn test_correct_order() {
        let prompt = assembler().correct("PROBLEM-TEXT", "OLD-SOLUTION", "BUG-REPORT");
        assert!(prompt.starts_with("SOLVER TEMPLATE"));
        assert_ordered(
            &prompt,
            &[
                "SOLVER TEMPLATE",
                "[Context Document: constraints.md]",
                "PROBLEM-TEXT",
                "### Previous Solution ###",
                "OLD-SOLUTION",
                "### Verification Report ###",
                "BUG-REPORT",
                "### Instruction ###",
                "Corrected Solution",
            ],
        );
        assert!(prompt.ends_with(CORRECTION_INSTRUCTION));
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let a = assembler();
        assert_eq!(a.correct("p", "s", "r"), a.correct("p", "s", "r"));
    }
}

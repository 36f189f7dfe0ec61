//! Verdict extraction from verifier responses.
//!
//! Two layers, checked in order:
//! 1. **Strict markers**: explicit `[VERDICT: APPROVED]` / `[VERDICT: REJECTED]` tags.
//! 2. **Heuristic phrase**: a natural-language approval sentence, consulted
//!    only when no strict marker is present.
//!
//! A critical-error marker overrides both layers and forces `Rejected`.
//!
//! When both strict markers appear, the approved marker wins because it is
//! checked first. Callers depend on this ordering; do not reorder the checks.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Default strict approval marker.
pub const APPROVED_MARKER: &str = "[VERDICT: APPROVED]";
/// Default strict rejection marker.
pub const REJECTED_MARKER: &str = "[VERDICT: REJECTED]";
/// Default fallback approval phrase for the heuristic layer.
pub const APPROVAL_PHRASE: &str = "Final Verdict: The solution is correct";
/// Default critical-error marker.
pub const CRITICAL_ERROR_MARKER: &str = "Critical Error";

/// Outcome of a single verification response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approved,
    Rejected,
    /// No marker and no heuristic match. Counts as a failure for round purposes.
    Unparseable,
}

impl Verdict {
    pub fn is_approved(self) -> bool {
        matches!(self, Self::Approved)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
            Self::Unparseable => write!(f, "unparseable"),
        }
    }
}

/// Parsed verifier response. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub verdict: Verdict,
    /// The verifier's full response, fed back to the solver on correction.
    pub raw_text: String,
    pub has_critical_error_marker: bool,
}

impl VerificationReport {
    /// Report for a verification call that produced no usable response.
    ///
    /// The verdict is `Unparseable`, so the round fails and the description
    /// becomes the bug report handed to the correction step.
    pub fn unavailable(description: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Unparseable,
            raw_text: description.into(),
            has_critical_error_marker: false,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.verdict.is_approved()
    }
}

/// Marker strings recognised by the parser.
///
/// An empty marker is treated as absent: it never matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictMarkers {
    pub approved: String,
    pub rejected: String,
    pub approval_phrase: String,
    pub critical_error: String,
}

impl Default for VerdictMarkers {
    fn default() -> Self {
        Self {
            approved: APPROVED_MARKER.to_string(),
            rejected: REJECTED_MARKER.to_string(),
            approval_phrase: APPROVAL_PHRASE.to_string(),
            critical_error: CRITICAL_ERROR_MARKER.to_string(),
        }
    }
}

/// Verdict parser with a separable heuristic layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerdictParser {
    markers: VerdictMarkers,
    heuristics: bool,
}

impl Default for VerdictParser {
    fn default() -> Self {
        Self::new()
    }
}

impl VerdictParser {
    /// Parser with default markers and the heuristic layer enabled.
    pub fn new() -> Self {
        Self {
            markers: VerdictMarkers::default(),
            heuristics: true,
        }
    }

    pub fn with_markers(mut self, markers: VerdictMarkers) -> Self {
        self.markers = markers;
        self
    }

    /// Enable or disable the heuristic phrase layer.
    pub fn with_heuristics(mut self, enabled: bool) -> Self {
        self.heuristics = enabled;
        self
    }

    pub fn markers(&self) -> &VerdictMarkers {
        &self.markers
    }

    /// Map a verifier response to a report.
    pub fn parse(&self, response: &str) -> VerificationReport {
        let mut verdict = match self.strict_verdict(response) {
            Some(v) => v,
            None if self.heuristics => self.heuristic_verdict(response),
            None => Verdict::Unparseable,
        };

        let has_critical_error_marker = contains_marker(response, &self.markers.critical_error);
        if has_critical_error_marker {
            verdict = Verdict::Rejected;
        }

        VerificationReport {
            verdict,
            raw_text: response.to_string(),
            has_critical_error_marker,
        }
    }

    /// Explicit-marker layer. `None` when neither marker is present.
    pub fn strict_verdict(&self, response: &str) -> Option<Verdict> {
        if contains_marker(response, &self.markers.approved) {
            Some(Verdict::Approved)
        } else if contains_marker(response, &self.markers.rejected) {
            Some(Verdict::Rejected)
        } else {
            None
        }
    }

    /// Phrase-match layer, consulted only when no strict marker matched.
    pub fn heuristic_verdict(&self, response: &str) -> Verdict {
        if contains_marker(response, &self.markers.approval_phrase) {
            Verdict::Approved
        } else {
            Verdict::Unparseable
        }
    }
}

fn contains_marker(response: &str, marker: &str) -> bool {
    !marker.is_empty() && response.contains(marker)
}

/// Parse with the default parser.
pub fn parse(response: &str) -> VerificationReport {
    VerdictParser::new().parse(response)
}

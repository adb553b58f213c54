//! Post-generation verifier results and the compliance decision.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Regex hard-gate result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegexResult {
    pub passed: bool,
    #[serde(default)]
    pub flags: Vec<String>,
    /// 1.0 if no pattern matched, 0.0 otherwise.
    pub score: f64,
}

impl RegexResult {
    /// The passing result (no pattern matched).
    #[must_use]
    pub fn clean() -> Self {
        Self { passed: true, flags: Vec::new(), score: 1.0 }
    }
}

/// One violation found by the SMT fact verifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmtViolation {
    pub policy_id: String,
    pub violation_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// SMT fact-verification result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmtResult {
    pub passed: bool,
    #[serde(default)]
    pub violations: Vec<SmtViolation>,
    pub score: f64,
}

impl SmtResult {
    /// The passing result with a perfect score.
    #[must_use]
    pub fn clean() -> Self {
        Self { passed: true, violations: Vec::new(), score: 1.0 }
    }
}

/// Judge-LLM result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeResult {
    /// Clamped to `[0, 1]`.
    pub score: f64,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub explanation: String,
}

impl JudgeResult {
    /// Neutral fallback used when the judge transport fails.
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            score: 0.5,
            issues: vec!["judge_unavailable".to_string()],
            explanation: "judge LLM call failed".to_string(),
        }
    }
}

/// Decision-node coverage result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageResult {
    pub score: f64,
    #[serde(default)]
    pub nodes_required: Vec<String>,
    #[serde(default)]
    pub nodes_covered: Vec<String>,
}

impl CoverageResult {
    /// Full coverage (empty requirement set).
    #[must_use]
    pub fn full() -> Self {
        Self { score: 1.0, nodes_required: Vec::new(), nodes_covered: Vec::new() }
    }
}

/// The four independent post-generation check results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostGenReport {
    pub regex_result: RegexResult,
    pub smt_result: SmtResult,
    pub judge_result: JudgeResult,
    pub coverage_result: CoverageResult,
}

/// Graded compliance action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceAction {
    Pass,
    AutoCorrect,
    Regenerate,
    Escalate,
}

impl ComplianceAction {
    /// Canonical label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ComplianceAction::Pass => "pass",
            ComplianceAction::AutoCorrect => "auto_correct",
            ComplianceAction::Regenerate => "regenerate",
            ComplianceAction::Escalate => "escalate",
        }
    }

    /// Whether the action is a success from the caller's point of view
    /// (drives the CLI exit code).
    #[must_use]
    pub fn is_ok(self) -> bool {
        matches!(self, ComplianceAction::Pass | ComplianceAction::AutoCorrect)
    }
}

impl fmt::Display for ComplianceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal output of one enforcement request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceDecision {
    pub score: f64,
    pub action: ComplianceAction,
    #[serde(default)]
    pub violations: Vec<String>,
    #[serde(default)]
    pub evidence: JsonValue,
    #[serde(default)]
    pub audit_trail: JsonValue,
    #[serde(default)]
    pub llm_response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrected_response: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_labels() {
        assert_eq!(ComplianceAction::AutoCorrect.to_string(), "auto_correct");
        assert_eq!(
            serde_json::to_string(&ComplianceAction::Escalate).unwrap(),
            "\"escalate\""
        );
        assert!(ComplianceAction::Pass.is_ok());
        assert!(!ComplianceAction::Regenerate.is_ok());
    }

    #[test]
    fn judge_fallback_is_neutral() {
        let j = JudgeResult::unavailable();
        assert!((j.score - 0.5).abs() < f64::EPSILON);
        assert_eq!(j.issues, vec!["judge_unavailable".to_string()]);
    }
}

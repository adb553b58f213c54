//! Scorer and router: weighted combination of the verifier scores, the
//! regex hard gate, and the coverage check that feeds the weighted score.

use crate::pregen::EnforcementContext;
use mandate_core::report::{
    ComplianceAction, ComplianceDecision, CoverageResult, PostGenReport,
};
use serde_json::json;

/// Weight of the SMT fact-verification score.
pub const W_SMT: f64 = 0.60;
/// Weight of the judge score.
pub const W_JUDGE: f64 = 0.30;
/// Weight of the coverage score.
pub const W_COVERAGE: f64 = 0.10;
// Regex carries no weight: it is a hard gate.

/// Minimum score for `pass`.
pub const THRESHOLD_PASS: f64 = 0.95;
/// Minimum score for `auto_correct`.
pub const THRESHOLD_AUTO_CORRECT: f64 = 0.85;
/// Minimum score for `regenerate`; anything below escalates.
pub const THRESHOLD_REGENERATE: f64 = 0.70;

/// `S = 0.60 * smt + 0.30 * judge + 0.10 * coverage`.
#[must_use]
pub fn compute_compliance_score(report: &PostGenReport) -> f64 {
    W_SMT * report.smt_result.score
        + W_JUDGE * report.judge_result.score
        + W_COVERAGE * report.coverage_result.score
}

/// Route the score through the action table. A regex failure escalates
/// regardless of the weighted score, so safety violations cannot be bought
/// back by otherwise-good checks.
#[must_use]
pub fn determine_action(score: f64, report: &PostGenReport) -> ComplianceAction {
    if !report.regex_result.passed {
        return ComplianceAction::Escalate;
    }
    if score >= THRESHOLD_PASS {
        ComplianceAction::Pass
    } else if score >= THRESHOLD_AUTO_CORRECT {
        ComplianceAction::AutoCorrect
    } else if score >= THRESHOLD_REGENERATE {
        ComplianceAction::Regenerate
    } else {
        ComplianceAction::Escalate
    }
}

/// Decision-node coverage: the fraction of required variables (union of
/// step variables over applicable paths) whose name, or underscore-stripped
/// form, appears in the lower-cased response. Incomplete coverage takes a
/// 0.8 multiplier; an empty requirement set scores 1.
#[must_use]
pub fn compute_coverage(context: &EnforcementContext, response_text: &str) -> CoverageResult {
    let mut nodes_required: Vec<String> = Vec::new();
    for path in &context.applicable_paths {
        for step in &path.path {
            if !nodes_required.contains(&step.var) {
                nodes_required.push(step.var.clone());
            }
        }
    }
    if nodes_required.is_empty() {
        return CoverageResult::full();
    }

    let lower = response_text.to_lowercase();
    let nodes_covered: Vec<String> = nodes_required
        .iter()
        .filter(|node| {
            let readable = node.replace('_', " ");
            lower.contains(&readable) || lower.contains(node.as_str())
        })
        .cloned()
        .collect();

    let base = nodes_covered.len() as f64 / nodes_required.len() as f64;
    let score = if nodes_covered.len() < nodes_required.len() {
        base * 0.8
    } else {
        base
    };
    CoverageResult { score, nodes_required, nodes_covered }
}

/// Assemble the terminal decision: weighted score, routed action, flattened
/// violation list, and the evidence/audit-trail fragments.
#[must_use]
pub fn build_compliance_decision(
    report: &PostGenReport,
    llm_response: String,
) -> ComplianceDecision {
    let score = compute_compliance_score(report);
    let action = determine_action(score, report);

    let mut violations: Vec<String> = report.regex_result.flags.clone();
    for v in &report.smt_result.violations {
        let detail = v
            .constraint
            .clone()
            .unwrap_or_else(|| v.violation_type.clone());
        violations.push(format!("SMT: {}: {}", v.policy_id, detail));
    }
    violations.extend(report.judge_result.issues.iter().map(|i| format!("Judge: {}", i)));

    let evidence = json!({
        "smt_violations": report.smt_result.violations,
        "regex_flags": report.regex_result.flags,
        "judge_issues": report.judge_result.issues,
        "judge_explanation": report.judge_result.explanation,
        "coverage": {
            "required": report.coverage_result.nodes_required,
            "covered": report.coverage_result.nodes_covered,
        },
    });
    let audit_trail = json!({
        "scores": {
            "smt": report.smt_result.score,
            "judge": report.judge_result.score,
            "regex": report.regex_result.score,
            "coverage": report.coverage_result.score,
            "final": score,
        },
        "weights": {
            "smt": W_SMT,
            "judge": W_JUDGE,
            "coverage": W_COVERAGE,
            "regex_hard_gate": true,
        },
    });

    ComplianceDecision {
        score,
        action,
        violations,
        evidence,
        audit_trail,
        llm_response,
        corrected_response: None,
    }
}

//! Conflict detector: for every pair of compiled paths with distinct leaf
//! actions, ask the solver whether both can fire together.

use crate::graph::DecisionGraph;
use crate::ir::PolicyIr;
use crate::CompileError;
use serde::{Deserialize, Serialize};
use solver::{Assignment, Cube};
use tracing::warn;

/// Two paths that can fire simultaneously with incompatible actions,
/// plus a concrete witness assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicalConflict {
    pub policies: Vec<String>,
    pub actions: Vec<String>,
    pub witness: Assignment,
}

/// A same-action, divergent-intent conflict supplied by an upstream step.
/// This layer never produces them; it escalates them unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticConflict {
    pub policies: Vec<String>,
    pub actions: Vec<String>,
    #[serde(default)]
    pub note: Option<String>,
}

/// Output of conflict detection.
#[derive(Debug, Clone, Default)]
pub struct ConflictReport {
    pub logical: Vec<LogicalConflict>,
    pub semantic: Vec<SemanticConflict>,
    /// Pairs the solver could not decide; marked for escalation.
    pub unknown_pairs: Vec<(String, String)>,
    /// Policy ids whose own condition conjunction is unsatisfiable.
    pub unsat_paths: Vec<String>,
}

/// Detect logical conflicts between all compiled-path pairs.
///
/// Complete within the IR's expressiveness (quantifier-free comparisons over
/// int/float plus uninterpreted enums-as-strings); deterministic because the
/// solver is single-threaded and seed-free. A pair the solver cannot decide
/// is recorded in `unknown_pairs` rather than aborting compilation; a path
/// that is unsatisfiable on its own marks its source rule as internally
/// inconsistent in `unsat_paths`.
pub fn detect_conflicts(
    graph: &DecisionGraph,
    ir: &PolicyIr,
) -> Result<ConflictReport, CompileError> {
    let mut report = ConflictReport::default();

    // Per-path soundness: an unsatisfiable path means the source rule can
    // never fire and must be reported.
    for p in &graph.compiled_paths {
        let mut cube = Cube::new(&ir.variables);
        cube.assert_path(&p.path).map_err(|source| CompileError::Solver {
            context: p.policy_id.clone(),
            source,
        })?;
        if !cube.is_satisfiable() {
            warn!(policy_id = %p.policy_id, "rule conditions are internally inconsistent");
            report.unsat_paths.push(p.policy_id.clone());
        }
    }

    for (i, p1) in graph.compiled_paths.iter().enumerate() {
        for p2 in graph.compiled_paths.iter().skip(i + 1) {
            if p1.leaf_action == p2.leaf_action {
                continue;
            }
            let mut cube = Cube::new(&ir.variables);
            let asserted = cube
                .assert_path(&p1.path)
                .and_then(|()| cube.assert_path(&p2.path));
            if let Err(e) = asserted {
                // Conflict unknown for this pair; resolution escalates it.
                warn!(
                    p1 = %p1.policy_id,
                    p2 = %p2.policy_id,
                    error = %e,
                    "conflict check undecided"
                );
                report.unknown_pairs.push((p1.policy_id.clone(), p2.policy_id.clone()));
                continue;
            }
            if let Some(witness) = cube.solve() {
                report.logical.push(LogicalConflict {
                    policies: vec![p1.policy_id.clone(), p2.policy_id.clone()],
                    actions: vec![p1.leaf_action.clone(), p2.leaf_action.clone()],
                    witness,
                });
            }
        }
    }

    Ok(report)
}

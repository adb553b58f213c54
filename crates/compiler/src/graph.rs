//! Decision-graph compiler: order decision variables and render each rule as
//! a compiled path in that canonical order.

use crate::ir::PolicyIr;
use crate::CompileError;
use mandate_core::schema::{CompiledPath, PathStep, Test, VarType, VariableSchema};
use std::cmp::Reverse;
use std::collections::BTreeMap;

/// The compiled decision graph.
#[derive(Debug, Clone, Default)]
pub struct DecisionGraph {
    /// Decision variables in canonical order.
    pub decision_nodes: Vec<String>,
    /// Schema restricted to the decision variables.
    pub node_schema: BTreeMap<String, VariableSchema>,
    /// Sorted, de-duplicated `"<type>:<value>"` leaf actions.
    pub leaf_actions: Vec<String>,
    /// One path per rule, steps in canonical variable order.
    pub compiled_paths: Vec<CompiledPath>,
}

fn type_bucket(t: VarType) -> u8 {
    match t {
        VarType::Bool => 0,
        VarType::Enum => 1,
        VarType::Int | VarType::Float => 2,
    }
}

/// Build the decision graph from the IR.
///
/// Variable ordering is total and deterministic: key
/// `(type_bucket, -frequency, name)` with bools first, then enums, then
/// numerics; higher-frequency variables come earlier within a bucket and
/// ties break by name ascending. Rules never introduce variables at this
/// stage; an undeclared variable aborts compilation.
pub fn build_decision_graph(ir: &PolicyIr) -> Result<DecisionGraph, CompileError> {
    let mut freq: BTreeMap<&str, usize> = BTreeMap::new();
    let mut decision_vars: Vec<&str> = Vec::new();
    for rule in &ir.conditional_rules {
        for cond in &rule.conditions {
            if !ir.variables.contains_key(&cond.var) {
                return Err(CompileError::UndeclaredVariable {
                    policy_id: rule.policy_id.clone(),
                    var: cond.var.clone(),
                });
            }
            let count = freq.entry(cond.var.as_str()).or_insert(0);
            if *count == 0 {
                decision_vars.push(cond.var.as_str());
            }
            *count += 1;
        }
    }

    decision_vars.sort_by_key(|var| {
        let bucket = type_bucket(ir.variables[*var].var_type);
        (bucket, Reverse(freq[var]), var.to_string())
    });
    let decision_nodes: Vec<String> = decision_vars.iter().map(|v| (*v).to_string()).collect();

    let node_schema: BTreeMap<String, VariableSchema> = decision_nodes
        .iter()
        .map(|v| (v.clone(), ir.variables[v].clone()))
        .collect();

    let mut leaf_set: Vec<String> =
        ir.conditional_rules.iter().map(|r| r.action.leaf()).collect();
    leaf_set.sort();
    leaf_set.dedup();

    let compiled_paths = ir
        .conditional_rules
        .iter()
        .map(|rule| {
            // Group this rule's tests by variable, then emit one step per
            // variable in canonical order.
            let mut grouped: BTreeMap<&str, Vec<Test>> = BTreeMap::new();
            for cond in &rule.conditions {
                grouped
                    .entry(cond.var.as_str())
                    .or_default()
                    .push(Test { op: cond.op, value: cond.value.clone() });
            }
            let path = decision_nodes
                .iter()
                .filter_map(|var| {
                    grouped.remove(var.as_str()).map(|tests| PathStep {
                        var: var.clone(),
                        tests,
                    })
                })
                .collect();
            CompiledPath {
                policy_id: rule.policy_id.clone(),
                path,
                leaf_action: rule.action.leaf(),
                metadata: rule.metadata.clone(),
            }
        })
        .collect();

    Ok(DecisionGraph {
        decision_nodes,
        node_schema,
        leaf_actions: leaf_set,
        compiled_paths,
    })
}

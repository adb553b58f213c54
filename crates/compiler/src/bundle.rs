//! Bundle compiler: freeze all pipeline outputs into the compiled artefact.

use crate::conflict::{detect_conflicts, SemanticConflict};
use crate::graph::build_decision_graph;
use crate::ir::build_ir;
use crate::record::RawPolicyRecord;
use crate::resolve::resolve_conflicts;
use crate::CompileError;
use mandate_core::schema::{BundleMetadata, CanonicalActionEntry, CompiledBundle};
use mandate_core::{ids, SCHEMA_VERSION};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::info;

const GENERATOR: &str = "mandate-bundle-compiler-v1";

/// A compiled bundle plus the non-fatal findings gathered along the way.
#[derive(Debug, Clone)]
pub struct Compilation {
    pub bundle: CompiledBundle,
    /// Human-readable warnings (internally inconsistent rules, pairs the
    /// solver could not decide). These never abort compilation.
    pub warnings: Vec<String>,
}

/// Run the full pipeline: records -> IR -> graph -> conflicts -> resolution
/// -> bundle. `semantic_conflicts` may be supplied by an upstream step and
/// are escalated unchanged.
pub fn compile(
    records: &[RawPolicyRecord],
    semantic_conflicts: Vec<SemanticConflict>,
) -> Result<Compilation, CompileError> {
    let ir = build_ir(records)?;
    let graph = build_decision_graph(&ir)?;
    let mut conflicts = detect_conflicts(&graph, &ir)?;
    conflicts.semantic = semantic_conflicts;
    let resolution = resolve_conflicts(&conflicts, &graph);

    let mut warnings = Vec::new();
    for pid in &conflicts.unsat_paths {
        warnings.push(format!(
            "rule '{}' is internally inconsistent: its condition conjunction is unsatisfiable",
            pid
        ));
    }
    for (p1, p2) in &conflicts.unknown_pairs {
        warnings.push(format!("conflict between '{}' and '{}' is undecided", p1, p2));
    }

    let canonical_action_map: Vec<CanonicalActionEntry> = records
        .iter()
        .filter_map(|r| {
            r.canonical_actions.as_ref().map(|actions| CanonicalActionEntry {
                policy_id: r.policy_id.clone(),
                canonical_actions: actions.clone(),
            })
        })
        .collect();

    let policy_count = records
        .iter()
        .map(|r| r.policy_id.as_str())
        .collect::<BTreeSet<_>>()
        .len();

    let bundle = CompiledBundle {
        schema_version: SCHEMA_VERSION.to_string(),
        bundle_metadata: BundleMetadata {
            generated_on: ids::now_utc_iso(),
            generator: GENERATOR.to_string(),
            policy_count,
            rule_count: ir.conditional_rules.len(),
            constraint_count: ir.constraints.len(),
            path_count: graph.compiled_paths.len(),
        },
        variables: ir.variables,
        conditional_rules: ir.conditional_rules,
        constraints: ir.constraints,
        decision_nodes: graph.decision_nodes,
        node_schema: graph.node_schema,
        leaf_actions: graph.leaf_actions,
        compiled_paths: graph.compiled_paths,
        dominance_rules: resolution.dominance_rules,
        escalations: resolution.escalations,
        canonical_action_map,
        priority_lattice: resolution.priority_lattice,
    };

    info!(
        rules = bundle.bundle_metadata.rule_count,
        constraints = bundle.bundle_metadata.constraint_count,
        paths = bundle.bundle_metadata.path_count,
        dominance = bundle.dominance_rules.len(),
        escalations = bundle.escalations.len(),
        "bundle compiled"
    );
    Ok(Compilation { bundle, warnings })
}

/// Convenience wrapper: no externally supplied semantic conflicts.
pub fn compile_from_records(records: &[RawPolicyRecord]) -> Result<Compilation, CompileError> {
    compile(records, Vec::new())
}

/// Write a bundle to disk as pretty-printed JSON, creating parent
/// directories as needed.
pub fn write_bundle<P: AsRef<Path>>(bundle: &CompiledBundle, path: P) -> Result<(), CompileError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(bundle)?;
    fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RawAction, RawCondition};
    use mandate_core::schema::RuleMetadata;
    use mandate_core::value::Value;

    fn refund_records() -> Vec<RawPolicyRecord> {
        let receipt = RawCondition {
            kind: "boolean_flag".into(),
            parameter: Some("has_receipt".into()),
            ..RawCondition::default()
        };
        let window = RawCondition {
            kind: "time_window".into(),
            operator: Some("<=".into()),
            value: Some(Value::Int(30)),
            ..RawCondition::default()
        };
        vec![
            RawPolicyRecord {
                policy_id: "RET-001".into(),
                conditions: vec![receipt.clone(), window],
                actions: vec![RawAction {
                    kind: "required".into(),
                    action: "issue_refund".into(),
                    requires: Vec::new(),
                }],
                metadata: RuleMetadata {
                    domain: "returns".into(),
                    priority: "company".into(),
                    owner: Some("returns@corp".into()),
                    ..RuleMetadata::default()
                },
                discovery: None,
                canonical_actions: Some(vec!["issue_refund".into()]),
            },
            RawPolicyRecord {
                policy_id: "SEC-001".into(),
                conditions: Vec::new(),
                actions: vec![RawAction {
                    kind: "prohibited".into(),
                    action: "disclose_pii".into(),
                    requires: Vec::new(),
                }],
                metadata: RuleMetadata {
                    domain: "security".into(),
                    priority: "regulatory".into(),
                    ..RuleMetadata::default()
                },
                discovery: None,
                canonical_actions: None,
            },
        ]
    }

    #[test]
    fn bundle_carries_all_sections() {
        let compilation = compile_from_records(&refund_records()).unwrap();
        let b = &compilation.bundle;
        assert_eq!(b.schema_version, "1.0");
        assert!(b.variables.contains_key("has_receipt"));
        assert_eq!(b.conditional_rules.len(), 1);
        assert_eq!(b.constraints.len(), 1);
        assert_eq!(b.decision_nodes, vec!["has_receipt", "days_since_purchase"]);
        assert_eq!(b.leaf_actions, vec!["issue_refund:full"]);
        assert_eq!(b.compiled_paths.len(), 1);
        assert_eq!(b.canonical_action_map.len(), 1);
        assert_eq!(b.priority_lattice["regulatory"], 1);
        assert_eq!(b.bundle_metadata.policy_count, 2);
        assert_eq!(b.bundle_metadata.generator, GENERATOR);
        assert!(compilation.warnings.is_empty());
    }

    #[test]
    fn bundle_roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("bundle.json");
        let compilation = compile_from_records(&refund_records()).unwrap();
        write_bundle(&compilation.bundle, &path).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        let back: CompiledBundle = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, compilation.bundle);
    }
}

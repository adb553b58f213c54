//! Bundle loader: read the compiled artefact, verify cross-references, and
//! build the in-memory indexes used by retrieval.

use mandate_core::schema::{
    pair_key, CompiledBundle, CompiledPath, ConditionalRule, Constraint, DominanceRule,
    Escalation,
};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

/// Bundle load failures. Structural malformation is fatal; integrity
/// warnings are not.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("bundle malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// O(1)-lookup indexes over a loaded bundle, built in O(N).
#[derive(Debug, Clone, Default)]
pub struct BundleIndex {
    pub rules_by_domain: HashMap<String, Vec<ConditionalRule>>,
    pub rules_by_policy_id: HashMap<String, ConditionalRule>,
    pub paths_by_domain: HashMap<String, Vec<CompiledPath>>,
    pub paths_by_policy_id: HashMap<String, CompiledPath>,
    pub constraints_by_scope: HashMap<String, Vec<Constraint>>,
    /// Keyed by the unordered policy pair.
    pub dominance_lookup: HashMap<(String, String), DominanceRule>,
    /// Keyed by the unordered policy pair.
    pub escalation_lookup: HashMap<(String, String), Escalation>,
}

impl BundleIndex {
    /// Build all indexes from a bundle.
    #[must_use]
    pub fn new(bundle: &CompiledBundle) -> Self {
        let mut idx = Self::default();
        for rule in &bundle.conditional_rules {
            idx.rules_by_domain
                .entry(rule.metadata.domain.clone())
                .or_default()
                .push(rule.clone());
            idx.rules_by_policy_id.insert(rule.policy_id.clone(), rule.clone());
        }
        for path in &bundle.compiled_paths {
            idx.paths_by_domain
                .entry(path.metadata.domain.clone())
                .or_default()
                .push(path.clone());
            idx.paths_by_policy_id.insert(path.policy_id.clone(), path.clone());
        }
        for constraint in &bundle.constraints {
            idx.constraints_by_scope
                .entry(constraint.scope.clone())
                .or_default()
                .push(constraint.clone());
        }
        for dr in &bundle.dominance_rules {
            idx.dominance_lookup.insert(dr.pair_key(), dr.clone());
        }
        for esc in &bundle.escalations {
            idx.escalation_lookup.insert(pair_key(&esc.policies), esc.clone());
        }
        idx
    }
}

/// Cross-reference checks. Returns human-readable warnings; none is fatal.
#[must_use]
pub fn validate_bundle_integrity(bundle: &CompiledBundle) -> Vec<String> {
    let mut warnings = Vec::new();

    let var_names: HashSet<&str> = bundle.variables.keys().map(String::as_str).collect();
    for rule in &bundle.conditional_rules {
        for cond in &rule.conditions {
            if !var_names.contains(cond.var.as_str()) {
                warnings.push(format!(
                    "rule {} references undefined variable '{}'",
                    rule.policy_id, cond.var
                ));
            }
        }
    }

    for node in &bundle.decision_nodes {
        if !var_names.contains(node.as_str()) {
            warnings.push(format!("decision node '{}' is not a declared variable", node));
        }
    }

    let rule_ids: HashSet<&str> =
        bundle.conditional_rules.iter().map(|r| r.policy_id.as_str()).collect();
    for dr in &bundle.dominance_rules {
        for pid in &dr.when.policies_fire {
            if !rule_ids.contains(pid.as_str()) {
                warnings.push(format!("dominance rule references unknown policy '{}'", pid));
            }
        }
    }

    warnings
}

/// Load a bundle from disk, log integrity warnings, and build indexes.
pub fn load_bundle<P: AsRef<Path>>(path: P) -> Result<(CompiledBundle, BundleIndex), LoadError> {
    let raw = fs::read_to_string(path)?;
    let bundle: CompiledBundle = serde_json::from_str(&raw)?;
    for w in validate_bundle_integrity(&bundle) {
        warn!(warning = %w, "bundle integrity");
    }
    let index = BundleIndex::new(&bundle);
    Ok((bundle, index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mandate_core::priority::default_lattice;
    use mandate_core::schema::{
        BundleMetadata, Condition, DominanceMode, DominanceOutcome, DominanceTrigger, IrAction,
        RuleMetadata, TestOp, VarType, VariableSchema,
    };
    use mandate_core::value::Value;
    use std::collections::BTreeMap;

    fn small_bundle() -> CompiledBundle {
        let mut variables = BTreeMap::new();
        variables.insert("has_receipt".to_string(), VariableSchema::of(VarType::Bool));
        let rule = ConditionalRule {
            policy_id: "P1".into(),
            conditions: vec![Condition {
                var: "has_receipt".into(),
                op: TestOp::Eq,
                value: Value::Bool(true),
            }],
            action: IrAction { kind: "refund".into(), value: "full".into() },
            metadata: RuleMetadata { domain: "returns".into(), ..RuleMetadata::default() },
        };
        CompiledBundle {
            schema_version: "1.0".into(),
            variables,
            conditional_rules: vec![rule],
            constraints: Vec::new(),
            decision_nodes: vec!["has_receipt".into()],
            node_schema: BTreeMap::new(),
            leaf_actions: vec!["refund:full".into()],
            compiled_paths: Vec::new(),
            dominance_rules: Vec::new(),
            escalations: Vec::new(),
            canonical_action_map: Vec::new(),
            priority_lattice: default_lattice(),
            bundle_metadata: BundleMetadata::default(),
        }
    }

    #[test]
    fn clean_bundle_has_no_warnings() {
        assert!(validate_bundle_integrity(&small_bundle()).is_empty());
    }

    #[test]
    fn undefined_variable_and_node_warn() {
        let mut b = small_bundle();
        b.conditional_rules[0].conditions[0].var = "ghost".into();
        b.decision_nodes.push("phantom".into());
        let warnings = validate_bundle_integrity(&b);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("ghost"));
        assert!(warnings[1].contains("phantom"));
    }

    #[test]
    fn unknown_dominance_policy_warns() {
        let mut b = small_bundle();
        b.dominance_rules.push(DominanceRule {
            when: DominanceTrigger { policies_fire: vec!["P1".into(), "NOPE".into()] },
            then: DominanceOutcome {
                mode: DominanceMode::Override,
                enforce: "P1".into(),
                notes: String::new(),
            },
        });
        let warnings = validate_bundle_integrity(&b);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("NOPE"));
    }

    #[test]
    fn dominance_lookup_is_unordered() {
        let mut b = small_bundle();
        b.dominance_rules.push(DominanceRule {
            when: DominanceTrigger { policies_fire: vec!["B".into(), "A".into()] },
            then: DominanceOutcome {
                mode: DominanceMode::Override,
                enforce: "A".into(),
                notes: String::new(),
            },
        });
        let idx = BundleIndex::new(&b);
        assert!(idx.dominance_lookup.contains_key(&("A".to_string(), "B".to_string())));
    }

    #[test]
    fn malformed_bundle_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.json");
        std::fs::write(&path, "{\"schema_version\": 1.0}").unwrap();
        assert!(matches!(load_bundle(&path), Err(LoadError::Malformed(_))));
    }

    #[test]
    fn load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.json");
        let b = small_bundle();
        std::fs::write(&path, serde_json::to_string(&b).unwrap()).unwrap();
        let (loaded, idx) = load_bundle(&path).unwrap();
        assert_eq!(loaded, b);
        assert_eq!(idx.rules_by_domain["returns"].len(), 1);
        assert!(idx.rules_by_policy_id.contains_key("P1"));
    }
}

//! During-generation injector: serialise constraints and compiled paths into
//! a deterministic scaffold appended to the model prompt.

use crate::pregen::EnforcementContext;
use crate::transport::Prompt;
use mandate_core::digest::sha256_hex;
use mandate_core::schema::{
    CompiledBundle, CompiledPath, Constraint, DominanceRule, VarType, VariableSchema,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Fixed priority guidance line injected with every scaffold.
pub const PRIORITY_ORDER_TEXT: &str =
    "PRIORITY: regulatory > core_values > company > department > situational.";

const BEGIN_MARKER: &str = "---BEGIN POLICY ENFORCEMENT---";
const END_MARKER: &str = "---END POLICY ENFORCEMENT---";

/// Generation parameters pinned for enforced requests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationParams {
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self { temperature: 0.0, max_tokens: 2048 }
    }
}

/// Everything injected around one generation. Assembly is deterministic:
/// building it twice from the same context yields byte-identical output.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InjectionBundle {
    pub system_prompt_additions: String,
    pub scaffold_steps: Vec<String>,
    pub priority_guidance: String,
    pub invariant_constraints: Vec<String>,
    pub generation_params: GenerationParams,
}

impl InjectionBundle {
    /// SHA-256 of the scaffold text (hashed into the audit entry).
    #[must_use]
    pub fn scaffold_hash(&self) -> String {
        sha256_hex(self.scaffold_steps.join("\n").as_bytes())
    }
}

/// Render constraints as a numbered invariant block. `NOT(x)` predicates
/// become `NEVER` lines with underscores read as spaces; everything else is
/// an `ALWAYS comply` line.
#[must_use]
pub fn serialize_constraints(constraints: &[Constraint]) -> String {
    if constraints.is_empty() {
        return String::new();
    }
    let mut lines = vec!["- INVARIANTS:".to_string()];
    for (i, c) in constraints.iter().enumerate() {
        match c.forbidden_token() {
            Some(token) => {
                lines.push(format!("  {}) NEVER {}.", i + 1, token.replace('_', " ")));
            }
            None => {
                lines.push(format!("  {}) ALWAYS comply with: {}.", i + 1, c.constraint));
            }
        }
    }
    lines.join("\n")
}

fn interrogation_step(step_num: usize, var: &str, schema: Option<&VariableSchema>) -> String {
    match schema.map(|s| s.var_type) {
        Some(VarType::Bool) => format!(
            "STEP {}: Check variable {}. If unknown, ask the user; DO NOT assume.",
            step_num, var
        ),
        Some(VarType::Enum) => {
            let vals = schema
                .and_then(|s| s.values.as_ref())
                .filter(|v| !v.is_empty())
                .map_or_else(|| "unknown".to_string(), |v| v.join(", "));
            format!("STEP {}: Determine {}. Must be one of: {}.", step_num, var, vals)
        }
        _ => format!("STEP {}: Check {}.", step_num, var),
    }
}

/// Render compiled paths into deterministic step-by-step scaffold lines.
///
/// Variables follow the bundle's canonical order restricted to those that
/// appear in any applicable path, with extras appended name-ascending.
/// Within a variable, paths contribute branches in policy-id order.
#[must_use]
pub fn serialize_scaffold(
    paths: &[CompiledPath],
    variables: &BTreeMap<String, VariableSchema>,
    decision_nodes: &[String],
    dominance_applied: &[DominanceRule],
) -> Vec<String> {
    if paths.is_empty() {
        return Vec::new();
    }

    let path_vars: BTreeSet<&str> = paths
        .iter()
        .flat_map(|p| p.path.iter().map(|s| s.var.as_str()))
        .collect();
    let mut ordered: Vec<&str> = decision_nodes
        .iter()
        .map(String::as_str)
        .filter(|v| path_vars.contains(v))
        .collect();
    for v in &path_vars {
        if !ordered.contains(v) {
            ordered.push(v);
        }
    }

    let mut sorted_paths: Vec<&CompiledPath> = paths.iter().collect();
    sorted_paths.sort_by(|a, b| a.policy_id.cmp(&b.policy_id));

    let mut steps = Vec::new();
    let mut step_num = 1usize;
    for var in ordered {
        steps.push(interrogation_step(step_num, var, variables.get(var)));
        step_num += 1;

        for p in &sorted_paths {
            for path_step in p.path.iter().filter(|s| s.var == var) {
                for test in &path_step.tests {
                    let eff = p.metadata.effective_date.as_deref().unwrap_or("N/A");
                    steps.push(format!(
                        "  If {} {} {} THEN ACTION => {} (per {}, source: {}, effective: {}).",
                        var, test.op, test.value, p.leaf_action, p.policy_id,
                        p.metadata.source, eff
                    ));
                }
            }
        }
    }

    for dr in dominance_applied {
        let mode = match dr.then.mode {
            mandate_core::schema::DominanceMode::Override => "override",
            mandate_core::schema::DominanceMode::Compose => "compose",
        };
        steps.push(format!(
            "NOTE: When policies {:?} conflict, mode={}, enforce={}. {}",
            dr.when.policies_fire, mode, dr.then.enforce, dr.then.notes
        ));
    }

    steps.push(format!(
        "STEP {}: FINAL. State the action and cite the policy source.",
        step_num
    ));
    steps
}

/// Assemble the full injection bundle for one request.
#[must_use]
pub fn build_injection_bundle(
    context: &EnforcementContext,
    bundle: &CompiledBundle,
) -> InjectionBundle {
    let constraints_block = serialize_constraints(&context.applicable_constraints);
    let scaffold = serialize_scaffold(
        &context.applicable_paths,
        &bundle.variables,
        &bundle.decision_nodes,
        &context.dominance_applied,
    );

    let mut priority_guidance = PRIORITY_ORDER_TEXT.to_string();
    for dr in &context.dominance_applied {
        priority_guidance.push_str(&format!("\nEnforce {} when in conflict.", dr.then.enforce));
    }

    let system_prompt_additions = format!(
        "{}\n{}\n- {}\n{}",
        BEGIN_MARKER, constraints_block, priority_guidance, END_MARKER
    );

    InjectionBundle {
        system_prompt_additions,
        scaffold_steps: scaffold,
        priority_guidance,
        invariant_constraints: context
            .applicable_constraints
            .iter()
            .map(|c| c.constraint.clone())
            .collect(),
        generation_params: GenerationParams::default(),
    }
}

/// Final prompt assembly: enforcement block joins the system prompt, the
/// scaffold is appended to the user prompt.
#[must_use]
pub fn format_full_prompt(
    user_query: &str,
    injection: &InjectionBundle,
    base_system_prompt: &str,
) -> Prompt {
    let system = if base_system_prompt.is_empty() {
        injection.system_prompt_additions.clone()
    } else {
        format!("{}\n\n{}", base_system_prompt, injection.system_prompt_additions)
    };
    let user = if injection.scaffold_steps.is_empty() {
        user_query.to_string()
    } else {
        format!(
            "{}\n\nFollow the enforcement scaffold below:\n{}",
            user_query,
            injection.scaffold_steps.join("\n")
        )
    };
    Prompt { system, user }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mandate_core::schema::{PathStep, RuleMetadata, Test, TestOp};
    use mandate_core::value::Value;

    fn md(source: &str, eff: Option<&str>) -> RuleMetadata {
        RuleMetadata {
            source: source.to_string(),
            effective_date: eff.map(String::from),
            ..RuleMetadata::default()
        }
    }

    fn receipt_path(pid: &str) -> CompiledPath {
        CompiledPath {
            policy_id: pid.to_string(),
            path: vec![
                PathStep {
                    var: "has_receipt".into(),
                    tests: vec![Test { op: TestOp::Eq, value: Value::Bool(true) }],
                },
                PathStep {
                    var: "days_since_purchase".into(),
                    tests: vec![Test { op: TestOp::Le, value: Value::Int(30) }],
                },
            ],
            leaf_action: "issue_refund:full".into(),
            metadata: md("refund_policy_v2", Some("2024-01-01")),
        }
    }

    fn variables() -> BTreeMap<String, VariableSchema> {
        let mut m = BTreeMap::new();
        m.insert(
            "has_receipt".to_string(),
            VariableSchema::of(VarType::Bool),
        );
        m.insert(
            "days_since_purchase".to_string(),
            VariableSchema::of(VarType::Int),
        );
        m.insert(
            "product_category".to_string(),
            VariableSchema {
                var_type: VarType::Enum,
                description: String::new(),
                values: Some(vec!["clothing".into(), "electronics".into()]),
            },
        );
        m
    }

    fn constraint(text: &str) -> Constraint {
        Constraint {
            policy_id: "C1".into(),
            constraint: text.to_string(),
            scope: "always".into(),
            metadata: RuleMetadata::default(),
        }
    }

    #[test]
    fn not_constraints_become_never_lines() {
        let block = serialize_constraints(&[
            constraint("NOT(disclose_pii)"),
            constraint("verify identity first"),
        ]);
        assert!(block.starts_with("- INVARIANTS:"));
        assert!(block.contains("1) NEVER disclose pii."));
        assert!(block.contains("2) ALWAYS comply with: verify identity first."));
    }

    #[test]
    fn empty_constraints_render_nothing() {
        assert_eq!(serialize_constraints(&[]), "");
    }

    #[test]
    fn scaffold_orders_vars_by_decision_nodes_and_paths_by_policy_id() {
        let vars = variables();
        let nodes = vec![
            "has_receipt".to_string(),
            "product_category".to_string(),
            "days_since_purchase".to_string(),
        ];
        let steps = serialize_scaffold(
            &[receipt_path("RET-002"), receipt_path("RET-001")],
            &vars,
            &nodes,
            &[],
        );
        // has_receipt first (bool interrogation), then days; product_category
        // is skipped because no path mentions it.
        assert!(steps[0].contains("STEP 1: Check variable has_receipt"));
        assert!(steps[0].contains("DO NOT assume"));
        // Branches under step 1: RET-001 before RET-002.
        let i1 = steps.iter().position(|s| s.contains("per RET-001")).unwrap();
        let i2 = steps.iter().position(|s| s.contains("per RET-002")).unwrap();
        assert!(i1 < i2);
        assert!(steps.iter().any(|s| s.contains("If days_since_purchase <= 30")));
        assert!(steps.iter().any(|s| s.contains("source: refund_policy_v2")));
        assert!(steps.last().unwrap().contains("FINAL"));
        assert!(!steps.iter().any(|s| s.contains("product_category")));
    }

    #[test]
    fn enum_interrogation_lists_closed_values() {
        let vars = variables();
        let path = CompiledPath {
            policy_id: "P".into(),
            path: vec![PathStep {
                var: "product_category".into(),
                tests: vec![Test { op: TestOp::Eq, value: Value::Str("electronics".into()) }],
            }],
            leaf_action: "refund:full".into(),
            metadata: md("src", None),
        };
        let steps =
            serialize_scaffold(&[path], &vars, &["product_category".to_string()], &[]);
        assert!(steps[0].contains("Must be one of: clothing, electronics."));
        assert!(steps.iter().any(|s| s.contains("effective: N/A")));
    }

    #[test]
    fn empty_paths_produce_empty_scaffold() {
        let steps = serialize_scaffold(&[], &variables(), &[], &[]);
        assert!(steps.is_empty());
    }

    #[test]
    fn injection_is_byte_identical_across_runs() {
        let ctx = EnforcementContext {
            session_id: "s".into(),
            query: "q".into(),
            domain: "returns".into(),
            intent: "refund_request".into(),
            domain_confidence: 0.9,
            applicable_rules: Vec::new(),
            applicable_constraints: vec![constraint("NOT(disclose_pii)")],
            applicable_paths: vec![receipt_path("RET-001")],
            dominance_applied: Vec::new(),
            escalation_contacts: Vec::new(),
            timestamp: "t".into(),
        };
        let bundle = CompiledBundle {
            schema_version: "1.0".into(),
            variables: variables(),
            conditional_rules: Vec::new(),
            constraints: Vec::new(),
            decision_nodes: vec!["has_receipt".into(), "days_since_purchase".into()],
            node_schema: BTreeMap::new(),
            leaf_actions: Vec::new(),
            compiled_paths: Vec::new(),
            dominance_rules: Vec::new(),
            escalations: Vec::new(),
            canonical_action_map: Vec::new(),
            priority_lattice: mandate_core::priority::default_lattice(),
            bundle_metadata: mandate_core::schema::BundleMetadata::default(),
        };
        let a = build_injection_bundle(&ctx, &bundle);
        let b = build_injection_bundle(&ctx, &bundle);
        assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());
        assert_eq!(a.scaffold_hash(), b.scaffold_hash());
        assert!(a.system_prompt_additions.starts_with(BEGIN_MARKER));
        assert!(a.system_prompt_additions.ends_with(END_MARKER));
        assert!(a.system_prompt_additions.contains(PRIORITY_ORDER_TEXT));

        let prompt = format_full_prompt("refund please", &a, "");
        assert!(prompt.user.starts_with("refund please"));
        assert!(prompt.user.contains("Follow the enforcement scaffold below:"));
        let prompt2 = format_full_prompt("refund please", &b, "");
        assert_eq!(prompt, prompt2);
    }
}

//! IR builder: normalise raw policy records into typed variables,
//! conditional rules, and invariant constraints.

use crate::record::{RawAction, RawCondition, RawPolicyRecord};
use crate::CompileError;
use mandate_core::schema::{
    Condition, ConditionalRule, Constraint, IrAction, TestOp, VarType, VariableSchema,
};
use mandate_core::value::Value;
use std::collections::{BTreeMap, BTreeSet};

/// The typed intermediate representation.
#[derive(Debug, Clone, Default)]
pub struct PolicyIr {
    pub variables: BTreeMap<String, VariableSchema>,
    pub conditional_rules: Vec<ConditionalRule>,
    pub constraints: Vec<Constraint>,
}

/// Derive a variable name from a condition, per the fixed inference table.
/// Returns `None` when nothing can be inferred (the condition is skipped).
fn infer_variable_name(cond: &RawCondition) -> Option<String> {
    match cond.kind.as_str() {
        "boolean_flag" if cond.parameter.is_some() => cond.parameter.clone(),
        "time_window" => Some("days_since_purchase".to_string()),
        "amount_threshold" => Some("refund_amount".to_string()),
        "product_category" => Some("product_category".to_string()),
        "customer_tier" => Some("customer_tier".to_string()),
        "geographic" => Some("region".to_string()),
        "role_requirement" => Some("role".to_string()),
        _ => {
            if let Some(param) = &cond.parameter {
                Some(param.clone())
            } else {
                cond.target.as_ref().map(|t| format!("{}_{}", cond.kind, t))
            }
        }
    }
}

/// Derive the variable type from the condition kind, falling back to the
/// literal's own type.
fn infer_variable_type(cond: &RawCondition) -> VarType {
    match cond.kind.as_str() {
        "boolean_flag" => VarType::Bool,
        "time_window" | "role_requirement" => VarType::Int,
        "amount_threshold" => VarType::Float,
        "product_category" | "customer_tier" | "geographic" => VarType::Enum,
        _ => match &cond.value {
            Some(Value::Bool(_)) => VarType::Bool,
            Some(Value::Int(_)) => VarType::Int,
            Some(Value::Float(_)) => VarType::Float,
            _ => VarType::Enum,
        },
    }
}

/// Map extractor action kinds to the normalised action qualifier; unknown
/// kinds pass through verbatim.
fn infer_action_value(action_kind: &str) -> String {
    match action_kind {
        "required" => "full".to_string(),
        "fallback" => "partial".to_string(),
        "conditional" => "conditional".to_string(),
        "other" => "unknown".to_string(),
        other => other.to_string(),
    }
}

/// Reject ill-typed tests at IR build time rather than at solve time.
fn check_test_types(
    policy_id: &str,
    var: &str,
    var_type: VarType,
    op: TestOp,
    value: &Value,
) -> Result<(), CompileError> {
    if op.is_ordering() && !var_type.supports_ordering() {
        return Err(CompileError::UnsupportedOperator {
            policy_id: policy_id.to_string(),
            var: var.to_string(),
            var_type,
            op,
        });
    }
    let ok = match var_type {
        VarType::Bool => matches!(value, Value::Bool(_)),
        VarType::Int => matches!(value, Value::Int(_)),
        VarType::Float => matches!(value, Value::Int(_) | Value::Float(_)),
        VarType::Enum => matches!(value, Value::Str(_)),
    };
    if ok {
        Ok(())
    } else {
        Err(CompileError::TypeMismatch {
            policy_id: policy_id.to_string(),
            var: var.to_string(),
            var_type,
            value_kind: value.kind(),
        })
    }
}

/// Convert one raw condition into a typed IR condition. A boolean flag with
/// missing operator/value defaults to `== true`; a condition missing both
/// operator and value is skipped (`None`).
fn condition_to_ir(
    policy_id: &str,
    cond: &RawCondition,
    var: &str,
    var_type: VarType,
) -> Result<Option<Condition>, CompileError> {
    let mut op_str = cond.operator.clone();
    let mut value = cond.value.clone();
    if cond.kind == "boolean_flag" {
        if op_str.is_none() {
            op_str = Some("==".to_string());
        }
        if value.is_none() {
            value = Some(Value::Bool(true));
        }
    }
    let (Some(op_str), Some(value)) = (op_str, value) else {
        return Ok(None);
    };
    let op = TestOp::parse(&op_str).ok_or_else(|| CompileError::UnknownOperator {
        policy_id: policy_id.to_string(),
        op: op_str,
    })?;
    check_test_types(policy_id, var, var_type, op, &value)?;
    Ok(Some(Condition { var: var.to_string(), op, value }))
}

fn constraint_id(policy_id: &str, action: &str) -> String {
    format!("C_{}_{}", policy_id, action)
}

/// Build the typed IR from a sequence of raw policy records.
///
/// Variable inference follows the fixed table; enum value sets are the
/// sorted de-duplication of every literal seen in `value` and `target`
/// positions across all rules. Prohibited actions become `NOT(...)`
/// constraints with scope `always`; unvalidated discovered patterns are
/// dropped silently.
pub fn build_ir(records: &[RawPolicyRecord]) -> Result<PolicyIr, CompileError> {
    let mut variables: BTreeMap<String, VariableSchema> = BTreeMap::new();
    let mut enum_values: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut conditional_rules: Vec<ConditionalRule> = Vec::new();
    let mut constraints: Vec<Constraint> = Vec::new();

    for record in records {
        let policy_id = record.policy_id.as_str();
        let metadata = record.metadata.clone();

        let mut ir_conditions: Vec<Condition> = Vec::new();
        for cond in &record.conditions {
            let Some(var) = infer_variable_name(cond) else {
                continue;
            };
            let var_type = infer_variable_type(cond);

            let declared = variables.entry(var.clone()).or_insert_with(|| {
                let description = cond
                    .source_text
                    .clone()
                    .unwrap_or_else(|| format!("{} variable", cond.kind));
                VariableSchema {
                    var_type,
                    description,
                    values: (var_type == VarType::Enum).then(Vec::new),
                }
            });
            let declared_type = declared.var_type;

            if declared_type == VarType::Enum {
                let seen = enum_values.entry(var.clone()).or_default();
                if let Some(Value::Str(s)) = &cond.value {
                    seen.insert(s.clone());
                }
                if let Some(target) = &cond.target {
                    seen.insert(target.clone());
                }
            }

            if let Some(ir_cond) = condition_to_ir(policy_id, cond, &var, declared_type)? {
                ir_conditions.push(ir_cond);
            }
        }

        for act in &record.actions {
            emit_action(
                policy_id,
                act,
                record,
                &ir_conditions,
                &metadata,
                &mut conditional_rules,
                &mut constraints,
            );
        }
    }

    for (var, seen) in enum_values {
        if let Some(schema) = variables.get_mut(&var) {
            schema.values = Some(seen.into_iter().collect());
        }
    }

    Ok(PolicyIr { variables, conditional_rules, constraints })
}

fn emit_action(
    policy_id: &str,
    act: &RawAction,
    record: &RawPolicyRecord,
    ir_conditions: &[Condition],
    metadata: &mandate_core::schema::RuleMetadata,
    conditional_rules: &mut Vec<ConditionalRule>,
    constraints: &mut Vec<Constraint>,
) {
    if act.kind == "prohibited" {
        constraints.push(Constraint {
            policy_id: constraint_id(policy_id, &act.action),
            constraint: format!("NOT({})", act.action),
            scope: "always".to_string(),
            metadata: metadata.clone(),
        });
        return;
    }

    if act.kind == "discovered_pattern" {
        let validated = record.discovery.as_ref().is_some_and(|d| d.human_validated);
        if !validated {
            return;
        }
    }

    if !ir_conditions.is_empty() || !act.requires.is_empty() {
        conditional_rules.push(ConditionalRule {
            policy_id: policy_id.to_string(),
            conditions: ir_conditions.to_vec(),
            action: IrAction {
                kind: act.action.clone(),
                value: infer_action_value(&act.kind),
            },
            metadata: metadata.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Discovery;
    use mandate_core::schema::RuleMetadata;

    fn record(policy_id: &str) -> RawPolicyRecord {
        RawPolicyRecord {
            policy_id: policy_id.to_string(),
            conditions: Vec::new(),
            actions: Vec::new(),
            metadata: RuleMetadata::default(),
            discovery: None,
            canonical_actions: None,
        }
    }

    fn bool_flag(param: &str) -> RawCondition {
        RawCondition {
            kind: "boolean_flag".to_string(),
            parameter: Some(param.to_string()),
            ..RawCondition::default()
        }
    }

    #[test]
    fn boolean_flag_defaults_to_eq_true() {
        let mut r = record("P1");
        r.conditions.push(bool_flag("has_receipt"));
        r.actions.push(RawAction {
            kind: "required".into(),
            action: "issue_refund".into(),
            requires: Vec::new(),
        });
        let ir = build_ir(&[r]).unwrap();
        assert_eq!(ir.variables["has_receipt"].var_type, VarType::Bool);
        let rule = &ir.conditional_rules[0];
        assert_eq!(rule.conditions.len(), 1);
        assert_eq!(rule.conditions[0].op, TestOp::Eq);
        assert_eq!(rule.conditions[0].value, Value::Bool(true));
        assert_eq!(rule.action.leaf(), "issue_refund:full");
    }

    #[test]
    fn fixed_table_names_and_types() {
        let mut r = record("P1");
        r.conditions.push(RawCondition {
            kind: "time_window".into(),
            operator: Some("<=".into()),
            value: Some(Value::Int(30)),
            ..RawCondition::default()
        });
        r.conditions.push(RawCondition {
            kind: "amount_threshold".into(),
            operator: Some("<".into()),
            value: Some(Value::Float(500.0)),
            ..RawCondition::default()
        });
        r.conditions.push(RawCondition {
            kind: "geographic".into(),
            operator: Some("==".into()),
            value: Some(Value::Str("eu".into())),
            ..RawCondition::default()
        });
        r.actions.push(RawAction {
            kind: "conditional".into(),
            action: "route".into(),
            requires: Vec::new(),
        });
        let ir = build_ir(&[r]).unwrap();
        assert_eq!(ir.variables["days_since_purchase"].var_type, VarType::Int);
        assert_eq!(ir.variables["refund_amount"].var_type, VarType::Float);
        assert_eq!(ir.variables["region"].var_type, VarType::Enum);
        assert_eq!(ir.conditional_rules[0].action.leaf(), "route:conditional");
    }

    #[test]
    fn enum_values_accumulate_sorted_and_deduped() {
        let mut r1 = record("P1");
        r1.conditions.push(RawCondition {
            kind: "product_category".into(),
            operator: Some("==".into()),
            value: Some(Value::Str("electronics".into())),
            target: Some("clothing".into()),
            ..RawCondition::default()
        });
        r1.actions.push(RawAction {
            kind: "required".into(),
            action: "refund".into(),
            requires: Vec::new(),
        });
        let mut r2 = record("P2");
        r2.conditions.push(RawCondition {
            kind: "product_category".into(),
            operator: Some("==".into()),
            value: Some(Value::Str("electronics".into())),
            ..RawCondition::default()
        });
        r2.actions.push(RawAction {
            kind: "fallback".into(),
            action: "store_credit".into(),
            requires: Vec::new(),
        });
        let ir = build_ir(&[r1, r2]).unwrap();
        assert_eq!(
            ir.variables["product_category"].values.as_deref(),
            Some(["clothing".to_string(), "electronics".to_string()].as_slice())
        );
    }

    #[test]
    fn prohibited_action_becomes_always_constraint() {
        let mut r = record("SEC-9");
        r.actions.push(RawAction {
            kind: "prohibited".into(),
            action: "disclose_pii".into(),
            requires: Vec::new(),
        });
        let ir = build_ir(&[r]).unwrap();
        assert!(ir.conditional_rules.is_empty());
        let c = &ir.constraints[0];
        assert_eq!(c.policy_id, "C_SEC-9_disclose_pii");
        assert_eq!(c.constraint, "NOT(disclose_pii)");
        assert_eq!(c.scope, "always");
        assert_eq!(c.forbidden_token(), Some("disclose_pii"));
    }

    #[test]
    fn unvalidated_discovery_is_dropped() {
        let mut r = record("D1");
        r.conditions.push(bool_flag("flagged"));
        r.discovery = Some(Discovery { human_validated: false });
        r.actions.push(RawAction {
            kind: "discovered_pattern".into(),
            action: "route_vip".into(),
            requires: Vec::new(),
        });
        let ir = build_ir(&[r.clone()]).unwrap();
        assert!(ir.conditional_rules.is_empty());

        r.discovery = Some(Discovery { human_validated: true });
        let ir = build_ir(&[r]).unwrap();
        assert_eq!(ir.conditional_rules.len(), 1);
    }

    #[test]
    fn unconvertible_condition_is_skipped_silently() {
        let mut r = record("P1");
        // No operator, no value, not a boolean flag: skipped.
        r.conditions.push(RawCondition {
            kind: "customer_tier".into(),
            ..RawCondition::default()
        });
        r.actions.push(RawAction {
            kind: "required".into(),
            action: "upgrade".into(),
            requires: vec!["manager_signoff".into()],
        });
        let ir = build_ir(&[r]).unwrap();
        // The variable is still declared, the condition is not emitted, and
        // the rule survives via its non-empty requires list.
        assert!(ir.variables.contains_key("customer_tier"));
        assert!(ir.conditional_rules[0].conditions.is_empty());
    }

    #[test]
    fn ordering_on_enum_is_fatal() {
        let mut r = record("P1");
        r.conditions.push(RawCondition {
            kind: "product_category".into(),
            operator: Some("<".into()),
            value: Some(Value::Str("electronics".into())),
            ..RawCondition::default()
        });
        let err = build_ir(&[r]).unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedOperator { .. }));
    }

    #[test]
    fn type_mismatch_is_fatal() {
        let mut r = record("P1");
        r.conditions.push(RawCondition {
            kind: "time_window".into(),
            operator: Some("<=".into()),
            value: Some(Value::Str("thirty".into())),
            ..RawCondition::default()
        });
        let err = build_ir(&[r]).unwrap_err();
        assert!(matches!(err, CompileError::TypeMismatch { .. }));
    }

    #[test]
    fn unknown_operator_is_fatal() {
        let mut r = record("P1");
        r.conditions.push(RawCondition {
            kind: "time_window".into(),
            operator: Some("~=".into()),
            value: Some(Value::Int(3)),
            ..RawCondition::default()
        });
        let err = build_ir(&[r]).unwrap_err();
        assert!(matches!(err, CompileError::UnknownOperator { .. }));
    }

    #[test]
    fn fallback_inference_uses_parameter_then_target() {
        let mut r = record("P1");
        r.conditions.push(RawCondition {
            kind: "loyalty".into(),
            parameter: Some("loyalty_years".into()),
            operator: Some(">=".into()),
            value: Some(Value::Int(2)),
            ..RawCondition::default()
        });
        r.conditions.push(RawCondition {
            kind: "membership".into(),
            target: Some("gold".into()),
            operator: Some("==".into()),
            value: Some(Value::Str("gold".into())),
            ..RawCondition::default()
        });
        r.actions.push(RawAction {
            kind: "required".into(),
            action: "discount".into(),
            requires: Vec::new(),
        });
        let ir = build_ir(&[r]).unwrap();
        assert!(ir.variables.contains_key("loyalty_years"));
        assert!(ir.variables.contains_key("membership_gold"));
        assert_eq!(ir.variables["loyalty_years"].var_type, VarType::Int);
        assert_eq!(ir.variables["membership_gold"].var_type, VarType::Enum);
    }
}

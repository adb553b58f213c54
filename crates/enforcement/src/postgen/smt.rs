//! SMT fact verification: extract typed facts from the response, then check
//! them against the retrieved rules, constraints, and compiled paths.
//!
//! Fact extraction is hybrid: deterministic regex first, with an LLM
//! fallback only when regex covers fewer than half of the declared
//! variables. Regex wins on collision, keeping the symbolic path primary.

use crate::pregen::EnforcementContext;
use crate::transport::LlmTransport;
use mandate_core::report::{SmtResult, SmtViolation};
use mandate_core::schema::{
    CompiledBundle, CompiledPath, ConditionalRule, Constraint, VarType, VariableSchema,
};
use mandate_core::value::Value;
use regex::Regex;
use solver::Cube;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Extracted facts: variable name to asserted value.
pub type Facts = BTreeMap<String, Value>;

fn readable(var: &str) -> String {
    var.replace('_', " ")
}

/// For boolean variables named like `has_receipt`, the entity the phrase
/// patterns look for is the part after the verb ("receipt").
fn bool_entity(readable: &str) -> &str {
    readable
        .strip_prefix("has ")
        .or_else(|| readable.strip_prefix("have "))
        .or_else(|| readable.strip_prefix("is "))
        .unwrap_or(readable)
}

fn extract_bool(response: &str, var: &str) -> Option<bool> {
    let readable = readable(var);
    let entity = regex::escape(bool_entity(&readable));
    let name = regex::escape(&readable);

    let negatives = [
        format!(r"(?i)\bno\s+{}\b", entity),
        format!(r"(?i)\bwithout\s+{}\b", entity),
        format!(r"(?i)\bnot\s+{}\b", entity),
        format!(r"(?i)\b{}\b.*\b(?:false|no|missing|without|not)\b", name),
    ];
    for pat in &negatives {
        if Regex::new(pat).is_ok_and(|re| re.is_match(response)) {
            return Some(false);
        }
    }
    let positives = [
        format!(r"(?i)\b(?:has|have|with)\s+{}\b", entity),
        format!(r"(?i)\b{}\b\s*(?:is\s+)?(?:confirmed|verified|provided)\b", entity),
        format!(r"(?i)\b{}\b.*\b(?:true|yes|provided|confirmed|verified)\b", name),
    ];
    for pat in &positives {
        if Regex::new(pat).is_ok_and(|re| re.is_match(response)) {
            return Some(true);
        }
    }
    None
}

fn extract_int(response: &str, var: &str) -> Option<i64> {
    let name = regex::escape(&readable(var));
    let raw = regex::escape(var);
    let near = format!(r"(?i)(?:{}|{})\D*?(\d+)", name, raw);
    if let Some(caps) = Regex::new(&near).ok().and_then(|re| re.captures(response)) {
        return caps[1].parse().ok();
    }
    if var.contains("day") {
        // "N days" anywhere in the text.
        if let Some(caps) =
            Regex::new(r"(?i)(\d+)\s*days?\b").ok().and_then(|re| re.captures(response))
        {
            return caps[1].parse().ok();
        }
    }
    None
}

fn extract_float(response: &str, var: &str) -> Option<f64> {
    let name = regex::escape(&readable(var));
    let raw = regex::escape(var);
    let near = format!(r"(?i)(?:{}|{})[^0-9]*?([0-9][0-9,.]*)", name, raw);
    if let Some(caps) = Regex::new(&near).ok().and_then(|re| re.captures(response)) {
        if let Ok(v) = caps[1].replace(',', "").trim_end_matches('.').parse() {
            return Some(v);
        }
    }
    if var.contains("amount") {
        // Dollar-prefixed amounts.
        if let Some(caps) =
            Regex::new(r"\$\s*([0-9][0-9,.]*)").ok().and_then(|re| re.captures(response))
        {
            if let Ok(v) = caps[1].replace(',', "").trim_end_matches('.').parse() {
                return Some(v);
            }
        }
    }
    None
}

fn extract_enum(response_lower: &str, schema: &VariableSchema) -> Option<String> {
    let values = schema.values.as_ref()?;
    values
        .iter()
        .find(|v| response_lower.contains(&v.to_lowercase()))
        .cloned()
}

/// Hybrid fact extraction over every declared variable.
#[must_use]
pub fn extract_facts(
    response: &str,
    variables: &BTreeMap<String, VariableSchema>,
    transport: Option<&dyn LlmTransport>,
) -> Facts {
    let lower = response.to_lowercase();
    let mut facts = Facts::new();

    for (var, schema) in variables {
        let extracted = match schema.var_type {
            VarType::Bool => extract_bool(response, var).map(Value::Bool),
            VarType::Int => extract_int(response, var).map(Value::Int),
            VarType::Float => extract_float(response, var).map(Value::Float),
            VarType::Enum => extract_enum(&lower, schema).map(Value::Str),
        };
        if let Some(value) = extracted {
            facts.insert(var.clone(), value);
        }
    }

    // Neural fallback only when the symbolic pass covers under half of the
    // schema; regex-extracted facts win on collision.
    if facts.len() * 2 < variables.len() {
        if let Some(transport) = transport {
            merge_llm_facts(response, variables, transport, &mut facts);
        }
    }

    facts
}

fn merge_llm_facts(
    response: &str,
    variables: &BTreeMap<String, VariableSchema>,
    transport: &dyn LlmTransport,
    facts: &mut Facts,
) {
    let descriptions: BTreeMap<&str, (&str, &str)> = variables
        .iter()
        .map(|(k, v)| {
            (
                k.as_str(),
                (
                    match v.var_type {
                        VarType::Bool => "bool",
                        VarType::Int => "int",
                        VarType::Float => "float",
                        VarType::Enum => "enum",
                    },
                    v.description.as_str(),
                ),
            )
        })
        .collect();
    let prompt = format!(
        "Given these variables: {:?}\n\
         What values does this response assert?\n\
         Response: {}\n\
         Return JSON: {{\"facts\": {{...}}}} mapping variable names to values. \
         Only include variables with clear values.",
        descriptions, response
    );
    match transport.invoke_json(&prompt) {
        Ok(v) => {
            let Some(map) = v.get("facts").and_then(|f| f.as_object()) else {
                return;
            };
            for (k, jv) in map {
                if !variables.contains_key(k) || facts.contains_key(k) {
                    continue;
                }
                if let Ok(value) = serde_json::from_value::<Value>(jv.clone()) {
                    facts.insert(k.clone(), value);
                }
            }
        }
        Err(e) => warn!(error = %e, "fact-extraction fallback unavailable"),
    }
}

/// Check extracted facts against rules, constraints, and paths.
///
/// Scoring: any constraint breach scores 0; an uncovered case alone scores
/// 0.5; otherwise 1. Callers handle the empty-facts case separately.
#[must_use]
pub fn verify_facts(
    facts: &Facts,
    rules: &[ConditionalRule],
    paths: &[CompiledPath],
    constraints: &[Constraint],
    variables: &BTreeMap<String, VariableSchema>,
) -> SmtResult {
    let mut violations: Vec<SmtViolation> = Vec::new();

    // Rule consistency: check whether each retrieved rule can still fire
    // given the asserted facts. The result is informational; a rule the
    // facts rule out is not itself a violation.
    for rule in rules {
        let mut cube = Cube::new(variables);
        assert_facts(&mut cube, facts);
        let mut well_typed = true;
        for cond in &rule.conditions {
            if cube.assert_test(&cond.var, cond.op, &cond.value).is_err() {
                well_typed = false;
                break;
            }
        }
        if well_typed && !cube.is_satisfiable() {
            debug!(policy_id = %rule.policy_id, "rule cannot fire given extracted facts");
        }
    }

    // Constraint breaches: a forbidden token appearing among the facts or
    // their values scores zero.
    for constraint in constraints {
        let Some(token) = constraint.forbidden_token() else {
            continue;
        };
        let spaced = token.to_lowercase().replace('_', " ");
        let raw = token.to_lowercase();
        let in_keys = facts.keys().any(|k| {
            let kl = k.to_lowercase();
            kl == raw || kl.replace('_', " ") == spaced
        });
        let in_values = facts.values().any(|v| {
            let vl = v.to_string().to_lowercase();
            vl.contains(&raw) || vl.contains(&spaced)
        });
        if in_keys || in_values {
            violations.push(SmtViolation {
                policy_id: constraint.policy_id.clone(),
                violation_type: "constraint_breach".to_string(),
                constraint: Some(constraint.constraint.clone()),
                message: None,
            });
        }
    }

    // Path coverage: at least one applicable path must be fully saturated
    // by the facts.
    if !paths.is_empty() {
        let covered = paths.iter().any(|p| {
            let saturated = p.path.iter().all(|step| facts.contains_key(&step.var));
            if !saturated {
                return false;
            }
            let mut cube = Cube::new(variables);
            assert_facts(&mut cube, facts);
            if cube.assert_path(&p.path).is_err() {
                return false;
            }
            cube.is_satisfiable()
        });
        if !covered {
            violations.push(SmtViolation {
                policy_id: "path_coverage".to_string(),
                violation_type: "uncovered_case".to_string(),
                constraint: None,
                message: Some(
                    "response facts do not match any compiled decision path".to_string(),
                ),
            });
        }
    }

    let breach = violations.iter().any(|v| v.violation_type == "constraint_breach");
    let uncovered = violations.iter().any(|v| v.violation_type == "uncovered_case");
    let score = if breach {
        0.0
    } else if uncovered {
        0.5
    } else {
        1.0
    };
    SmtResult { passed: violations.is_empty(), violations, score }
}

fn assert_facts(cube: &mut Cube<'_>, facts: &Facts) {
    for (var, value) in facts {
        // Ill-typed LLM-sourced facts are dropped rather than propagated.
        let _ = cube.assert_value(var, value);
    }
}

/// Full SMT verification for one response. No extractable facts means an
/// uncertainty penalty: passed with score 0.8.
#[must_use]
pub fn run_smt_check(
    response: &str,
    context: &EnforcementContext,
    bundle: &CompiledBundle,
    transport: Option<&dyn LlmTransport>,
) -> SmtResult {
    let facts = extract_facts(response, &bundle.variables, transport);
    if facts.is_empty() {
        return SmtResult { passed: true, violations: Vec::new(), score: 0.8 };
    }
    verify_facts(
        &facts,
        &context.applicable_rules,
        &context.applicable_paths,
        &context.applicable_constraints,
        &bundle.variables,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use mandate_core::schema::{PathStep, RuleMetadata, Test, TestOp};

    fn variables() -> BTreeMap<String, VariableSchema> {
        let mut m = BTreeMap::new();
        m.insert("has_receipt".to_string(), VariableSchema::of(VarType::Bool));
        m.insert("days_since_purchase".to_string(), VariableSchema::of(VarType::Int));
        m.insert("refund_amount".to_string(), VariableSchema::of(VarType::Float));
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

    #[test]
    fn bool_positive_and_negative_phrases() {
        let vars = variables();
        let facts = extract_facts("The customer has receipt for this purchase.", &vars, None);
        assert_eq!(facts.get("has_receipt"), Some(&Value::Bool(true)));

        let facts = extract_facts("The customer is without receipt.", &vars, None);
        assert_eq!(facts.get("has_receipt"), Some(&Value::Bool(false)));

        let facts = extract_facts("There is no receipt on file.", &vars, None);
        assert_eq!(facts.get("has_receipt"), Some(&Value::Bool(false)));
    }

    #[test]
    fn numeric_extraction_near_name_and_day_fallback() {
        let vars = variables();
        let facts = extract_facts("Days since purchase: 10.", &vars, None);
        assert_eq!(facts.get("days_since_purchase"), Some(&Value::Int(10)));

        let facts = extract_facts("It was bought 12 days ago.", &vars, None);
        assert_eq!(facts.get("days_since_purchase"), Some(&Value::Int(12)));
    }

    #[test]
    fn float_extraction_with_dollar_fallback() {
        let vars = variables();
        let facts = extract_facts("The refund amount is 99.50 in store credit.", &vars, None);
        assert_eq!(facts.get("refund_amount"), Some(&Value::Float(99.50)));

        let facts = extract_facts("We can credit $1,299.99 to your card... ", &vars, None);
        assert_eq!(facts.get("refund_amount"), Some(&Value::Float(1299.99)));
    }

    #[test]
    fn enum_extraction_picks_first_declared_match() {
        let vars = variables();
        let facts = extract_facts("This Electronics item qualifies.", &vars, None);
        assert_eq!(facts.get("product_category"), Some(&Value::Str("electronics".into())));
    }

    #[test]
    fn no_facts_scores_uncertainty_penalty() {
        let vars = variables();
        let ctx = empty_context();
        let bundle = bundle_with(vars);
        let r = run_smt_check("The weather is nice today.", &ctx, &bundle, None);
        assert!(r.passed);
        assert!((r.score - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn constraint_breach_scores_zero() {
        let vars = variables();
        let mut facts = Facts::new();
        facts.insert("product_category".into(), Value::Str("electronics".into()));
        facts.insert("disclose_pii".into(), Value::Bool(true));
        let constraints = vec![Constraint {
            policy_id: "C_SEC".into(),
            constraint: "NOT(disclose_pii)".into(),
            scope: "always".into(),
            metadata: RuleMetadata::default(),
        }];
        let r = verify_facts(&facts, &[], &[], &constraints, &vars);
        assert!(!r.passed);
        assert!((r.score - 0.0).abs() < f64::EPSILON);
        assert_eq!(r.violations[0].violation_type, "constraint_breach");
    }

    #[test]
    fn uncovered_case_scores_half() {
        let vars = variables();
        let mut facts = Facts::new();
        facts.insert("days_since_purchase".into(), Value::Int(10));
        let path = CompiledPath {
            policy_id: "P1".into(),
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
            leaf_action: "refund:full".into(),
            metadata: RuleMetadata::default(),
        };
        let r = verify_facts(&facts, &[], &[path], &[], &vars);
        assert!(!r.passed);
        assert!((r.score - 0.5).abs() < f64::EPSILON);
        assert_eq!(r.violations[0].violation_type, "uncovered_case");
    }

    #[test]
    fn saturated_consistent_path_scores_one() {
        let vars = variables();
        let mut facts = Facts::new();
        facts.insert("has_receipt".into(), Value::Bool(true));
        facts.insert("days_since_purchase".into(), Value::Int(10));
        let path = CompiledPath {
            policy_id: "P1".into(),
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
            leaf_action: "refund:full".into(),
            metadata: RuleMetadata::default(),
        };
        let r = verify_facts(&facts, &[], &[path], &[], &vars);
        assert!(r.passed);
        assert!((r.score - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn contradicting_facts_leave_path_uncovered() {
        let vars = variables();
        let mut facts = Facts::new();
        facts.insert("has_receipt".into(), Value::Bool(false));
        facts.insert("days_since_purchase".into(), Value::Int(10));
        let path = CompiledPath {
            policy_id: "P1".into(),
            path: vec![PathStep {
                var: "has_receipt".into(),
                tests: vec![Test { op: TestOp::Eq, value: Value::Bool(true) }],
            }],
            leaf_action: "refund:full".into(),
            metadata: RuleMetadata::default(),
        };
        let r = verify_facts(&facts, &[], &[path], &[], &vars);
        assert_eq!(r.violations[0].violation_type, "uncovered_case");
    }

    fn empty_context() -> EnforcementContext {
        EnforcementContext {
            session_id: "s".into(),
            query: "q".into(),
            domain: "returns".into(),
            intent: "other".into(),
            domain_confidence: 1.0,
            applicable_rules: Vec::new(),
            applicable_constraints: Vec::new(),
            applicable_paths: Vec::new(),
            dominance_applied: Vec::new(),
            escalation_contacts: Vec::new(),
            timestamp: "t".into(),
        }
    }

    fn bundle_with(variables: BTreeMap<String, VariableSchema>) -> CompiledBundle {
        CompiledBundle {
            schema_version: "1.0".into(),
            variables,
            conditional_rules: Vec::new(),
            constraints: Vec::new(),
            decision_nodes: Vec::new(),
            node_schema: BTreeMap::new(),
            leaf_actions: Vec::new(),
            compiled_paths: Vec::new(),
            dominance_rules: Vec::new(),
            escalations: Vec::new(),
            canonical_action_map: Vec::new(),
            priority_lattice: mandate_core::priority::default_lattice(),
            bundle_metadata: mandate_core::schema::BundleMetadata::default(),
        }
    }
}

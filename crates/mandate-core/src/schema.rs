//! Bundle schema types: variables, tests, rules, constraints, compiled paths,
//! dominance rules, escalations, and the compiled bundle itself.
//!
//! The bundle is a tree; the only cross-references are by identifier (policy
//! ids, variable names), so entities live in flat tables and resolve by
//! lookup. Every map is a `BTreeMap` so serialisation is deterministic.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Variable type. Ordering operators are ill-typed for `Bool` and `Enum`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarType {
    Bool,
    Int,
    Float,
    Enum,
}

impl VarType {
    /// Whether `<`, `<=`, `>`, `>=` are well-typed for this variable type.
    #[must_use]
    pub fn supports_ordering(self) -> bool {
        matches!(self, VarType::Int | VarType::Float)
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VarType::Bool => "bool",
            VarType::Int => "int",
            VarType::Float => "float",
            VarType::Enum => "enum",
        };
        f.write_str(s)
    }
}

/// Declared variable: type, optional description, closed value set for enums.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSchema {
    #[serde(rename = "type")]
    pub var_type: VarType,
    #[serde(default)]
    pub description: String,
    /// Closed value list; present only for `enum` variables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
}

impl VariableSchema {
    /// A variable with no description and no enum values.
    #[must_use]
    pub fn of(var_type: VarType) -> Self {
        Self { var_type, description: String::new(), values: None }
    }
}

/// Comparison operator for tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

impl TestOp {
    /// Parse the surface form; returns `None` for unknown operators.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "==" => Some(TestOp::Eq),
            "!=" => Some(TestOp::Ne),
            "<" => Some(TestOp::Lt),
            "<=" => Some(TestOp::Le),
            ">" => Some(TestOp::Gt),
            ">=" => Some(TestOp::Ge),
            _ => None,
        }
    }

    /// Surface form of the operator.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TestOp::Eq => "==",
            TestOp::Ne => "!=",
            TestOp::Lt => "<",
            TestOp::Le => "<=",
            TestOp::Gt => ">",
            TestOp::Ge => ">=",
        }
    }

    /// Whether this operator imposes an ordering (ill-typed for bool/enum).
    #[must_use]
    pub fn is_ordering(self) -> bool {
        matches!(self, TestOp::Lt | TestOp::Le | TestOp::Gt | TestOp::Ge)
    }
}

impl fmt::Display for TestOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A test bound to a variable: `var op value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub var: String,
    pub op: TestOp,
    pub value: Value,
}

/// An unbound test, as carried inside a compiled path step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Test {
    pub op: TestOp,
    pub value: Value,
}

/// Rule action: the action phrase plus its normalised qualifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrAction {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl IrAction {
    /// Canonical leaf form `"<type>:<value>"`.
    #[must_use]
    pub fn leaf(&self) -> String {
        format!("{}:{}", self.kind, self.value)
    }
}

/// Rule provenance and governance metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleMetadata {
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default)]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_date: Option<String>,
    #[serde(default)]
    pub regulatory_linkage: Vec<String>,
}

impl Default for RuleMetadata {
    fn default() -> Self {
        Self {
            domain: default_domain(),
            priority: default_priority(),
            owner: None,
            source: String::new(),
            effective_date: None,
            regulatory_linkage: Vec::new(),
        }
    }
}

fn default_domain() -> String {
    "other".to_string()
}

fn default_priority() -> String {
    "company".to_string()
}

fn default_scope() -> String {
    "always".to_string()
}

/// A conditional rule: `IF conditions THEN action`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalRule {
    pub policy_id: String,
    pub conditions: Vec<Condition>,
    pub action: IrAction,
    pub metadata: RuleMetadata,
}

/// An invariant constraint: scope `always` or a domain name, plus a textual
/// predicate. `NOT(<token>)` predicates carry a machine-checkable prohibition;
/// all other text is opaque to this layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub policy_id: String,
    pub constraint: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    pub metadata: RuleMetadata,
}

impl Constraint {
    /// The forbidden token of a `NOT(<token>)` predicate, if this constraint
    /// has that surface form.
    #[must_use]
    pub fn forbidden_token(&self) -> Option<&str> {
        self.constraint.strip_prefix("NOT(").and_then(|rest| rest.strip_suffix(')'))
    }
}

/// One step of a compiled path: all tests a rule imposes on one variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathStep {
    pub var: String,
    pub tests: Vec<Test>,
}

/// A rule rendered in canonical variable order with its leaf action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledPath {
    pub policy_id: String,
    pub path: Vec<PathStep>,
    pub leaf_action: String,
    pub metadata: RuleMetadata,
}

/// How a dominance rule combines the winning and losing actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DominanceMode {
    /// Winner's action replaces the loser's action.
    Override,
    /// Loser's action becomes a gating step before the winner's.
    Compose,
}

/// Trigger side of a dominance rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DominanceTrigger {
    pub policies_fire: Vec<String>,
}

/// Outcome side of a dominance rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DominanceOutcome {
    pub mode: DominanceMode,
    pub enforce: String,
    #[serde(default)]
    pub notes: String,
}

/// A deterministic winner for a known pair of conflicting policies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DominanceRule {
    pub when: DominanceTrigger,
    pub then: DominanceOutcome,
}

impl DominanceRule {
    /// Unordered pair key `(min, max)` over the triggering policy ids.
    #[must_use]
    pub fn pair_key(&self) -> (String, String) {
        pair_key(&self.when.policies_fire)
    }
}

/// Normalise a policy-id list into an unordered `(min, max)` pair key.
#[must_use]
pub fn pair_key(policies: &[String]) -> (String, String) {
    let mut sorted: Vec<&String> = policies.iter().collect();
    sorted.sort();
    match sorted.as_slice() {
        [] => (String::new(), String::new()),
        [only] => ((*only).clone(), (*only).clone()),
        [first, .., last] => ((*first).clone(), (*last).clone()),
    }
}

/// Evidence attached to an escalation: a solver witness or a free-form note.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub witness: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Evidence {
    /// Evidence carrying a concrete witness assignment.
    #[must_use]
    pub fn witness(witness: BTreeMap<String, Value>) -> Self {
        Self { witness: Some(witness), note: None }
    }

    /// Evidence carrying only a note.
    #[must_use]
    pub fn note(note: impl Into<String>) -> Self {
        Self { witness: None, note: Some(note.into()) }
    }
}

/// A conflict the engine could not resolve, surfaced to named owners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    pub conflict_type: String,
    pub policies: Vec<String>,
    pub actions: Vec<String>,
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub owners_to_notify: Vec<String>,
    #[serde(default)]
    pub evidence: Evidence,
    #[serde(default)]
    pub recommended_next_step: String,
}

/// Canonical action cluster carried through from upstream discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalActionEntry {
    pub policy_id: String,
    pub canonical_actions: Vec<String>,
}

/// Generation provenance and entity counts for a compiled bundle.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BundleMetadata {
    #[serde(default)]
    pub generated_on: String,
    #[serde(default)]
    pub generator: String,
    #[serde(default)]
    pub policy_count: usize,
    #[serde(default)]
    pub rule_count: usize,
    #[serde(default)]
    pub constraint_count: usize,
    #[serde(default)]
    pub path_count: usize,
}

/// The frozen compilation artefact. Immutable once written; the loader
/// verifies cross-references on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledBundle {
    pub schema_version: String,
    pub variables: BTreeMap<String, VariableSchema>,
    pub conditional_rules: Vec<ConditionalRule>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub decision_nodes: Vec<String>,
    #[serde(default)]
    pub node_schema: BTreeMap<String, VariableSchema>,
    #[serde(default)]
    pub leaf_actions: Vec<String>,
    #[serde(default)]
    pub compiled_paths: Vec<CompiledPath>,
    #[serde(default)]
    pub dominance_rules: Vec<DominanceRule>,
    #[serde(default)]
    pub escalations: Vec<Escalation>,
    #[serde(default)]
    pub canonical_action_map: Vec<CanonicalActionEntry>,
    #[serde(default = "crate::priority::default_lattice")]
    pub priority_lattice: BTreeMap<String, u32>,
    #[serde(default)]
    pub bundle_metadata: BundleMetadata,
}

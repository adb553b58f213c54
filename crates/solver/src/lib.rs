//! Deterministic satisfiability core for quantifier-free policy tests.
//!
//! Every test in the IR is a comparison of one variable against one literal,
//! so a conjunction of tests factorises into one domain per variable:
//! a truth-value pair for `bool`, an integer interval with exclusions for
//! `int`, a real interval with exclusions for `float`, and a value set for
//! `enum` (uninterpreted strings with equality only). A conjunction is
//! satisfiable iff every per-variable domain is non-empty, which makes the
//! procedure complete for the IR's expressiveness.
//!
//! Determinism: the solver is single-threaded and seed-free; witness
//! materialisation always picks the least admissible value per variable, so
//! identical inputs produce identical witnesses.

#![deny(unsafe_code)]

use mandate_core::schema::{PathStep, TestOp, VarType, VariableSchema};
use mandate_core::value::Value;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// A concrete assignment to every declared variable.
pub type Assignment = BTreeMap<String, Value>;

/// Errors raised while asserting tests. All are compilation-fatal for the
/// caller; a well-typed IR never triggers them.
#[derive(Debug, Error)]
pub enum SolverError {
    /// The test references a variable absent from the schema.
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),
    /// The operator is ill-typed for the variable (ordering on bool/enum).
    #[error("operator '{op}' is not supported for {var_type} variable '{var}'")]
    UnsupportedOperator {
        var: String,
        var_type: VarType,
        op: TestOp,
    },
    /// The literal's type does not match the variable's declared type.
    #[error("type mismatch: variable '{var}' is {var_type} but test value is {value_kind}")]
    TypeMismatch {
        var: String,
        var_type: VarType,
        value_kind: &'static str,
    },
}

/// One endpoint of a real interval.
#[derive(Debug, Clone, Copy)]
struct Bound {
    value: f64,
    strict: bool,
}

#[derive(Debug, Clone)]
enum Domain {
    Bool {
        can_true: bool,
        can_false: bool,
    },
    Int {
        lo: Option<i64>,
        hi: Option<i64>,
        excluded: BTreeSet<i64>,
    },
    Float {
        lo: Option<Bound>,
        hi: Option<Bound>,
        excluded: Vec<f64>,
    },
    Enum {
        declared: Vec<String>,
        allowed: Option<BTreeSet<String>>,
        excluded: BTreeSet<String>,
    },
}

impl Domain {
    fn unconstrained(schema: &VariableSchema) -> Self {
        match schema.var_type {
            VarType::Bool => Domain::Bool { can_true: true, can_false: true },
            VarType::Int => Domain::Int { lo: None, hi: None, excluded: BTreeSet::new() },
            VarType::Float => Domain::Float { lo: None, hi: None, excluded: Vec::new() },
            VarType::Enum => Domain::Enum {
                declared: schema.values.clone().unwrap_or_default(),
                allowed: None,
                excluded: BTreeSet::new(),
            },
        }
    }
}

/// A conjunction of tests over a variable schema.
///
/// Build one per query, assert tests, then check satisfiability or
/// materialise a witness. State is per-request; there is no shared solver.
#[derive(Debug, Clone)]
pub struct Cube<'a> {
    schema: &'a BTreeMap<String, VariableSchema>,
    domains: BTreeMap<String, Domain>,
}

impl<'a> Cube<'a> {
    /// Start an unconstrained cube over `schema`.
    #[must_use]
    pub fn new(schema: &'a BTreeMap<String, VariableSchema>) -> Self {
        let domains = schema
            .iter()
            .map(|(name, vs)| (name.clone(), Domain::unconstrained(vs)))
            .collect();
        Self { schema, domains }
    }

    /// Assert `var op value`. Fails fast on unknown variables, ill-typed
    /// operators, and literal/variable type mismatches.
    pub fn assert_test(
        &mut self,
        var: &str,
        op: TestOp,
        value: &Value,
    ) -> Result<(), SolverError> {
        let vs = self
            .schema
            .get(var)
            .ok_or_else(|| SolverError::UnknownVariable(var.to_string()))?;
        if op.is_ordering() && !vs.var_type.supports_ordering() {
            return Err(SolverError::UnsupportedOperator {
                var: var.to_string(),
                var_type: vs.var_type,
                op,
            });
        }
        let mismatch = || SolverError::TypeMismatch {
            var: var.to_string(),
            var_type: vs.var_type,
            value_kind: value.kind(),
        };
        let domain = self.domains.get_mut(var).expect("domain exists for schema var");
        match domain {
            Domain::Bool { can_true, can_false } => {
                let b = value.as_bool().ok_or_else(mismatch)?;
                let keep_true = match op {
                    TestOp::Eq => b,
                    TestOp::Ne => !b,
                    _ => unreachable!("ordering rejected above"),
                };
                if keep_true {
                    *can_false = false;
                } else {
                    *can_true = false;
                }
            }
            Domain::Int { lo, hi, excluded } => {
                let v = value.as_int().ok_or_else(mismatch)?;
                match op {
                    TestOp::Eq => {
                        raise_int(lo, v);
                        lower_int(hi, v);
                    }
                    TestOp::Ne => {
                        excluded.insert(v);
                    }
                    TestOp::Lt => lower_int(hi, v.saturating_sub(1)),
                    TestOp::Le => lower_int(hi, v),
                    TestOp::Gt => raise_int(lo, v.saturating_add(1)),
                    TestOp::Ge => raise_int(lo, v),
                }
            }
            Domain::Float { lo, hi, excluded } => {
                let v = value.as_float().ok_or_else(mismatch)?;
                match op {
                    TestOp::Eq => {
                        raise_float(lo, Bound { value: v, strict: false });
                        lower_float(hi, Bound { value: v, strict: false });
                    }
                    TestOp::Ne => excluded.push(v),
                    TestOp::Lt => lower_float(hi, Bound { value: v, strict: true }),
                    TestOp::Le => lower_float(hi, Bound { value: v, strict: false }),
                    TestOp::Gt => raise_float(lo, Bound { value: v, strict: true }),
                    TestOp::Ge => raise_float(lo, Bound { value: v, strict: false }),
                }
            }
            Domain::Enum { allowed, excluded, .. } => {
                let s = value.as_str().ok_or_else(mismatch)?;
                match op {
                    TestOp::Eq => match allowed {
                        Some(set) => {
                            set.retain(|x| x.as_str() == s);
                        }
                        None => {
                            *allowed = Some(BTreeSet::from([s.to_string()]));
                        }
                    },
                    TestOp::Ne => {
                        excluded.insert(s.to_string());
                    }
                    _ => unreachable!("ordering rejected above"),
                }
            }
        }
        Ok(())
    }

    /// Assert an equality fact `var == value` (used when pinning extracted
    /// facts before a satisfiability check).
    pub fn assert_value(&mut self, var: &str, value: &Value) -> Result<(), SolverError> {
        self.assert_test(var, TestOp::Eq, value)
    }

    /// Assert every test of every step in a compiled path.
    pub fn assert_path(&mut self, path: &[PathStep]) -> Result<(), SolverError> {
        for step in path {
            for test in &step.tests {
                self.assert_test(&step.var, test.op, &test.value)?;
            }
        }
        Ok(())
    }

    /// Whether the conjunction asserted so far is satisfiable.
    #[must_use]
    pub fn is_satisfiable(&self) -> bool {
        self.domains.values().all(domain_non_empty)
    }

    /// Materialise a witness covering every declared variable, or `None`
    /// when the conjunction is unsatisfiable. Unconstrained variables take
    /// their least admissible value.
    #[must_use]
    pub fn solve(&self) -> Option<Assignment> {
        if !self.is_satisfiable() {
            return None;
        }
        let witness = self
            .domains
            .iter()
            .map(|(name, d)| (name.clone(), least_value(d)))
            .collect();
        Some(witness)
    }
}

fn raise_int(lo: &mut Option<i64>, v: i64) {
    *lo = Some(lo.map_or(v, |cur| cur.max(v)));
}

fn lower_int(hi: &mut Option<i64>, v: i64) {
    *hi = Some(hi.map_or(v, |cur| cur.min(v)));
}

fn raise_float(lo: &mut Option<Bound>, b: Bound) {
    *lo = Some(match lo {
        None => b,
        Some(cur) if b.value > cur.value => b,
        Some(cur) if (b.value - cur.value).abs() < f64::EPSILON => {
            Bound { value: cur.value, strict: cur.strict || b.strict }
        }
        Some(cur) => *cur,
    });
}

fn lower_float(hi: &mut Option<Bound>, b: Bound) {
    *hi = Some(match hi {
        None => b,
        Some(cur) if b.value < cur.value => b,
        Some(cur) if (b.value - cur.value).abs() < f64::EPSILON => {
            Bound { value: cur.value, strict: cur.strict || b.strict }
        }
        Some(cur) => *cur,
    });
}

fn domain_non_empty(d: &Domain) -> bool {
    match d {
        Domain::Bool { can_true, can_false } => *can_true || *can_false,
        Domain::Int { lo, hi, excluded } => match (lo, hi) {
            (Some(l), Some(h)) => {
                if l > h {
                    return false;
                }
                let size = i128::from(*h) - i128::from(*l) + 1;
                let holes = excluded.iter().filter(|x| **x >= *l && **x <= *h).count();
                (holes as i128) < size
            }
            // One open side leaves infinitely many values; exclusions are finite.
            _ => true,
        },
        Domain::Float { lo, hi, excluded } => match (lo, hi) {
            (Some(l), Some(h)) => {
                if l.value > h.value {
                    false
                } else if (l.value - h.value).abs() < f64::EPSILON {
                    !l.strict && !h.strict && !excluded.iter().any(|x| *x == l.value)
                } else {
                    // A proper interval over the reals cannot be exhausted by
                    // finitely many point exclusions.
                    true
                }
            }
            _ => true,
        },
        Domain::Enum { allowed, excluded, .. } => match allowed {
            Some(set) => set.iter().any(|v| !excluded.contains(v)),
            None => true,
        },
    }
}

/// Least admissible value of a non-empty domain.
fn least_value(d: &Domain) -> Value {
    match d {
        Domain::Bool { can_false, .. } => Value::Bool(!*can_false),
        Domain::Int { lo, hi, excluded } => {
            let mut candidate = match (lo, hi) {
                (Some(l), _) => *l,
                (None, Some(h)) => (*h).min(0),
                (None, None) => 0,
            };
            if lo.is_none() && hi.is_some() {
                // Walk downward so the upper bound is never crossed.
                while excluded.contains(&candidate) {
                    candidate -= 1;
                }
            } else {
                while excluded.contains(&candidate) {
                    candidate += 1;
                }
            }
            Value::Int(candidate)
        }
        Domain::Float { lo, hi, excluded } => {
            let mut candidate = match (lo, hi) {
                (Some(l), Some(h)) => {
                    if (l.value - h.value).abs() < f64::EPSILON {
                        l.value
                    } else {
                        l.value + (h.value - l.value) / 2.0
                    }
                }
                (Some(l), None) => l.value + 1.0,
                (None, Some(h)) => h.value - 1.0,
                (None, None) => 0.0,
            };
            let mut steps = 0usize;
            while excluded.iter().any(|x| *x == candidate) && steps <= excluded.len() {
                candidate = match (lo, hi) {
                    (Some(_), Some(h)) => candidate + (h.value - candidate) / 2.0,
                    (None, Some(_)) => candidate - 1.0,
                    _ => candidate + 1.0,
                };
                steps += 1;
            }
            Value::Float(candidate)
        }
        Domain::Enum { declared, allowed, excluded } => {
            if let Some(set) = allowed {
                let v = set.iter().find(|v| !excluded.contains(*v));
                return Value::Str(v.cloned().unwrap_or_default());
            }
            if let Some(v) = declared.iter().find(|v| !excluded.contains(*v)) {
                return Value::Str(v.clone());
            }
            // Nothing declared survives; synthesise a fresh string.
            let mut i = 0usize;
            loop {
                let candidate = format!("value_{}", i);
                if !excluded.contains(&candidate) {
                    return Value::Str(candidate);
                }
                i += 1;
            }
        }
    }
}

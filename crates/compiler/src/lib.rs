//! Policy compiler: raw extracted records in, frozen decision artefact out.
//!
//! The pipeline runs in four pure stages (IR building in [`ir`], decision
//! graph compilation in [`graph`], conflict detection in [`conflict`],
//! priority resolution in [`resolve`]) and freezes everything into a single
//! [`mandate_core::schema::CompiledBundle`] ([`bundle`]). Compiling the same
//! records twice yields byte-identical bundles modulo the generation
//! timestamp in the bundle metadata.
//!
//! Compilation errors are fatal and carry location context (policy id or
//! record index); there is no partial output.

#![deny(unsafe_code)]

pub mod bundle;
pub mod conflict;
pub mod graph;
pub mod ir;
pub mod record;
pub mod resolve;

pub use bundle::{compile, compile_from_records, write_bundle, Compilation};
pub use conflict::{detect_conflicts, ConflictReport, LogicalConflict, SemanticConflict};
pub use graph::{build_decision_graph, DecisionGraph};
pub use ir::{build_ir, PolicyIr};
pub use record::{read_records_jsonl, RawAction, RawCondition, RawPolicyRecord};
pub use resolve::{resolve_conflicts, AutoResolution, ResolutionReport};

use mandate_core::schema::{TestOp, VarType};
use thiserror::Error;

/// Fatal compilation errors. Every variant carries enough context to locate
/// the offending input.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse: {0}")]
    Parse(#[from] serde_json::Error),
    /// A raw record failed JSON Schema validation.
    #[error("record {index}: {reason}")]
    InvalidRecord { index: usize, reason: String },
    /// Unknown comparison operator in a condition.
    #[error("policy '{policy_id}': unsupported operator '{op}'")]
    UnknownOperator { policy_id: String, op: String },
    /// Ordering operator applied to a bool or enum variable.
    #[error("policy '{policy_id}': operator '{op}' is not supported for {var_type} variable '{var}'")]
    UnsupportedOperator {
        policy_id: String,
        var: String,
        var_type: VarType,
        op: TestOp,
    },
    /// Test literal does not match the variable's declared type.
    #[error("policy '{policy_id}': type mismatch on variable '{var}' ({var_type} variable, {value_kind} literal)")]
    TypeMismatch {
        policy_id: String,
        var: String,
        var_type: VarType,
        value_kind: &'static str,
    },
    /// A rule condition mentions a variable the IR never declared. Rules
    /// cannot introduce variables at graph-compilation stage.
    #[error("policy '{policy_id}' references undeclared variable '{var}'")]
    UndeclaredVariable { policy_id: String, var: String },
    /// The solver rejected a compiled path; indicates an ill-typed IR.
    #[error("while checking '{context}': {source}")]
    Solver {
        context: String,
        #[source]
        source: solver::SolverError,
    },
}

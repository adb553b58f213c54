//! Post-generation verifiers: regex hard gate, SMT fact verification,
//! judge LLM, and decision-node coverage (the latter lives in
//! [`crate::scoring`] beside the score it feeds).
//!
//! Each check is independent and degrades to a documented neutral result on
//! failure; none of them can crash enforcement.

pub mod judge;
pub mod regex;
pub mod smt;

pub use judge::run_judge_check;
pub use regex::run_regex_check;
pub use smt::{extract_facts, run_smt_check, verify_facts, Facts};

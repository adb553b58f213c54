//! Mandate core primitives and shared types.
//!
//! Everything the compile-time and run-time halves of the engine agree on
//! lives here: the tagged [`value::Value`] variant, the variable/rule/bundle
//! schema ([`schema`]), the priority lattice ([`priority`]), the post-gen
//! report types ([`report`]), and small id/digest utilities.

#![deny(unsafe_code)]

/// Version of the mandate core library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Bundle wire-format schema version.
pub const SCHEMA_VERSION: &str = "1.0";

pub mod digest;
pub mod ids;
pub mod priority;
pub mod report;
pub mod schema;
pub mod value;

//! Runtime enforcement pipeline.
//!
//! A request flows pre-gen -> injection -> (external LLM) -> post-gen ->
//! scoring -> decision, with an audit entry written at every terminal state.
//! The compiled bundle is read-only once loaded and safe to share across
//! workers; each request owns its own solver state, and the audit log is the
//! only cross-request mutable resource.
//!
//! External LLM calls are the only suspension points, modelled as a blocking
//! [`transport::LlmTransport`]. A transport failure never propagates past
//! the scorer: each verifier degrades to its documented neutral result.

#![deny(unsafe_code)]

pub mod inject;
pub mod loader;
pub mod pipeline;
pub mod postgen;
pub mod pregen;
pub mod scoring;
pub mod transport;

pub use inject::{build_injection_bundle, format_full_prompt, InjectionBundle};
pub use loader::{load_bundle, validate_bundle_integrity, BundleIndex, LoadError};
pub use pipeline::{EnforceRequest, EnforcementConfig, Enforcer};
pub use pregen::{build_context, EnforcementContext};
pub use transport::{LlmTransport, Prompt, StaticTransport, TransportError};

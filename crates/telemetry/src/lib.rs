//! Telemetry: structured logging init and in-process decision counters.

#![deny(unsafe_code)]

use mandate_core::report::ComplianceAction;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Initialize structured logging (JSON) with env filter.
/// Set RUST_LOG, e.g., "info,enforcement=debug".
pub fn init_json_logging() {
    let fmt_layer = fmt::layer().json().with_current_span(true).with_span_list(true);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).ok();
}

/// Low-cardinality counters for terminal compliance decisions. Cheap to
/// clone; intended for tests and local observability, not persisted.
#[derive(Clone, Default)]
pub struct DecisionMetrics {
    pass: Arc<AtomicU64>,
    auto_correct: Arc<AtomicU64>,
    regenerate: Arc<AtomicU64>,
    escalate: Arc<AtomicU64>,
}

impl DecisionMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one terminal decision.
    pub fn record(&self, action: ComplianceAction) {
        let counter = match action {
            ComplianceAction::Pass => &self.pass,
            ComplianceAction::AutoCorrect => &self.auto_correct,
            ComplianceAction::Regenerate => &self.regenerate,
            ComplianceAction::Escalate => &self.escalate,
        };
        let _ = counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot `(pass, auto_correct, regenerate, escalate)` counts.
    #[must_use]
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.pass.load(Ordering::Relaxed),
            self.auto_correct.load(Ordering::Relaxed),
            self.regenerate.load(Ordering::Relaxed),
            self.escalate.load(Ordering::Relaxed),
        )
    }
}

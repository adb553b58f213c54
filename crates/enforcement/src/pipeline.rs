//! Full enforcement pipeline: pre-gen, injection, generation, post-gen,
//! routing with retry budgets, and the audit write at every terminal state.

use crate::inject::{build_injection_bundle, format_full_prompt, GenerationParams};
use crate::loader::BundleIndex;
use crate::postgen::{run_judge_check, run_regex_check, run_smt_check};
use crate::pregen::{build_context, EnforcementContext};
use crate::scoring::{build_compliance_decision, compute_coverage, THRESHOLD_PASS};
use crate::transport::{LlmTransport, Prompt};
use audit_log::{AuditEntry, AuditLogger};
use chrono::NaiveDate;
use mandate_core::digest::sha256_hex;
use mandate_core::ids;
use mandate_core::report::{
    ComplianceAction, ComplianceDecision, JudgeResult, PostGenReport, RegexResult, SmtResult,
};
use mandate_core::schema::CompiledBundle;
use serde::Deserialize;
use serde_json::json;
use std::fs::File;
use std::io::BufReader;
use telemetry::DecisionMetrics;
use tracing::{info, warn};

/// Tunable pipeline knobs. Loadable from YAML; every field has a default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnforcementConfig {
    /// Regenerate budget; exhaustion degrades to escalate.
    pub max_retries: u32,
    /// Auto-correct budget (one retry by default).
    pub auto_correct_max_attempts: u32,
    pub judge_enabled: bool,
    pub smt_enabled: bool,
    pub regex_enabled: bool,
    /// Full-pipeline wall-clock budget in milliseconds.
    pub timeout_ms: u64,
    pub generation_temperature: f64,
    pub generation_max_tokens: u32,
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            auto_correct_max_attempts: 1,
            judge_enabled: true,
            smt_enabled: true,
            regex_enabled: true,
            timeout_ms: 30_000,
            generation_temperature: 0.0,
            generation_max_tokens: 2048,
        }
    }
}

impl EnforcementConfig {
    /// Load a config from a YAML file; missing keys take their defaults.
    pub fn from_yaml_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self, String> {
        let f = File::open(&path)
            .map_err(|e| format!("failed to open config file {:?}: {}", path.as_ref(), e))?;
        let rdr = BufReader::new(f);
        serde_yaml::from_reader(rdr)
            .map_err(|e| format!("malformed YAML in config file {:?}: {}", path.as_ref(), e))
    }
}

/// One enforcement request.
#[derive(Debug, Clone, Default)]
pub struct EnforceRequest {
    pub query: String,
    /// Auto-generated when absent.
    pub session_id: Option<String>,
    /// Pre-generated response to verify; skips generation.
    pub response_override: Option<String>,
    /// Retrieval cutoff; defaults to today.
    pub effective_date: Option<NaiveDate>,
    /// Bypass the classifier with a known domain.
    pub domain: Option<String>,
}

impl EnforceRequest {
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), ..Self::default() }
    }
}

/// The runtime enforcer. Owns a read-only bundle plus its indexes; safe to
/// share behind a reference across worker threads. The audit log is the
/// only mutable resource and serialises its own writes.
pub struct Enforcer {
    bundle: CompiledBundle,
    index: BundleIndex,
    config: EnforcementConfig,
    llm: Option<Box<dyn LlmTransport>>,
    judge: Option<Box<dyn LlmTransport>>,
    audit: Option<AuditLogger>,
    metrics: DecisionMetrics,
}

impl Enforcer {
    #[must_use]
    pub fn new(bundle: CompiledBundle, index: BundleIndex) -> Self {
        Self {
            bundle,
            index,
            config: EnforcementConfig::default(),
            llm: None,
            judge: None,
            audit: None,
            metrics: DecisionMetrics::new(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: EnforcementConfig) -> Self {
        self.config = config;
        self
    }

    /// Wire the generation/classification/fact-extraction transport.
    #[must_use]
    pub fn with_transport(mut self, transport: Box<dyn LlmTransport>) -> Self {
        self.llm = Some(transport);
        self
    }

    /// Wire a dedicated judge transport (falls back to the main transport).
    #[must_use]
    pub fn with_judge_transport(mut self, transport: Box<dyn LlmTransport>) -> Self {
        self.judge = Some(transport);
        self
    }

    #[must_use]
    pub fn with_audit(mut self, audit: AuditLogger) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Decision counters across this enforcer's lifetime.
    #[must_use]
    pub fn metrics(&self) -> &DecisionMetrics {
        &self.metrics
    }

    /// Run the full pipeline for one request.
    pub fn enforce(&self, req: &EnforceRequest) -> ComplianceDecision {
        let t0 = ids::now_ms();
        let context = build_context(
            &req.query,
            &self.bundle,
            &self.index,
            req.session_id.clone(),
            self.llm.as_deref(),
            req.effective_date,
            req.domain.clone(),
        );
        info!(
            session = %context.session_id,
            domain = %context.domain,
            intent = %context.intent,
            rules = context.applicable_rules.len(),
            "pregen complete"
        );

        if context.applicable_rules.is_empty() && context.domain == "unknown" {
            let duration = ids::now_ms().saturating_sub(t0);
            let decision = ComplianceDecision {
                score: 1.0,
                action: ComplianceAction::Pass,
                violations: Vec::new(),
                evidence: json!({"note": "no applicable policies found"}),
                audit_trail: json!({"duration_ms": duration}),
                llm_response: String::new(),
                corrected_response: None,
            };
            self.finish(&context, None, &decision, String::new(), duration);
            return decision;
        }

        let mut injection = build_injection_bundle(&context, &self.bundle);
        injection.generation_params = GenerationParams {
            temperature: self.config.generation_temperature,
            max_tokens: self.config.generation_max_tokens,
        };
        let prompt = format_full_prompt(&req.query, &injection, "");
        let scaffold_hash = injection.scaffold_hash();

        let response = match &req.response_override {
            Some(r) => r.clone(),
            None => self.try_generate(&prompt).unwrap_or_default(),
        };

        let mut report = self.run_postgen(&response, &context);
        let mut decision = build_compliance_decision(&report, response);

        let mut retries = 0u32;
        loop {
            if ids::now_ms().saturating_sub(t0) > self.config.timeout_ms {
                decision.action = ComplianceAction::Escalate;
                decision.violations.push("pipeline_timeout".to_string());
                break;
            }
            match decision.action {
                ComplianceAction::AutoCorrect
                    if retries < self.config.auto_correct_max_attempts =>
                {
                    let hints = decision
                        .violations
                        .iter()
                        .take(5)
                        .map(|v| format!("FIX: {}", v))
                        .collect::<Vec<_>>()
                        .join("\n");
                    let corrected = Prompt {
                        system: prompt.system.clone(),
                        user: format!("{}\n\nPrevious issues to fix:\n{}", prompt.user, hints),
                    };
                    let Some(new_response) = self.try_generate(&corrected) else {
                        break;
                    };
                    let new_report = self.run_postgen(&new_response, &context);
                    let mut new_decision = build_compliance_decision(&new_report, new_response);
                    if new_decision.score >= THRESHOLD_PASS {
                        new_decision.corrected_response =
                            Some(new_decision.llm_response.clone());
                        decision = new_decision;
                        report = new_report;
                        break;
                    }
                    retries += 1;
                    decision = new_decision;
                    report = new_report;
                }
                ComplianceAction::Regenerate if retries < self.config.max_retries => {
                    let do_nots = decision
                        .violations
                        .iter()
                        .take(5)
                        .map(|v| format!("DO NOT: {}", v))
                        .collect::<Vec<_>>()
                        .join("\n");
                    let tighter = Prompt {
                        system: prompt.system.clone(),
                        user: format!("{}\n\nSTRICT CONSTRAINTS:\n{}", prompt.user, do_nots),
                    };
                    let Some(new_response) = self.try_generate(&tighter) else {
                        break;
                    };
                    let new_report = self.run_postgen(&new_response, &context);
                    let new_decision = build_compliance_decision(&new_report, new_response);
                    retries += 1;
                    let accepted = new_decision.action == ComplianceAction::Pass;
                    decision = new_decision;
                    report = new_report;
                    if accepted {
                        break;
                    }
                }
                ComplianceAction::AutoCorrect | ComplianceAction::Regenerate => {
                    // Retry budget exhausted.
                    decision.action = ComplianceAction::Escalate;
                    break;
                }
                _ => break,
            }
        }

        let duration = ids::now_ms().saturating_sub(t0);
        if let Some(obj) = decision.audit_trail.as_object_mut() {
            obj.insert("duration_ms".to_string(), json!(duration));
        }
        self.finish(&context, Some(&report), &decision, scaffold_hash, duration);
        decision
    }

    fn try_generate(&self, prompt: &Prompt) -> Option<String> {
        let llm = self.llm.as_deref()?;
        match llm.generate(prompt) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(error = %e, "generation failed");
                None
            }
        }
    }

    fn run_postgen(&self, response: &str, context: &EnforcementContext) -> PostGenReport {
        let regex_result = if self.config.regex_enabled {
            run_regex_check(response, &context.applicable_constraints)
        } else {
            RegexResult::clean()
        };

        let smt_result = if self.config.smt_enabled {
            run_smt_check(response, context, &self.bundle, self.llm.as_deref())
        } else {
            SmtResult::clean()
        };

        let coverage_result = compute_coverage(context, response);

        let judge_transport = self.judge.as_deref().or(self.llm.as_deref());
        let judge_result = if !self.config.judge_enabled {
            JudgeResult { score: 1.0, issues: Vec::new(), explanation: String::new() }
        } else if let Some(t) = judge_transport {
            run_judge_check(response, context, t)
        } else {
            JudgeResult::unavailable()
        };

        PostGenReport { regex_result, smt_result, judge_result, coverage_result }
    }

    fn finish(
        &self,
        context: &EnforcementContext,
        report: Option<&PostGenReport>,
        decision: &ComplianceDecision,
        scaffold_hash: String,
        duration_ms: u64,
    ) {
        let entry = AuditEntry {
            session_id: context.session_id.clone(),
            timestamp: context.timestamp.clone(),
            query: context.query.clone(),
            domain: Some(context.domain.clone()),
            intent: Some(context.intent.clone()),
            retrieved_policy_ids: context
                .applicable_rules
                .iter()
                .map(|r| r.policy_id.clone())
                .collect(),
            scaffold_hash,
            llm_response_hash: sha256_hex(decision.llm_response.as_bytes()),
            postgen_report: report.cloned(),
            compliance_score: decision.score,
            final_action: decision.action,
            owners_notified: if decision.action == ComplianceAction::Escalate {
                context.escalation_contacts.clone()
            } else {
                Vec::new()
            },
            duration_ms,
        };
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.log(&entry) {
                warn!(error = %e, "audit write failed");
            }
        }
        self.metrics.record(decision.action);
        info!(
            session = %context.session_id,
            score = decision.score,
            action = %decision.action,
            "decision"
        );
    }
}

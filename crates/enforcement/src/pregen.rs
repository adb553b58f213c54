//! Pre-generation: classify the query, retrieve applicable rules for the
//! effective date, apply dominance, and assemble the enforcement context.

use crate::loader::BundleIndex;
use crate::transport::LlmTransport;
use chrono::NaiveDate;
use mandate_core::priority::normalize_priority;
use mandate_core::schema::{CompiledBundle, CompiledPath, ConditionalRule, Constraint, DominanceMode, DominanceRule};
use mandate_core::ids;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, warn};

/// Per-request enforcement context; discarded after the decision is logged.
#[derive(Debug, Clone, Serialize)]
pub struct EnforcementContext {
    pub session_id: String,
    pub query: String,
    pub domain: String,
    pub intent: String,
    pub domain_confidence: f64,
    pub applicable_rules: Vec<ConditionalRule>,
    pub applicable_constraints: Vec<Constraint>,
    pub applicable_paths: Vec<CompiledPath>,
    pub dominance_applied: Vec<DominanceRule>,
    pub escalation_contacts: Vec<String>,
    pub timestamp: String,
}

/// Classify a query into `(domain, intent, confidence)` via the external
/// classifier. With no classifier wired (or on transport failure) returns
/// `("unknown", "unknown", 0.0)`, which short-circuits the pipeline.
#[must_use]
pub fn classify_query(
    query: &str,
    bundle: &CompiledBundle,
    transport: Option<&dyn LlmTransport>,
) -> (String, String, f64) {
    let Some(transport) = transport else {
        return ("unknown".to_string(), "unknown".to_string(), 0.0);
    };

    let domains: BTreeSet<&str> = bundle
        .conditional_rules
        .iter()
        .map(|r| r.metadata.domain.as_str())
        .collect();
    let domain_list: Vec<&str> = domains.into_iter().collect();
    let prompt = format!(
        "Classify this user query into one of these domains: {:?}.\n\
         Intents: refund_request, policy_inquiry, complaint, other.\n\
         Query: {}\n\
         Return JSON: {{\"domain\": \"...\", \"intent\": \"...\", \"confidence\": 0.0-1.0}}\n\
         Use semantic understanding to handle synonyms and paraphrasing.",
        domain_list, query
    );

    match transport.invoke_json(&prompt) {
        Ok(v) => {
            let domain = v
                .get("domain")
                .and_then(|d| d.as_str())
                .unwrap_or("unknown")
                .to_string();
            let intent = v
                .get("intent")
                .and_then(|d| d.as_str())
                .unwrap_or("unknown")
                .to_string();
            let confidence =
                v.get("confidence").and_then(serde_json::Value::as_f64).unwrap_or(0.0);
            (domain, intent, confidence.clamp(0.0, 1.0))
        }
        Err(e) => {
            warn!(error = %e, "classifier unavailable");
            ("unknown".to_string(), "unknown".to_string(), 0.0)
        }
    }
}

fn rule_in_effect(rule: &ConditionalRule, cutoff: NaiveDate) -> bool {
    match &rule.metadata.effective_date {
        None => true,
        Some(raw) => match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            // A rule that comes into force after the request date is dropped;
            // unparseable dates are kept.
            Ok(eff) => eff <= cutoff,
            Err(_) => true,
        },
    }
}

/// Retrieve rules, paths, and constraints applicable to `domain` as of
/// `effective_date`.
#[must_use]
pub fn retrieve_rules(
    domain: &str,
    index: &BundleIndex,
    effective_date: NaiveDate,
) -> (Vec<ConditionalRule>, Vec<CompiledPath>, Vec<Constraint>) {
    let rules: Vec<ConditionalRule> = index
        .rules_by_domain
        .get(domain)
        .map(|v| v.iter().filter(|r| rule_in_effect(r, effective_date)).cloned().collect())
        .unwrap_or_default();

    let retained: HashSet<&str> = rules.iter().map(|r| r.policy_id.as_str()).collect();
    let paths: Vec<CompiledPath> = index
        .paths_by_domain
        .get(domain)
        .map(|v| {
            v.iter().filter(|p| retained.contains(p.policy_id.as_str())).cloned().collect()
        })
        .unwrap_or_default();

    let mut constraints: Vec<Constraint> =
        index.constraints_by_scope.get("always").cloned().unwrap_or_default();
    if let Some(scoped) = index.constraints_by_scope.get(domain) {
        constraints.extend(scoped.iter().cloned());
    }

    (rules, paths, constraints)
}

/// Resolve pairwise conflicts among retrieved rules: explicit dominance
/// rules first (`override` drops the loser), then the priority lattice for
/// pairs with no explicit rule.
#[must_use]
pub fn apply_dominance(
    rules: Vec<ConditionalRule>,
    paths: Vec<CompiledPath>,
    index: &BundleIndex,
) -> (Vec<ConditionalRule>, Vec<CompiledPath>, Vec<DominanceRule>) {
    let mut applied: Vec<DominanceRule> = Vec::new();
    let mut losers: HashSet<String> = HashSet::new();
    let mut pids: Vec<&str> = rules.iter().map(|r| r.policy_id.as_str()).collect();
    pids.sort_unstable();

    for (i, p1) in pids.iter().enumerate() {
        for p2 in pids.iter().skip(i + 1) {
            let key = if p1 < p2 {
                ((*p1).to_string(), (*p2).to_string())
            } else {
                ((*p2).to_string(), (*p1).to_string())
            };
            if let Some(dr) = index.dominance_lookup.get(&key) {
                if dr.then.mode == DominanceMode::Override {
                    let loser = if dr.then.enforce == *p1 { *p2 } else { *p1 };
                    losers.insert(loser.to_string());
                }
                applied.push(dr.clone());
                continue;
            }
            // No explicit rule: the priority lattice decides.
            let (Some(r1), Some(r2)) =
                (index.rules_by_policy_id.get(*p1), index.rules_by_policy_id.get(*p2))
            else {
                continue;
            };
            let rank1 = normalize_priority(&r1.metadata).rank();
            let rank2 = normalize_priority(&r2.metadata).rank();
            if rank1 != rank2 {
                let loser = if rank1 < rank2 { *p2 } else { *p1 };
                losers.insert(loser.to_string());
            }
        }
    }

    let rules = rules.into_iter().filter(|r| !losers.contains(&r.policy_id)).collect();
    let paths = paths.into_iter().filter(|p| !losers.contains(&p.policy_id)).collect();
    (rules, paths, applied)
}

/// Full pre-gen pipeline: classify, retrieve, resolve, assemble. A caller
/// that already knows the domain may pass `domain_override` to bypass the
/// classifier deterministically.
#[must_use]
pub fn build_context(
    query: &str,
    bundle: &CompiledBundle,
    index: &BundleIndex,
    session_id: Option<String>,
    transport: Option<&dyn LlmTransport>,
    effective_date: Option<NaiveDate>,
    domain_override: Option<String>,
) -> EnforcementContext {
    let session_id = session_id.unwrap_or_else(ids::new_session_id);
    let (domain, intent, confidence) = match domain_override {
        Some(domain) => (domain, "other".to_string(), 1.0),
        None => classify_query(query, bundle, transport),
    };
    let cutoff = effective_date.unwrap_or_else(ids::today_utc);
    let (rules, paths, constraints) = retrieve_rules(&domain, index, cutoff);
    let (rules, paths, applied) = apply_dominance(rules, paths, index);

    let retained: HashSet<&str> = rules.iter().map(|r| r.policy_id.as_str()).collect();
    let contacts: BTreeSet<String> = bundle
        .escalations
        .iter()
        .filter(|esc| esc.policies.iter().any(|p| retained.contains(p.as_str())))
        .flat_map(|esc| esc.owners_to_notify.iter().cloned())
        .collect();

    debug!(
        domain = %domain,
        intent = %intent,
        rules = rules.len(),
        paths = paths.len(),
        constraints = constraints.len(),
        "context built"
    );

    EnforcementContext {
        session_id,
        query: query.to_string(),
        domain,
        intent,
        domain_confidence: confidence,
        applicable_rules: rules,
        applicable_constraints: constraints,
        applicable_paths: paths,
        dominance_applied: applied,
        escalation_contacts: contacts.into_iter().collect(),
        timestamp: ids::now_utc_iso(),
    }
}

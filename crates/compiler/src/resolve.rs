//! Priority resolver: settle detected conflicts against the priority
//! lattice, emitting dominance rules and escalations.

use crate::conflict::ConflictReport;
use crate::graph::DecisionGraph;
use mandate_core::priority::{default_lattice, normalize_priority};
use mandate_core::schema::{
    pair_key, DominanceMode, DominanceOutcome, DominanceRule, DominanceTrigger, Escalation,
    Evidence, RuleMetadata,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One deterministically resolved conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoResolution {
    pub conflict_type: String,
    pub policies: Vec<String>,
    pub winner: String,
    pub loser: String,
    pub winner_priority: String,
    pub loser_priority: String,
    pub action_relation: String,
    pub rationale: String,
    pub evidence: Evidence,
}

/// Resolver output: what was settled, what must go to humans.
#[derive(Debug, Clone, Default)]
pub struct ResolutionReport {
    pub priority_lattice: BTreeMap<String, u32>,
    pub auto_resolutions: Vec<AutoResolution>,
    pub escalations: Vec<Escalation>,
    pub dominance_rules: Vec<DominanceRule>,
}

/// `compose` when one action gates the other (approval vs refund),
/// `override` otherwise.
fn action_relation(a1: &str, a2: &str) -> DominanceMode {
    let cross = (a1.contains("approval") && a2.contains("refund"))
        || (a2.contains("approval") && a1.contains("refund"));
    if cross {
        DominanceMode::Compose
    } else {
        DominanceMode::Override
    }
}

fn owner_of(meta: &RuleMetadata) -> String {
    meta.owner.clone().unwrap_or_else(|| "unknown_owner".to_string())
}

fn owners_sorted(m1: &RuleMetadata, m2: &RuleMetadata) -> Vec<String> {
    let set: BTreeSet<String> = [owner_of(m1), owner_of(m2)].into_iter().collect();
    set.into_iter().collect()
}

fn dominance_notes(mode: DominanceMode) -> &'static str {
    match mode {
        DominanceMode::Compose => "compose: treat approval as gating step before refund",
        DominanceMode::Override => "override: winner action replaces loser action",
    }
}

/// Resolve every conflict in the report.
///
/// Deterministic: conflicts are processed in `(min(pid), max(pid))` order,
/// and dominance rules are de-duplicated by `(sorted pair, winner, mode)`.
/// Each logical conflict is either auto-resolved (emitting a dominance rule)
/// or escalated, never both and never neither. Semantic and undecided
/// conflicts always escalate.
#[must_use]
pub fn resolve_conflicts(report: &ConflictReport, graph: &DecisionGraph) -> ResolutionReport {
    let pid_to_meta: BTreeMap<&str, &RuleMetadata> = graph
        .compiled_paths
        .iter()
        .map(|p| (p.policy_id.as_str(), &p.metadata))
        .collect();
    let pid_to_action: BTreeMap<&str, &str> = graph
        .compiled_paths
        .iter()
        .map(|p| (p.policy_id.as_str(), p.leaf_action.as_str()))
        .collect();
    let meta_of = |pid: &str| pid_to_meta.get(pid).copied().cloned().unwrap_or_default();

    let mut out = ResolutionReport {
        priority_lattice: default_lattice(),
        ..ResolutionReport::default()
    };
    let mut seen_rules: BTreeSet<(String, String, String, DominanceMode)> = BTreeSet::new();

    let mut logical = report.logical.clone();
    logical.sort_by_key(|c| pair_key(&c.policies));

    for conf in &logical {
        let (p1, p2) = (&conf.policies[0], &conf.policies[1]);
        let (a1, a2) = (&conf.actions[0], &conf.actions[1]);
        let meta1 = meta_of(p1);
        let meta2 = meta_of(p2);
        let (pr1, pr2) = (normalize_priority(&meta1), normalize_priority(&meta2));
        let mode = action_relation(a1, a2);
        let evidence = Evidence::witness(conf.witness.clone());

        if pr1.rank() == pr2.rank() {
            out.escalations.push(Escalation {
                conflict_type: "logical".to_string(),
                policies: vec![p1.clone(), p2.clone()],
                actions: vec![a1.clone(), a2.clone()],
                priority: pr1.as_str().to_string(),
                owners_to_notify: owners_sorted(&meta1, &meta2),
                evidence,
                recommended_next_step: "human_review".to_string(),
            });
            continue;
        }

        let (winner, loser, win_pr, lose_pr) = if pr1.rank() < pr2.rank() {
            (p1, p2, pr1, pr2)
        } else {
            (p2, p1, pr2, pr1)
        };
        out.auto_resolutions.push(AutoResolution {
            conflict_type: "logical".to_string(),
            policies: vec![p1.clone(), p2.clone()],
            winner: winner.clone(),
            loser: loser.clone(),
            winner_priority: win_pr.as_str().to_string(),
            loser_priority: lose_pr.as_str().to_string(),
            action_relation: match mode {
                DominanceMode::Compose => "compose".to_string(),
                DominanceMode::Override => "override".to_string(),
            },
            rationale: "priority_lattice".to_string(),
            evidence,
        });

        let (lo, hi) = pair_key(&conf.policies);
        let key = (lo, hi, winner.clone(), mode);
        if seen_rules.insert(key) {
            let mut policies_fire = vec![p1.clone(), p2.clone()];
            policies_fire.sort();
            out.dominance_rules.push(DominanceRule {
                when: DominanceTrigger { policies_fire },
                then: DominanceOutcome {
                    mode,
                    enforce: winner.clone(),
                    notes: dominance_notes(mode).to_string(),
                },
            });
        }
    }

    let mut semantic = report.semantic.clone();
    semantic.sort_by_key(|c| pair_key(&c.policies));
    for conf in &semantic {
        let (p1, p2) = (&conf.policies[0], &conf.policies[1]);
        let meta1 = meta_of(p1);
        let meta2 = meta_of(p2);
        let (pr1, pr2) = (normalize_priority(&meta1), normalize_priority(&meta2));
        out.escalations.push(Escalation {
            conflict_type: "semantic".to_string(),
            policies: vec![p1.clone(), p2.clone()],
            actions: conf.actions.clone(),
            priority: format!("{}|{}", pr1, pr2),
            owners_to_notify: owners_sorted(&meta1, &meta2),
            evidence: conf
                .note
                .clone()
                .map_or_else(Evidence::default, Evidence::note),
            recommended_next_step: "llm_validation_or_human_review".to_string(),
        });
    }

    let mut unknown = report.unknown_pairs.clone();
    unknown.sort();
    for (p1, p2) in &unknown {
        let meta1 = meta_of(p1);
        let meta2 = meta_of(p2);
        let (pr1, pr2) = (normalize_priority(&meta1), normalize_priority(&meta2));
        let actions = [p1, p2]
            .iter()
            .filter_map(|pid| pid_to_action.get(pid.as_str()).map(|a| (*a).to_string()))
            .collect();
        out.escalations.push(Escalation {
            conflict_type: "logical".to_string(),
            policies: vec![p1.clone(), p2.clone()],
            actions,
            priority: format!("{}|{}", pr1, pr2),
            owners_to_notify: owners_sorted(&meta1, &meta2),
            evidence: Evidence::note("conflict undecided by solver"),
            recommended_next_step: "human_review".to_string(),
        });
    }

    out
}

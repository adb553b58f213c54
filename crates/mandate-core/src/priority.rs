//! Priority lattice: five levels, lower rank wins.

use crate::schema::RuleMetadata;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Canonical priority level. Rank 1 (`Regulatory`) dominates rank 5
/// (`Situational`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityLevel {
    Regulatory,
    CoreValues,
    Company,
    Department,
    Situational,
}

impl PriorityLevel {
    /// Lattice rank; lower wins.
    #[must_use]
    pub fn rank(self) -> u32 {
        match self {
            PriorityLevel::Regulatory => 1,
            PriorityLevel::CoreValues => 2,
            PriorityLevel::Company => 3,
            PriorityLevel::Department => 4,
            PriorityLevel::Situational => 5,
        }
    }

    /// Canonical label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PriorityLevel::Regulatory => "regulatory",
            PriorityLevel::CoreValues => "core_values",
            PriorityLevel::Company => "company",
            PriorityLevel::Department => "department",
            PriorityLevel::Situational => "situational",
        }
    }

    /// Resolve a declared label, recognising the textual aliases. Anything
    /// unrecognised defaults to `Company`.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "regulatory" | "legal" | "law" | "reg" => PriorityLevel::Regulatory,
            "core_values" | "values" | "ethics" | "privacy" | "safety" => {
                PriorityLevel::CoreValues
            }
            "department" | "dept" | "team" => PriorityLevel::Department,
            "situational" | "promo" | "temporary" => PriorityLevel::Situational,
            _ => PriorityLevel::Company,
        }
    }
}

impl fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalise rule metadata to a canonical priority level. Non-empty
/// `regulatory_linkage` promotes to `Regulatory` regardless of the declared
/// field.
#[must_use]
pub fn normalize_priority(meta: &RuleMetadata) -> PriorityLevel {
    if !meta.regulatory_linkage.is_empty() {
        return PriorityLevel::Regulatory;
    }
    PriorityLevel::from_label(&meta.priority)
}

/// The default lattice in wire form (label -> rank).
#[must_use]
pub fn default_lattice() -> BTreeMap<String, u32> {
    [
        PriorityLevel::Regulatory,
        PriorityLevel::CoreValues,
        PriorityLevel::Company,
        PriorityLevel::Department,
        PriorityLevel::Situational,
    ]
    .into_iter()
    .map(|p| (p.as_str().to_string(), p.rank()))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_resolve() {
        assert_eq!(PriorityLevel::from_label("legal"), PriorityLevel::Regulatory);
        assert_eq!(PriorityLevel::from_label("Privacy"), PriorityLevel::CoreValues);
        assert_eq!(PriorityLevel::from_label("team"), PriorityLevel::Department);
        assert_eq!(PriorityLevel::from_label("promo"), PriorityLevel::Situational);
        assert_eq!(PriorityLevel::from_label("whatever"), PriorityLevel::Company);
    }

    #[test]
    fn regulatory_linkage_promotes() {
        let meta = RuleMetadata {
            priority: "situational".into(),
            regulatory_linkage: vec!["GDPR-17".into()],
            ..RuleMetadata::default()
        };
        assert_eq!(normalize_priority(&meta), PriorityLevel::Regulatory);
    }

    #[test]
    fn lattice_ranks() {
        let lattice = default_lattice();
        assert_eq!(lattice["regulatory"], 1);
        assert_eq!(lattice["situational"], 5);
        assert_eq!(lattice.len(), 5);
    }
}

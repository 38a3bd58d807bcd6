//! Kit coverage: how many of a unit's parts a kit container actually holds.
//!
//! Whether optional loadout parts count toward "complete" is a policy choice;
//! the default treats a kit without its optional parts as complete.

use modelvault_vocab::{Domain, VocabularyIndex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoveragePolicy {
    #[default]
    OptionalOmissionCountsComplete,
    RequireOptional,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KitCoverage {
    pub unit: String,
    pub required: Vec<String>,
    pub optional: Vec<String>,
    pub present: Vec<String>,
    pub missing_required: Vec<String>,
    pub missing_optional: Vec<String>,
    pub complete: bool,
    pub policy: CoveragePolicy,
}

/// Coverage of `unit`'s parts by `present` part keys.
///
/// `None` when the vocabulary lists no parts for the unit.
pub fn kit_coverage(
    index: &VocabularyIndex,
    unit: &str,
    present: &BTreeSet<String>,
    policy: CoveragePolicy,
) -> Option<KitCoverage> {
    let mut required = Vec::new();
    let mut optional = Vec::new();
    for (_, part) in index.entries_in(Domain::Part) {
        if part.deprecated || part.unit.as_deref() != Some(unit) {
            continue;
        }
        if part.optional {
            optional.push(part.canonical.clone());
        } else {
            required.push(part.canonical.clone());
        }
    }
    if required.is_empty() && optional.is_empty() {
        return None;
    }
    required.sort();
    optional.sort();

    let missing = |parts: &[String]| -> Vec<String> {
        parts
            .iter()
            .filter(|p| !present.contains(*p))
            .cloned()
            .collect()
    };
    let missing_required = missing(&required);
    let missing_optional = missing(&optional);
    let complete = missing_required.is_empty()
        && (policy == CoveragePolicy::OptionalOmissionCountsComplete
            || missing_optional.is_empty());

    Some(KitCoverage {
        unit: unit.to_string(),
        present: required
            .iter()
            .chain(&optional)
            .filter(|p| present.contains(*p))
            .cloned()
            .collect(),
        required,
        optional,
        missing_required,
        missing_optional,
        complete,
        policy,
    })
}

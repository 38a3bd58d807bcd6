//! Rule outcomes and the confidence/conflict resolver.
//!
//! Every pass reports what it decided as a [`RuleOutcome`]. The resolver turns
//! an outcome into a confidence delta with one exhaustive match, and the pair
//! is persisted as the variant's provenance ([`RuleFired`]).

use crate::config::{AxisRule, ConfidenceWeights};
use crate::model::{Field, FieldValue, IntendedUse};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemSource {
    /// No game-system signal at all.
    None,
    /// A game-system token in the path.
    Explicit,
    /// Two or more staged factions agreed on the system.
    Promoted,
    /// Distinct explicit systems; left null.
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CueStrength {
    Strong,
    Weak,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum RuleOutcome {
    Structural {
        field: Field,
        /// `None` when distinct matches conflicted.
        value: Option<FieldValue>,
        candidates: Vec<FieldValue>,
        tokens: Vec<String>,
    },
    Designer {
        designer: String,
        /// Further distinct designers seen after the kept one.
        rejected: Vec<String>,
        tokens: Vec<String>,
    },
    Faction {
        game_system: Option<String>,
        system_source: SystemSource,
        faction: Option<String>,
        staged: Vec<String>,
        collision: bool,
        mismatched: Vec<String>,
        without_system: Vec<String>,
        tokens: Vec<String>,
    },
    Lineage {
        lineage: Option<String>,
        candidates: Vec<String>,
        tokens: Vec<String>,
    },
    Axis {
        field: Field,
        value: String,
        classes: Vec<String>,
        tokens: Vec<String>,
    },
    Nsfw {
        strength: CueStrength,
        applied: bool,
        tokens: Vec<String>,
    },
    IntendedUse {
        bucket: Option<IntendedUse>,
        candidates: Vec<IntendedUse>,
        tokens: Vec<String>,
    },
    Role {
        pc_candidate: Option<bool>,
        positive: Vec<String>,
        negative: Vec<String>,
    },
    Residual {
        tokens: Vec<String>,
    },
}

impl RuleOutcome {
    pub fn name(&self) -> &'static str {
        match self {
            RuleOutcome::Structural { .. } => "structural",
            RuleOutcome::Designer { .. } => "designer",
            RuleOutcome::Faction { .. } => "faction",
            RuleOutcome::Lineage { .. } => "lineage",
            RuleOutcome::Axis { .. } => "axis",
            RuleOutcome::Nsfw { .. } => "nsfw",
            RuleOutcome::IntendedUse { .. } => "intended_use",
            RuleOutcome::Role { .. } => "role",
            RuleOutcome::Residual { .. } => "residual",
        }
    }

    /// Whether this outcome classified anything (residual capture does not).
    pub fn is_signal(&self) -> bool {
        !matches!(self, RuleOutcome::Residual { .. })
    }
}

/// Provenance entry: one outcome and the confidence it contributed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleFired {
    pub outcome: RuleOutcome,
    pub delta: f64,
}

/// Confidence contributed by one outcome.
///
/// A conflict subtracts half the smaller side's weight; every conflict here is
/// between two signals of the same class, so that is half the rule's weight.
pub fn confidence_delta(outcome: &RuleOutcome, weights: &ConfidenceWeights) -> f64 {
    fn scored(hit: bool, conflict: bool, weight: f64) -> f64 {
        let mut delta = 0.0;
        if hit {
            delta += weight;
        }
        if conflict {
            delta -= weight / 2.0;
        }
        delta
    }

    match outcome {
        RuleOutcome::Structural {
            field, value, candidates, ..
        } => {
            let weight = match field {
                Field::ScaleRatio | Field::HeightMm => weights.structural_scale,
                _ => weights.structural_minor,
            };
            scored(value.is_some(), candidates.len() > 1, weight)
        }
        RuleOutcome::Designer { rejected, .. } => {
            scored(true, !rejected.is_empty(), weights.designer)
        }
        RuleOutcome::Faction {
            faction,
            system_source,
            collision,
            mismatched,
            without_system,
            ..
        } => {
            let conflict = *collision
                || !mismatched.is_empty()
                || *system_source == SystemSource::Conflict
                || without_system.len() > 1;
            scored(faction.is_some(), conflict, weights.faction)
        }
        RuleOutcome::Lineage {
            lineage, candidates, ..
        } => scored(lineage.is_some(), candidates.len() > 1, weights.lineage),
        RuleOutcome::Axis { classes, .. } => {
            scored(classes.len() == 1, classes.len() > 1, weights.axis)
        }
        RuleOutcome::Nsfw {
            strength, applied, ..
        } => match (strength, applied) {
            (_, false) => 0.0,
            (CueStrength::Strong, true) => weights.nsfw_strong,
            (CueStrength::Weak, true) => weights.nsfw_weak,
        },
        RuleOutcome::IntendedUse {
            bucket, candidates, ..
        } => scored(bucket.is_some(), candidates.len() > 1, weights.intended_use),
        RuleOutcome::Role {
            pc_candidate,
            positive,
            negative,
        } => scored(
            *pc_candidate == Some(true),
            !positive.is_empty() && !negative.is_empty(),
            weights.role,
        ),
        RuleOutcome::Residual { .. } => 0.0,
    }
}

/// Classes detected on one axis, as a bitmask over the axis rule table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AxisMask {
    bits: u32,
    pub tokens: Vec<String>,
}

impl AxisMask {
    pub fn scan<T: Copy>(rules: &[AxisRule<T>], tokens: &[String]) -> Self {
        let mut mask = Self::default();
        for token in tokens {
            if let Some(i) = rules.iter().take(32).position(|r| r.matches(token)) {
                mask.bits |= 1 << i;
                mask.tokens.push(token.clone());
            }
        }
        mask
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Distinct classes hit, in rule-table order.
    pub fn classes<T: Copy + PartialEq>(&self, rules: &[AxisRule<T>]) -> Vec<T> {
        let mut out: Vec<T> = Vec::new();
        for (i, rule) in rules.iter().take(32).enumerate() {
            if self.bits & (1 << i) != 0 && !out.contains(&rule.class) {
                out.push(rule.class);
            }
        }
        out
    }
}

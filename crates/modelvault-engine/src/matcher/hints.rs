//! Contextual score hints.
//!
//! Each hint is an independent [`HintEvaluator`]; new hints are registered on a
//! [`HintRegistry`] instead of growing a single scoring function.

use crate::config::HintConfig;
use crate::model::Variant;
use modelvault_vocab::{Domain, TokenStream, UnitCategory, VocabularyEntry, VocabularyIndex};
use serde::{Deserialize, Serialize};

/// A signed score contribution with the tokens that justified it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreAdjustment {
    pub rule: String,
    pub delta: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tokens: Vec<String>,
}

impl ScoreAdjustment {
    pub fn new(rule: &str, delta: f64, tokens: Vec<String>) -> Self {
        Self {
            rule: rule.to_string(),
            delta,
            tokens,
        }
    }
}

/// What a hint may look at for one candidate.
pub struct HintContext<'a> {
    pub index: &'a VocabularyIndex,
    pub variant: &'a Variant,
    pub candidate: &'a VocabularyEntry,
    /// A unit alias matched the path outright.
    pub direct_unit_hit: bool,
    /// Sub-factions (factions with a parent) named in the path.
    pub sub_factions: &'a [String],
    /// The variant's faction, or the first faction named in the path.
    pub hinted_faction: Option<&'a str>,
}

pub trait HintEvaluator: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, tokens: &TokenStream, ctx: &HintContext<'_>) -> Option<ScoreAdjustment>;
}

fn present(tokens: &TokenStream, cues: &[String]) -> Vec<String> {
    tokens
        .dedup
        .iter()
        .filter(|t| cues.contains(t))
        .cloned()
        .collect()
}

/// Mount tokens next to a rider unit favour mounted units.
pub struct MountHint {
    pub tokens: Vec<String>,
    pub bonus: f64,
}

impl HintEvaluator for MountHint {
    fn name(&self) -> &'static str {
        "mount_context"
    }

    fn evaluate(&self, tokens: &TokenStream, ctx: &HintContext<'_>) -> Option<ScoreAdjustment> {
        if !ctx.direct_unit_hit || !ctx.candidate.category.is_some_and(|c| c.is_mounted()) {
            return None;
        }
        let cues = present(tokens, &self.tokens);
        if cues.is_empty() {
            return None;
        }
        Some(ScoreAdjustment::new(self.name(), self.bonus, cues))
    }
}

/// Spell/invocation tokens favour spell-like entities.
pub struct SpellHint {
    pub tokens: Vec<String>,
    pub bonus: f64,
}

impl HintEvaluator for SpellHint {
    fn name(&self) -> &'static str {
        "spell_context"
    }

    fn evaluate(&self, tokens: &TokenStream, ctx: &HintContext<'_>) -> Option<ScoreAdjustment> {
        if ctx.candidate.category != Some(UnitCategory::Spell) {
            return None;
        }
        let cues = present(tokens, &self.tokens);
        if cues.is_empty() {
            return None;
        }
        Some(ScoreAdjustment::new(self.name(), self.bonus, cues))
    }
}

/// A chapter/legion named in the path favours candidates of that sub-faction.
pub struct ChapterHint {
    pub bonus: f64,
}

impl HintEvaluator for ChapterHint {
    fn name(&self) -> &'static str {
        "chapter_context"
    }

    fn evaluate(&self, _tokens: &TokenStream, ctx: &HintContext<'_>) -> Option<ScoreAdjustment> {
        let faction = ctx.candidate.faction.as_ref()?;
        if !ctx.sub_factions.contains(faction) {
            return None;
        }
        Some(ScoreAdjustment::new(
            self.name(),
            self.bonus,
            vec![faction.clone()],
        ))
    }
}

/// Penalize candidates by faction-hierarchy distance from the hinted faction.
pub struct FactionDistanceHint {
    pub step_penalty: f64,
    pub unrelated_penalty: f64,
}

impl HintEvaluator for FactionDistanceHint {
    fn name(&self) -> &'static str {
        "faction_distance"
    }

    fn evaluate(&self, _tokens: &TokenStream, ctx: &HintContext<'_>) -> Option<ScoreAdjustment> {
        let hinted = ctx.hinted_faction?;
        let faction = ctx.candidate.faction.as_deref()?;
        let delta = match ctx.index.hierarchy_distance(Domain::Faction, hinted, faction) {
            Some(0) => return None,
            Some(steps) => -(steps as f64) * self.step_penalty,
            None => -self.unrelated_penalty,
        };
        Some(ScoreAdjustment::new(
            self.name(),
            delta,
            vec![hinted.to_string(), faction.to_string()],
        ))
    }
}

#[derive(Default)]
pub struct HintRegistry {
    hints: Vec<Box<dyn HintEvaluator>>,
}

impl HintRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in hints, configured.
    pub fn from_config(config: &HintConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(MountHint {
            tokens: config.mount_tokens.clone(),
            bonus: config.mount_bonus,
        }));
        registry.register(Box::new(SpellHint {
            tokens: config.spell_tokens.clone(),
            bonus: config.spell_bonus,
        }));
        registry.register(Box::new(ChapterHint {
            bonus: config.chapter_bonus,
        }));
        registry.register(Box::new(FactionDistanceHint {
            step_penalty: config.faction_step_penalty,
            unrelated_penalty: config.unrelated_faction_penalty,
        }));
        registry
    }

    pub fn register(&mut self, hint: Box<dyn HintEvaluator>) {
        self.hints.push(hint);
    }

    pub fn len(&self) -> usize {
        self.hints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hints.is_empty()
    }

    /// Every non-zero adjustment, in registration order.
    pub fn evaluate(&self, tokens: &TokenStream, ctx: &HintContext<'_>) -> Vec<ScoreAdjustment> {
        self.hints
            .iter()
            .filter_map(|h| h.evaluate(tokens, ctx))
            .filter(|adj| adj.delta != 0.0)
            .collect()
    }
}

impl std::fmt::Debug for HintRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.hints.iter().map(|h| h.name()))
            .finish()
    }
}

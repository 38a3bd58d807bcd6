//! Engine configuration.
//!
//! Every section is `#[serde(default)]`, so a config file only needs the keys
//! it changes. The defaults below are the compiled-in rule tables.

use crate::matcher::CoveragePolicy;
use crate::model::{
    EntityKind, IntendedUse, InternalVolume, PartPackType, Segmentation, SupportState,
};
use crate::EngineError;
use modelvault_vocab::TokenizerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const NORMALIZER_RULES_VERSION_V1: u32 = 1;

/// Tokens that select one class of an axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisRule<T> {
    pub class: T,
    pub tokens: Vec<String>,
}

impl<T: Copy> AxisRule<T> {
    fn new(class: T, tokens: &[&str]) -> Self {
        Self {
            class,
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
        }
    }

    pub fn matches(&self, token: &str) -> bool {
        self.tokens.iter().any(|t| t == token)
    }
}

/// Class whose tokens include `token`, first rule wins.
pub fn classify<T: Copy>(rules: &[AxisRule<T>], token: &str) -> Option<T> {
    rules.iter().find(|r| r.matches(token)).map(|r| r.class)
}

fn words(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|t| t.to_string()).collect()
}

pub fn default_part_pack_rules() -> Vec<AxisRule<PartPackType>> {
    vec![
        AxisRule::new(PartPackType::Bodies, &["bodies", "body", "torsos", "torso"]),
        AxisRule::new(PartPackType::Heads, &["heads", "head", "helmets", "helmet"]),
        AxisRule::new(PartPackType::Weapons, &["weapons", "weapon", "guns"]),
        AxisRule::new(PartPackType::Arms, &["arms", "arm"]),
        AxisRule::new(PartPackType::Legs, &["legs", "leg"]),
        AxisRule::new(PartPackType::Bits, &["bits", "bitz", "accessories"]),
        AxisRule::new(PartPackType::Shields, &["shields", "shield"]),
        AxisRule::new(PartPackType::Backpacks, &["backpacks", "backpack"]),
        AxisRule::new(PartPackType::Bases, &["bases", "base"]),
    ]
}

/// Confidence weights. Advisory only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceWeights {
    pub designer: f64,
    pub faction: f64,
    pub lineage: f64,
    pub axis: f64,
    pub nsfw_strong: f64,
    pub nsfw_weak: f64,
    pub intended_use: f64,
    pub role: f64,
    pub structural_scale: f64,
    pub structural_minor: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            designer: 5.0,
            faction: 5.0,
            lineage: 4.0,
            axis: 2.0,
            nsfw_strong: 4.0,
            nsfw_weak: 2.0,
            intended_use: 3.0,
            role: 2.0,
            structural_scale: 3.0,
            structural_minor: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Bumped whenever a rule-table change can change normalizer output.
    pub rules_version: u32,
    /// Leading path segments consulted by the intended-use pass.
    pub intended_use_depth: usize,
    /// Accepted `1:N` denominators.
    pub scale_denominator_min: u32,
    pub scale_denominator_max: u32,
    pub segmentation: Vec<AxisRule<Segmentation>>,
    pub internal_volume: Vec<AxisRule<InternalVolume>>,
    pub support_state: Vec<AxisRule<SupportState>>,
    pub part_pack_type: Vec<AxisRule<PartPackType>>,
    pub nsfw_strong: Vec<String>,
    pub nsfw_weak: Vec<String>,
    pub intended_use: Vec<AxisRule<IntendedUse>>,
    pub role_positive: Vec<String>,
    pub role_negative: Vec<String>,
    pub weights: ConfidenceWeights,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            rules_version: NORMALIZER_RULES_VERSION_V1,
            intended_use_depth: 2,
            scale_denominator_min: 4,
            scale_denominator_max: 120,
            segmentation: vec![
                AxisRule::new(Segmentation::Split, &["split", "splitted", "separated"]),
                AxisRule::new(Segmentation::Merged, &["merged", "unsplit", "onepiece"]),
            ],
            internal_volume: vec![
                AxisRule::new(InternalVolume::Hollow, &["hollow", "hollowed"]),
                AxisRule::new(InternalVolume::Solid, &["solid"]),
            ],
            support_state: vec![
                AxisRule::new(
                    SupportState::Presupported,
                    &["presupported", "presupport", "presup", "presupp"],
                ),
                AxisRule::new(SupportState::Supported, &["supported", "supports"]),
                AxisRule::new(
                    SupportState::Unsupported,
                    &["unsupported", "nosupports", "nosupport"],
                ),
            ],
            part_pack_type: default_part_pack_rules(),
            nsfw_strong: words(&["nsfw", "nude", "naked", "explicit", "lewd", "hentai"]),
            nsfw_weak: words(&["sexy", "pinup", "bikini", "lingerie", "risque"]),
            intended_use: vec![
                AxisRule::new(IntendedUse::Tabletop, &["tabletop", "wargaming", "gaming"]),
                AxisRule::new(
                    IntendedUse::Display,
                    &["display", "diorama", "collectible", "statue", "showcase"],
                ),
                AxisRule::new(IntendedUse::Terrain, &["terrain", "scenery", "scatter"]),
                AxisRule::new(IntendedUse::Bust, &["bust", "busts"]),
            ],
            role_positive: words(&[
                "hero",
                "heroes",
                "adventurer",
                "adventurers",
                "pc",
                "player",
                "character",
                "characters",
            ]),
            role_negative: words(&[
                "monster", "monsters", "creature", "creatures", "beast", "beasts", "minion",
                "minions", "mob", "npc",
            ]),
            weights: ConfidenceWeights::default(),
        }
    }
}

/// Points awarded by direct evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchWeights {
    pub alias_hit: f64,
    pub token_overlap: f64,
    pub faction_agreement: f64,
    pub system_agreement: f64,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            alias_hit: 12.0,
            token_overlap: 3.0,
            faction_agreement: 4.0,
            system_agreement: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HintConfig {
    pub mount_tokens: Vec<String>,
    pub spell_tokens: Vec<String>,
    pub mount_bonus: f64,
    pub spell_bonus: f64,
    pub chapter_bonus: f64,
    pub faction_step_penalty: f64,
    pub unrelated_faction_penalty: f64,
}

impl Default for HintConfig {
    fn default() -> Self {
        Self {
            mount_tokens: words(&[
                "mount", "mounted", "mounts", "horse", "steed", "rider", "riders", "cavalry",
            ]),
            spell_tokens: words(&["spell", "spells", "invocation", "summoning", "endless"]),
            mount_bonus: 5.0,
            spell_bonus: 6.0,
            chapter_bonus: 4.0,
            faction_step_penalty: 2.0,
            unrelated_faction_penalty: 6.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub min_score: f64,
    pub delta: f64,
    /// Restrict candidates to these game systems (empty = all).
    pub systems: Vec<String>,
    pub include_kit_children: bool,
    pub kit_inherit_ratio: f64,
    pub kinds: Vec<EntityKind>,
    pub weights: MatchWeights,
    pub hints: HintConfig,
    /// Candidates kept per kind in a report.
    pub report_top_n: usize,
    pub coverage_policy: CoveragePolicy,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            min_score: 12.0,
            delta: 3.0,
            systems: Vec::new(),
            include_kit_children: false,
            kit_inherit_ratio: 0.5,
            kinds: EntityKind::ALL.to_vec(),
            weights: MatchWeights::default(),
            hints: HintConfig::default(),
            report_top_n: 5,
            coverage_policy: CoveragePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KitConfig {
    pub child_tokens: Vec<AxisRule<PartPackType>>,
    pub min_recognized_children: usize,
    /// Link unrecognized sibling folders as `other` children.
    pub group_children: bool,
}

impl Default for KitConfig {
    fn default() -> Self {
        Self {
            child_tokens: default_part_pack_rules(),
            min_recognized_children: 2,
            group_children: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tokenizer: TokenizerConfig,
    pub normalizer: NormalizerConfig,
    pub matcher: MatcherConfig,
    pub kits: KitConfig,
    /// Variants per write transaction.
    pub batch_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tokenizer: TokenizerConfig::default(),
            normalizer: NormalizerConfig::default(),
            matcher: MatcherConfig::default(),
            kits: KitConfig::default(),
            batch_size: 500,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(text: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&text)?;
        tracing::debug!(path = %path.display(), "loaded engine config");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config =
            EngineConfig::from_json_str(r#"{"matcher": {"min_score": 15}, "batch_size": 50}"#)
                .unwrap();
        assert_eq!(config.matcher.min_score, 15.0);
        assert_eq!(config.matcher.delta, 3.0);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.kits.min_recognized_children, 2);
        assert_eq!(config.tokenizer, TokenizerConfig::default());
    }

    #[test]
    fn axis_tables_classify_tokens() {
        let config = NormalizerConfig::default();
        assert_eq!(classify(&config.segmentation, "split"), Some(Segmentation::Split));
        assert_eq!(
            classify(&config.support_state, "presupported"),
            Some(SupportState::Presupported)
        );
        assert_eq!(classify(&config.part_pack_type, "helmets"), Some(PartPackType::Heads));
        assert_eq!(classify(&config.segmentation, "archer"), None);
    }

    #[test]
    fn axis_rules_deserialize_with_labels() {
        let rules: Vec<AxisRule<Segmentation>> =
            serde_json::from_str(r#"[{"class": "merged", "tokens": ["glued"]}]"#).unwrap();
        assert_eq!(classify(&rules, "glued"), Some(Segmentation::Merged));
    }
}

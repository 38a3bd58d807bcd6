//! Entity matcher: scores unit/part/franchise/character candidates per variant.
//!
//! Score = direct evidence (alias hit, token overlap, faction/system
//! agreement) + contextual hints ([`hints`]) + an inherited share of the kit
//! parent's score. Selection is delta-gated: a near tie yields no primary.
//!
//! Scoring is read-only and runs in parallel across variants. Kit children are
//! scored one level after their parents so they can inherit.

pub mod coverage;
pub mod hints;

pub use coverage::{kit_coverage, CoveragePolicy, KitCoverage};
pub use hints::{
    ChapterHint, FactionDistanceHint, HintContext, HintEvaluator, HintRegistry, MountHint,
    ScoreAdjustment, SpellHint,
};

use crate::config::MatcherConfig;
use crate::model::{EntityKind, Variant, VariantId};
use crate::normalize::Classification;
use modelvault_vocab::{
    tokenize, Domain, EntryId, TokenStream, TokenizerConfig, VocabularyEntry, VocabularyIndex,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    Primary,
    Secondary,
    Tied,
    BelowThreshold,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub direct: Vec<ScoreAdjustment>,
    pub hints: Vec<ScoreAdjustment>,
    pub inherited: f64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        self.direct.iter().chain(&self.hints).map(|a| a.delta).sum::<f64>() + self.inherited
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchProposal {
    pub variant_id: VariantId,
    pub kind: EntityKind,
    pub target: String,
    pub score: f64,
    pub tier: ConfidenceTier,
    pub breakdown: ScoreBreakdown,
    /// Link value when the proposal was generated.
    pub prior: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchDecision {
    Accepted,
    /// Top candidate not far enough ahead of the runner-up.
    Tied,
    BelowThreshold,
    NoCandidates,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindMatch {
    pub kind: EntityKind,
    pub decision: MatchDecision,
    /// Ordered by score descending, then target ascending.
    pub proposals: Vec<MatchProposal>,
}

impl KindMatch {
    pub fn primary(&self) -> Option<&MatchProposal> {
        self.proposals
            .iter()
            .find(|p| p.tier == ConfidenceTier::Primary)
    }

    pub fn secondary(&self) -> impl Iterator<Item = &MatchProposal> {
        self.proposals
            .iter()
            .filter(|p| p.tier == ConfidenceTier::Secondary)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantMatch {
    pub variant_id: VariantId,
    pub kinds: Vec<KindMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<KitCoverage>,
}

impl VariantMatch {
    pub fn kind(&self, kind: EntityKind) -> Option<&KindMatch> {
        self.kinds.iter().find(|k| k.kind == kind)
    }

    pub fn primaries(&self) -> impl Iterator<Item = &MatchProposal> {
        self.kinds.iter().filter_map(|k| k.primary())
    }

    pub fn classification(&self) -> Classification {
        if self.kinds.iter().any(|k| k.decision == MatchDecision::Accepted) {
            Classification::Matched
        } else if self.kinds.iter().any(|k| k.decision == MatchDecision::Tied) {
            Classification::Conflicted
        } else {
            Classification::Skipped
        }
    }

    /// Candidate scores per kind, for kit children to inherit from.
    fn scores(&self) -> ParentScores {
        self.kinds
            .iter()
            .map(|k| {
                let scores = k
                    .proposals
                    .iter()
                    .map(|p| (p.target.clone(), p.score))
                    .collect();
                (k.kind, scores)
            })
            .collect()
    }
}

type ParentScores = BTreeMap<EntityKind, BTreeMap<String, f64>>;

/// Read-only facts about one variant shared by every candidate.
struct VariantSignals<'a> {
    variant: &'a Variant,
    stream: TokenStream,
    direct_unit_hit: bool,
    sub_factions: Vec<String>,
    hinted_faction: Option<String>,
}

struct ScoredCandidate {
    target: String,
    score: f64,
    breakdown: ScoreBreakdown,
}

pub struct Matcher<'a> {
    index: &'a VocabularyIndex,
    config: &'a MatcherConfig,
    tokenizer: &'a TokenizerConfig,
    hints: HintRegistry,
}

impl<'a> Matcher<'a> {
    pub fn new(
        index: &'a VocabularyIndex,
        config: &'a MatcherConfig,
        tokenizer: &'a TokenizerConfig,
    ) -> Self {
        Self {
            index,
            config,
            tokenizer,
            hints: HintRegistry::from_config(&config.hints),
        }
    }

    pub fn with_hints(mut self, hints: HintRegistry) -> Self {
        self.hints = hints;
        self
    }

    fn signals<'v>(&self, variant: &'v Variant) -> VariantSignals<'v> {
        let stream = tokenize(&variant.segments(), self.tokenizer);
        let direct_unit_hit = self
            .index
            .scan(Domain::Unit, &stream)
            .iter()
            .any(|hit| !self.index.entry(hit.entry).deprecated);

        let mut sub_factions = Vec::new();
        let mut first_faction = None;
        for hit in self.index.scan(Domain::Faction, &stream) {
            let entry = self.index.entry(hit.entry);
            first_faction.get_or_insert_with(|| entry.canonical.clone());
            if entry.parent.is_some() && !sub_factions.contains(&entry.canonical) {
                sub_factions.push(entry.canonical.clone());
            }
        }
        let hinted_faction = variant.fields.codex_faction.clone().or(first_faction);

        VariantSignals {
            variant,
            stream,
            direct_unit_hit,
            sub_factions,
            hinted_faction,
        }
    }

    /// Whether an entry may be proposed for this variant at all.
    fn admissible(&self, entry: &VocabularyEntry, variant: &Variant) -> bool {
        if entry.deprecated {
            return false;
        }
        if let Some(system) = entry.system.as_deref() {
            if !self.config.systems.is_empty() && !self.config.systems.iter().any(|s| s == system) {
                return false;
            }
            if let Some(known) = variant.fields.game_system.as_deref() {
                if known != system {
                    return false;
                }
            }
        }
        true
    }

    fn direct_evidence(
        &self,
        id: EntryId,
        entry: &VocabularyEntry,
        signals: &VariantSignals<'_>,
    ) -> Vec<ScoreAdjustment> {
        let weights = &self.config.weights;
        let stream = &signals.stream;
        let mut direct = Vec::new();

        let full = self.index.surface_tokens(id).iter().find(|form| {
            stream
                .segments
                .iter()
                .any(|segment| segment.windows(form.len()).any(|w| w == form.as_slice()))
        });
        match full {
            Some(form) => direct.push(ScoreAdjustment::new("alias_hit", weights.alias_hit, form.clone())),
            None => {
                let surface: BTreeSet<&String> =
                    self.index.surface_tokens(id).iter().flatten().collect();
                let shared: Vec<String> = stream
                    .residual_candidates
                    .iter()
                    .filter(|t| surface.contains(t))
                    .cloned()
                    .collect();
                if !shared.is_empty() {
                    let delta = weights.token_overlap * shared.len() as f64;
                    direct.push(ScoreAdjustment::new("token_overlap", delta, shared));
                }
            }
        }
        if direct.is_empty() {
            return direct;
        }

        let fields = &signals.variant.fields;
        if let (Some(f), Some(known)) = (&entry.faction, &fields.codex_faction) {
            if f == known {
                direct.push(ScoreAdjustment::new(
                    "faction_agreement",
                    weights.faction_agreement,
                    vec![f.clone()],
                ));
            }
        }
        if let (Some(s), Some(known)) = (&entry.system, &fields.game_system) {
            if s == known {
                direct.push(ScoreAdjustment::new(
                    "system_agreement",
                    weights.system_agreement,
                    vec![s.clone()],
                ));
            }
        }
        direct
    }

    fn score_kind(
        &self,
        kind: EntityKind,
        signals: &VariantSignals<'_>,
        inherited: Option<&BTreeMap<String, f64>>,
    ) -> Vec<ScoredCandidate> {
        let domain = kind.domain();
        let mut ids: BTreeSet<EntryId> = BTreeSet::new();
        for token in &signals.stream.residual_candidates {
            ids.extend(self.index.entries_with_token(domain, token));
        }
        if let Some(parent) = inherited {
            ids.extend(parent.keys().filter_map(|t| self.index.canonical_id(domain, t)));
        }

        let mut scored = Vec::new();
        for id in ids {
            let entry = self.index.entry(id);
            if !self.admissible(entry, signals.variant) {
                continue;
            }
            let direct = self.direct_evidence(id, entry, signals);
            let inherited_score = inherited
                .and_then(|p| p.get(&entry.canonical))
                .map(|s| s * self.config.kit_inherit_ratio)
                .unwrap_or(0.0);
            if direct.is_empty() && inherited_score == 0.0 {
                continue;
            }

            let ctx = HintContext {
                index: self.index,
                variant: signals.variant,
                candidate: entry,
                direct_unit_hit: signals.direct_unit_hit,
                sub_factions: &signals.sub_factions,
                hinted_faction: signals.hinted_faction.as_deref(),
            };
            let breakdown = ScoreBreakdown {
                direct,
                hints: self.hints.evaluate(&signals.stream, &ctx),
                inherited: inherited_score,
            };
            scored.push(ScoredCandidate {
                target: entry.canonical.clone(),
                score: breakdown.total(),
                breakdown,
            });
        }
        scored
    }

    fn select(&self, kind: EntityKind, variant: &Variant, mut scored: Vec<ScoredCandidate>) -> KindMatch {
        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.target.cmp(&b.target))
        });

        let min = self.config.min_score;
        let decision = match scored.first() {
            None => MatchDecision::NoCandidates,
            Some(top) if top.score < min => MatchDecision::BelowThreshold,
            Some(top) => {
                let runner_up = scored.get(1).map(|c| c.score).unwrap_or(0.0);
                if top.score - runner_up >= self.config.delta {
                    MatchDecision::Accepted
                } else {
                    MatchDecision::Tied
                }
            }
        };

        let prior = variant.links.get(kind).cloned();
        let mut below_kept = 0;
        let mut proposals = Vec::new();
        for (i, candidate) in scored.into_iter().enumerate() {
            let tier = if candidate.score < min {
                if below_kept >= self.config.report_top_n {
                    continue;
                }
                below_kept += 1;
                ConfidenceTier::BelowThreshold
            } else {
                match decision {
                    MatchDecision::Accepted if i == 0 => ConfidenceTier::Primary,
                    MatchDecision::Accepted => ConfidenceTier::Secondary,
                    _ => ConfidenceTier::Tied,
                }
            };
            proposals.push(MatchProposal {
                variant_id: variant.id.clone(),
                kind,
                target: candidate.target,
                score: candidate.score,
                tier,
                breakdown: candidate.breakdown,
                prior: prior.clone(),
            });
        }

        KindMatch {
            kind,
            decision,
            proposals,
        }
    }

    fn match_with_parent(&self, variant: &Variant, parent: Option<&ParentScores>) -> VariantMatch {
        let signals = self.signals(variant);
        let kinds = self
            .config
            .kinds
            .iter()
            .map(|&kind| {
                let inherited = parent.and_then(|p| p.get(&kind));
                let scored = self.score_kind(kind, &signals, inherited);
                self.select(kind, variant, scored)
            })
            .collect();
        VariantMatch {
            variant_id: variant.id.clone(),
            kinds,
            coverage: None,
        }
    }

    /// Match one variant in isolation.
    pub fn match_variant(&self, variant: &Variant) -> VariantMatch {
        self.match_with_parent(variant, None)
    }

    /// Match a batch. Output order follows input order.
    pub fn match_all(&self, variants: &[Variant]) -> Vec<VariantMatch> {
        let position: HashMap<&str, usize> = variants
            .iter()
            .enumerate()
            .map(|(i, v)| (v.id.as_str(), i))
            .collect();
        let depth = kit_depths(variants, &position);
        let levels = if self.config.include_kit_children {
            depth.iter().copied().max().unwrap_or(0) + 1
        } else {
            1
        };

        let mut results: Vec<Option<VariantMatch>> = vec![None; variants.len()];
        for level in 0..levels {
            let batch: Vec<(usize, VariantMatch)> = variants
                .par_iter()
                .enumerate()
                .filter(|(i, _)| {
                    !self.config.include_kit_children || depth[*i] == level
                })
                .map(|(i, variant)| {
                    let parent = self
                        .config
                        .include_kit_children
                        .then(|| variant.kit.parent_id.as_deref())
                        .flatten()
                        .and_then(|p| position.get(p))
                        .and_then(|&p| results[p].as_ref())
                        .map(|m| m.scores());
                    (i, self.match_with_parent(variant, parent.as_ref()))
                })
                .collect();
            for (i, result) in batch {
                results[i] = Some(result);
            }
        }

        let mut out: Vec<VariantMatch> = results.into_iter().flatten().collect();
        self.attach_coverage(variants, &mut out);

        tracing::info!(
            variants = out.len(),
            accepted = out.iter().filter(|m| m.classification() == Classification::Matched).count(),
            tied = out.iter().filter(|m| m.classification() == Classification::Conflicted).count(),
            "matched batch"
        );
        out
    }

    /// Coverage for kit containers whose unit was accepted.
    fn attach_coverage(&self, variants: &[Variant], results: &mut [VariantMatch]) {
        let mut parts_by_parent: HashMap<&str, BTreeSet<String>> = HashMap::new();
        for (variant, result) in variants.iter().zip(results.iter()) {
            let Some(parent) = variant.kit.parent_id.as_deref() else {
                continue;
            };
            let part = result
                .kind(EntityKind::Part)
                .and_then(|k| k.primary())
                .map(|p| p.target.clone())
                .or_else(|| variant.links.part.clone());
            if let Some(part) = part {
                parts_by_parent.entry(parent).or_default().insert(part);
            }
        }

        for (variant, result) in variants.iter().zip(results.iter_mut()) {
            if !variant.kit.is_kit_container {
                continue;
            }
            let unit = result
                .kind(EntityKind::Unit)
                .and_then(|k| k.primary())
                .map(|p| p.target.clone())
                .or_else(|| variant.links.unit.clone());
            let Some(unit) = unit else {
                continue;
            };
            let present = parts_by_parent
                .get(variant.id.as_str())
                .cloned()
                .unwrap_or_default();
            result.coverage = kit_coverage(self.index, &unit, &present, self.config.coverage_policy);
        }
    }
}

/// Depth of each variant in the kit graph (0 for roots). Links to variants
/// outside the batch, and cycles, count as roots.
fn kit_depths(variants: &[Variant], position: &HashMap<&str, usize>) -> Vec<usize> {
    variants
        .iter()
        .map(|v| {
            let mut depth = 0;
            let mut seen = BTreeSet::new();
            let mut current = v.kit.parent_id.as_deref();
            while let Some(&p) = current.and_then(|id| position.get(id)) {
                if !seen.insert(p) {
                    break;
                }
                depth += 1;
                current = variants[p].kit.parent_id.as_deref();
            }
            depth
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::model::{ScanRow, VariantKind};
    use modelvault_vocab::{UnitCategory, VocabularySnapshot};

    fn vocab() -> VocabularySnapshot {
        VocabularySnapshot::new(vec![
            VocabularyEntry::new(Domain::Faction, "space_marines").with_system("w40k"),
            VocabularyEntry::new(Domain::Faction, "ultramarines")
                .with_parent("space_marines")
                .with_system("w40k"),
            VocabularyEntry::new(Domain::Unit, "intercessors")
                .with_faction("space_marines")
                .with_system("w40k")
                .with_category(UnitCategory::Infantry),
            VocabularyEntry::new(Domain::Unit, "outriders")
                .with_aliases(&["outrider bikes"])
                .with_faction("space_marines")
                .with_system("w40k")
                .with_category(UnitCategory::Cavalry),
            VocabularyEntry::new(Domain::Unit, "stormcast_knights")
                .with_aliases(&["knights"])
                .with_system("aos"),
            VocabularyEntry::new(Domain::Unit, "knight_errants").with_aliases(&["errants"]),
            VocabularyEntry::new(Domain::Unit, "questing_knights").with_aliases(&["questers"]),
            VocabularyEntry::new(Domain::Unit, "old_scouts").with_aliases(&["scouts"]).deprecated(),
            VocabularyEntry::new(Domain::Part, "intercessor_heads").with_unit("intercessors", false),
            VocabularyEntry::new(Domain::Part, "intercessor_bodies").with_unit("intercessors", false),
            VocabularyEntry::new(Domain::Franchise, "lord_of_the_rings").with_aliases(&["lotr"]),
        ])
    }

    fn index() -> VocabularyIndex {
        VocabularyIndex::build(&vocab(), &TokenizerConfig::default()).unwrap()
    }

    fn variant(id: &str, path: &str) -> Variant {
        Variant::from_scan(ScanRow {
            id: id.to_string(),
            path: path.to_string(),
            kind: Some(VariantKind::Folder),
            size: None,
            mtime: None,
            model_file_count: Some(1),
        })
        .unwrap()
    }

    fn scored(target: &str, score: f64) -> ScoredCandidate {
        ScoredCandidate {
            target: target.to_string(),
            score,
            breakdown: ScoreBreakdown::default(),
        }
    }

    #[test]
    fn delta_gate_refuses_near_ties() {
        let idx = index();
        let config = EngineConfig::default();
        let matcher = Matcher::new(&idx, &config.matcher, &config.tokenizer);
        let v = variant("v", "somewhere");

        let tied = matcher.select(EntityKind::Unit, &v, vec![scored("a", 20.0), scored("b", 18.0)]);
        assert_eq!(tied.decision, MatchDecision::Tied);
        assert!(tied.primary().is_none());
        assert!(tied.proposals.iter().all(|p| p.tier == ConfidenceTier::Tied));

        let clear = matcher.select(EntityKind::Unit, &v, vec![scored("b", 10.0), scored("a", 20.0)]);
        assert_eq!(clear.decision, MatchDecision::Accepted);
        assert_eq!(clear.primary().unwrap().target, "a");
        assert_eq!(clear.proposals[1].tier, ConfidenceTier::BelowThreshold);
    }

    #[test]
    fn clearing_candidates_become_secondary() {
        let idx = index();
        let config = EngineConfig::default();
        let matcher = Matcher::new(&idx, &config.matcher, &config.tokenizer);
        let v = variant("v", "somewhere");
        let out = matcher.select(
            EntityKind::Unit,
            &v,
            vec![scored("a", 24.0), scored("b", 14.0), scored("c", 13.0)],
        );
        assert_eq!(out.primary().unwrap().target, "a");
        assert_eq!(out.secondary().count(), 2);
    }

    #[test]
    fn equal_scores_order_by_target() {
        let idx = index();
        let config = EngineConfig::default();
        let matcher = Matcher::new(&idx, &config.matcher, &config.tokenizer);
        let v = variant("v", "somewhere");
        let out = matcher.select(EntityKind::Unit, &v, vec![scored("b", 5.0), scored("a", 5.0)]);
        assert_eq!(out.decision, MatchDecision::BelowThreshold);
        assert_eq!(out.proposals[0].target, "a");
    }

    #[test]
    fn alias_hit_with_agreement() {
        let idx = index();
        let config = EngineConfig::default();
        let matcher = Matcher::new(&idx, &config.matcher, &config.tokenizer);
        let mut v = variant("v", "SpaceMarines/Intercessors");
        v.fields.game_system = Some("w40k".to_string());
        v.fields.codex_faction = Some("space_marines".to_string());

        let result = matcher.match_variant(&v);
        let unit = result.kind(EntityKind::Unit).unwrap();
        let primary = unit.primary().unwrap();
        assert_eq!(primary.target, "intercessors");
        // alias 12 + faction 4 + system 2
        assert_eq!(primary.score, 18.0);
        assert_eq!(result.classification(), Classification::Matched);
    }

    #[test]
    fn contradicting_system_is_gated_out() {
        let idx = index();
        let config = EngineConfig::default();
        let matcher = Matcher::new(&idx, &config.matcher, &config.tokenizer);
        let mut v = variant("v", "Knights");
        v.fields.game_system = Some("w40k".to_string());
        let unit = matcher.match_variant(&v);
        let unit = unit.kind(EntityKind::Unit).unwrap();
        assert!(unit.proposals.iter().all(|p| p.target != "stormcast_knights"));
    }

    #[test]
    fn systems_option_restricts_candidates() {
        let idx = index();
        let mut config = EngineConfig::default();
        config.matcher.systems = vec!["w40k".to_string()];
        let matcher = Matcher::new(&idx, &config.matcher, &config.tokenizer);
        let result = matcher.match_variant(&variant("v", "Knights"));
        let unit = result.kind(EntityKind::Unit).unwrap();
        assert!(unit.proposals.iter().all(|p| p.target != "stormcast_knights"));
    }

    #[test]
    fn deprecated_entries_are_never_candidates() {
        let idx = index();
        let config = EngineConfig::default();
        let matcher = Matcher::new(&idx, &config.matcher, &config.tokenizer);
        let result = matcher.match_variant(&variant("v", "Scouts"));
        assert_eq!(
            result.kind(EntityKind::Unit).unwrap().decision,
            MatchDecision::NoCandidates
        );
    }

    #[test]
    fn partial_overlap_scores_per_shared_token() {
        let idx = index();
        let config = EngineConfig::default();
        let matcher = Matcher::new(&idx, &config.matcher, &config.tokenizer);
        let result = matcher.match_variant(&variant("v", "Questing_Errant"));
        let unit = result.kind(EntityKind::Unit).unwrap();
        let questing = unit
            .proposals
            .iter()
            .find(|p| p.target == "questing_knights")
            .unwrap();
        assert_eq!(questing.score, 3.0);
        assert_eq!(questing.tier, ConfidenceTier::BelowThreshold);
    }

    #[test]
    fn mount_tokens_favour_mounted_units() {
        let idx = index();
        let config = EngineConfig::default();
        let matcher = Matcher::new(&idx, &config.matcher, &config.tokenizer);
        let result = matcher.match_variant(&variant("v", "Outriders_Mounted"));
        let unit = result.kind(EntityKind::Unit).unwrap();
        let primary = unit.primary().unwrap();
        assert_eq!(primary.target, "outriders");
        assert_eq!(primary.score, 17.0);
        assert_eq!(primary.breakdown.hints[0].rule, "mount_context");
    }

    #[test]
    fn kit_children_inherit_parent_scores() {
        let idx = index();
        let mut config = EngineConfig::default();
        config.matcher.include_kit_children = true;
        let matcher = Matcher::new(&idx, &config.matcher, &config.tokenizer);

        let mut parent = variant("p", "Intercessors");
        parent.kit.is_kit_container = true;
        let mut heads = variant("c1", "Intercessors/Intercessor_Heads");
        heads.kit.parent_id = Some("p".to_string());
        let mut bodies = variant("c2", "Intercessors/Intercessor_Bodies");
        bodies.kit.parent_id = Some("p".to_string());

        // Children first: the level ordering must still score the parent first.
        let results = matcher.match_all(&[heads, bodies, parent]);
        assert_eq!(results[2].variant_id, "p");
        let child_unit = results[0].kind(EntityKind::Unit).unwrap();
        let intercessors = child_unit
            .proposals
            .iter()
            .find(|p| p.target == "intercessors")
            .unwrap();
        assert_eq!(intercessors.breakdown.inherited, 6.0);
        assert_eq!(intercessors.score, 18.0);

        let coverage = results[2].coverage.as_ref().unwrap();
        assert_eq!(coverage.unit, "intercessors");
        assert!(coverage.complete);
    }

    #[test]
    fn franchise_kind_is_independent() {
        let idx = index();
        let config = EngineConfig::default();
        let matcher = Matcher::new(&idx, &config.matcher, &config.tokenizer);
        let result = matcher.match_variant(&variant("v", "LOTR/Intercessors"));
        assert_eq!(
            result.kind(EntityKind::Franchise).unwrap().primary().unwrap().target,
            "lord_of_the_rings"
        );
        assert_eq!(
            result.kind(EntityKind::Unit).unwrap().primary().unwrap().target,
            "intercessors"
        );
    }
}

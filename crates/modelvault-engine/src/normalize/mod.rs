//! Rule-pass normalizer.
//!
//! ```text
//! Variant.path ──► tokenize ──► passes 1..9 (fixed order) ──► NormalizeOutcome
//!                                   │                         (fields, nulled,
//!                      VocabularyIndex (digest-keyed)          warnings, provenance)
//! ```
//!
//! [`normalize`] is pure: it never writes. Writing goes through
//! [`apply_outcome`], which uses the variant's per-field check-and-set, and
//! [`plan_normalization`] decides per variant whether a run has to normalize at
//! all.

mod passes;
pub mod rules;
pub mod structural;

pub use rules::{confidence_delta, AxisMask, CueStrength, RuleFired, RuleOutcome, SystemSource};

use crate::config::EngineConfig;
use crate::model::{
    Field, FieldValue, FieldWrite, NormalizedFields, Provenance, Variant, Warning, WriteMode,
};
use crate::EngineError;
use modelvault_vocab::{tokenize, VocabularyDiff, VocabularyIndex};
use passes::{PassContext, PassState, PASSES};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How a processed variant is tallied in a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Matched,
    Conflicted,
    Skipped,
    Errored,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizeOutcome {
    pub fields: NormalizedFields,
    /// Fields left null because their signals conflicted.
    pub nulled: BTreeSet<Field>,
    pub warnings: Vec<Warning>,
    pub confidence: f64,
    pub raw_tokens: Vec<String>,
    pub residual_tokens: Vec<String>,
    pub rules_fired: Vec<RuleFired>,
    /// Digest of the vocabulary that produced this outcome.
    pub token_version: String,
    /// Rule-table version that produced this outcome.
    pub rules_version: u32,
}

impl NormalizeOutcome {
    pub fn provenance(&self) -> Provenance {
        Provenance {
            token_version: self.token_version.clone(),
            rules_version: self.rules_version,
            raw_tokens: self.raw_tokens.clone(),
            residual_tokens: self.residual_tokens.clone(),
            warnings: self.warnings.clone(),
            rules_fired: self.rules_fired.clone(),
            confidence: self.confidence,
        }
    }

    pub fn classification(&self) -> Classification {
        if self.warnings.iter().any(|w| w.code.is_conflict()) {
            Classification::Conflicted
        } else if self.rules_fired.iter().any(|r| r.outcome.is_signal()) {
            Classification::Matched
        } else {
            Classification::Skipped
        }
    }
}

/// Normalize one variant against an index. Pure and deterministic.
pub fn normalize(variant: &Variant, index: &VocabularyIndex, config: &EngineConfig) -> NormalizeOutcome {
    let stream = tokenize(&variant.segments(), &config.tokenizer);
    let ctx = PassContext {
        index,
        config: &config.normalizer,
        stream: &stream,
        stored_content_flag: variant.fields.content_flag,
    };

    let mut state = PassState::default();
    for (name, pass) in PASSES {
        let before = state.fired.len();
        pass(&ctx, &mut state);
        if state.fired.len() > before {
            tracing::trace!(variant_id = %variant.id, pass = name, "rule fired");
        }
    }

    let residual_tokens = state
        .fired
        .iter()
        .find_map(|r| match &r.outcome {
            RuleOutcome::Residual { tokens } => Some(tokens.clone()),
            _ => None,
        })
        .unwrap_or_default();

    tracing::debug!(
        variant_id = %variant.id,
        rules = state.fired.len(),
        warnings = state.warnings.len(),
        confidence = state.confidence,
        "normalized variant"
    );

    NormalizeOutcome {
        fields: state.fields,
        nulled: state.nulled,
        warnings: state.warnings,
        confidence: state.confidence,
        raw_tokens: stream.raw,
        residual_tokens,
        rules_fired: state.fired,
        token_version: index.digest().to_string(),
        rules_version: config.normalizer.rules_version,
    }
}

/// What a run must do with one variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizePlan {
    Normalize,
    /// Stamp the new digest; the vocabulary change cannot affect this variant.
    Restamp,
    UpToDate,
}

/// Decide whether a variant needs normalizing.
///
/// A variant stamped by another rules version is always normalized. Otherwise
/// an unchanged digest is a no-op. A digest bump normalizes only variants whose
/// raw tokens intersect the diff; a variant stamped with a digest the diff does
/// not start from is normalized in full.
pub fn plan_normalization(
    variant: &Variant,
    index: &VocabularyIndex,
    rules_version: u32,
    diff: Option<&VocabularyDiff>,
    force: bool,
) -> NormalizePlan {
    if force || variant.rules_version != Some(rules_version) {
        return NormalizePlan::Normalize;
    }
    match variant.token_version.as_deref() {
        None => NormalizePlan::Normalize,
        Some(stamped) if stamped == index.digest() => NormalizePlan::UpToDate,
        Some(stamped) => match diff {
            Some(d) if d.from_digest == stamped && d.to_digest == index.digest() => {
                if d.touches(&variant.raw_tokens) {
                    NormalizePlan::Normalize
                } else {
                    NormalizePlan::Restamp
                }
            }
            _ => NormalizePlan::Normalize,
        },
    }
}

/// One proposed field write with the value it was computed against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: Field,
    pub value: Option<FieldValue>,
    pub prior: Option<FieldValue>,
}

/// Field writes an outcome proposes for a variant.
///
/// A null is proposed only for a conflict-nulled field under `force`; a field
/// the outcome simply has no signal for is never cleared.
pub fn field_changes(variant: &Variant, outcome: &NormalizeOutcome, mode: WriteMode) -> Vec<FieldChange> {
    Field::NORMALIZED
        .iter()
        .filter_map(|&field| {
            let value = outcome.fields.get(field);
            let prior = variant.field(field);
            if value == prior {
                return None;
            }
            if value.is_none() && !(mode.force && outcome.nulled.contains(&field)) {
                return None;
            }
            Some(FieldChange { field, value, prior })
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedNormalization {
    pub writes: Vec<(Field, FieldWrite)>,
    /// Whether anything on the row changed, provenance included.
    pub row_changed: bool,
}

impl AppliedNormalization {
    pub fn fields_written(&self) -> usize {
        self.writes.iter().filter(|(_, w)| w.is_written()).count()
    }
}

/// Write an outcome onto a variant through per-field check-and-set, then
/// replace its provenance and stamp the digest.
pub fn apply_outcome(
    variant: &mut Variant,
    outcome: &NormalizeOutcome,
    mode: WriteMode,
) -> Result<AppliedNormalization, EngineError> {
    let mut applied = AppliedNormalization::default();
    for change in field_changes(variant, outcome, mode) {
        let write = variant.check_and_set(change.field, change.value, mode)?;
        if write.is_written() {
            applied.row_changed = true;
        }
        applied.writes.push((change.field, write));
    }

    if variant.record_provenance(&outcome.provenance()) {
        applied.row_changed = true;
    }

    for (field, write) in &applied.writes {
        if let FieldWrite::SkippedOverride = write {
            tracing::debug!(variant_id = %variant.id, field = %field, "kept overridden field");
        }
    }
    Ok(applied)
}

/// Stamp a new digest without touching fields. Returns whether it changed.
pub fn restamp(variant: &mut Variant, digest: &str) -> bool {
    if variant.token_version.as_deref() == Some(digest) {
        return false;
    }
    variant.token_version = Some(digest.to_string());
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NormalizerConfig, NORMALIZER_RULES_VERSION_V1};
    use crate::model::{
        ContentFlag, IntendedUse, PartPackType, ScanRow, Segmentation, SupportState, VariantKind,
        WarningCode,
    };
    use modelvault_vocab::{
        Domain, TokenizerConfig, VocabularyEntry, VocabularySnapshot,
    };

    const RULES: u32 = NORMALIZER_RULES_VERSION_V1;

    fn vocab() -> VocabularySnapshot {
        VocabularySnapshot::new(vec![
            VocabularyEntry::new(Domain::Designer, "ghamak").with_aliases(&["ghamakminiatures"]),
            VocabularyEntry::new(Domain::Designer, "artisan_guild").with_aliases(&["artisanguild"]),
            VocabularyEntry::new(Domain::Lineage, "elf").with_aliases(&["elves", "elven"]),
            VocabularyEntry::new(Domain::Lineage, "dwarf").with_aliases(&["dwarves"]),
            VocabularyEntry::new(Domain::GameSystem, "w40k").with_aliases(&["40k", "warhammer40k"]),
            VocabularyEntry::new(Domain::GameSystem, "aos").with_aliases(&["sigmar"]),
            VocabularyEntry::new(Domain::Faction, "space_marines")
                .with_aliases(&["astartes"])
                .with_system("w40k"),
            VocabularyEntry::new(Domain::Faction, "ultramarines")
                .with_parent("space_marines")
                .with_system("w40k"),
            VocabularyEntry::new(Domain::Faction, "necrons").with_system("w40k"),
            VocabularyEntry::new(Domain::Faction, "stormcast").with_system("aos"),
            VocabularyEntry::new(Domain::Faction, "old_orks")
                .with_aliases(&["orkz"])
                .with_system("w40k")
                .deprecated(),
        ])
    }

    fn index() -> VocabularyIndex {
        VocabularyIndex::build(&vocab(), &TokenizerConfig::default()).unwrap()
    }

    fn variant(path: &str) -> Variant {
        Variant::from_scan(ScanRow {
            id: format!("v:{path}"),
            path: path.to_string(),
            kind: Some(VariantKind::Folder),
            size: None,
            mtime: None,
            model_file_count: Some(1),
        })
        .unwrap()
    }

    fn run(path: &str) -> NormalizeOutcome {
        normalize(&variant(path), &index(), &EngineConfig::default())
    }

    fn codes(outcome: &NormalizeOutcome) -> Vec<WarningCode> {
        outcome.warnings.iter().map(|w| w.code).collect()
    }

    #[test]
    fn ghamak_elf_archer() {
        let out = run("GhamakMiniatures/Elf_Archer_32mm_v2_split_presupported");
        assert_eq!(out.fields.designer.as_deref(), Some("ghamak"));
        assert_eq!(out.fields.version_num, Some(2));
        assert_eq!(out.fields.height_mm, Some(32));
        assert_eq!(out.fields.segmentation, Some(Segmentation::Split));
        assert_eq!(out.fields.support_state, Some(SupportState::Presupported));
        assert_eq!(out.fields.lineage_family.as_deref(), Some("elf"));
        assert!(out.warnings.is_empty());
        assert_eq!(out.classification(), Classification::Matched);
        assert_eq!(out.residual_tokens, vec!["archer"]);
        // designer 5 + lineage 4 + height 3 + version 1 + two axes 2 each
        assert_eq!(out.confidence, 17.0);
    }

    #[test]
    fn split_and_merged_conflict() {
        let out = run("Ghamak/Orc_Boss_split_merged");
        assert_eq!(out.fields.segmentation, Some(Segmentation::Unknown));
        assert_eq!(codes(&out), vec![WarningCode::SegmentationConflict]);
        assert_eq!(out.classification(), Classification::Conflicted);
    }

    #[test]
    fn factions_from_two_systems_without_system_token() {
        let out = run("Necrons/Stormcast/Warrior");
        assert_eq!(out.fields.game_system, None);
        assert_eq!(out.fields.codex_faction, None);
        assert_eq!(
            codes(&out),
            vec![WarningCode::FactionWithoutSystem, WarningCode::FactionWithoutSystem]
        );
        assert!(out.nulled.contains(&Field::CodexFaction));
    }

    #[test]
    fn agreeing_factions_promote_the_system() {
        let out = run("Astartes/Ultramarines/Intercessors");
        assert_eq!(out.fields.game_system.as_deref(), Some("w40k"));
        // Parent and child on one chain resolve to the child.
        assert_eq!(out.fields.codex_faction.as_deref(), Some("ultramarines"));
        assert!(out.warnings.is_empty());
        let faction = out
            .rules_fired
            .iter()
            .find_map(|r| match &r.outcome {
                RuleOutcome::Faction { system_source, .. } => Some(*system_source),
                _ => None,
            })
            .unwrap();
        assert_eq!(faction, SystemSource::Promoted);
    }

    #[test]
    fn unrelated_factions_of_a_known_system_collide() {
        let out = run("40k/Necrons/Ultramarines/Diorama");
        assert_eq!(out.fields.game_system.as_deref(), Some("w40k"));
        assert_eq!(out.fields.codex_faction.as_deref(), Some("necrons"));
        assert!(codes(&out).contains(&WarningCode::FactionAliasCollision));
    }

    #[test]
    fn faction_from_another_system_is_a_mismatch() {
        let out = run("40k/Necrons/Stormcast");
        assert_eq!(out.fields.codex_faction.as_deref(), Some("necrons"));
        assert_eq!(codes(&out), vec![WarningCode::FactionSystemMismatch]);
    }

    #[test]
    fn two_explicit_systems_conflict() {
        let out = run("40k/Sigmar/Necrons");
        assert_eq!(out.fields.game_system, None);
        assert!(codes(&out).contains(&WarningCode::GameSystemConflict));
        assert!(codes(&out).contains(&WarningCode::FactionWithoutSystem));
    }

    #[test]
    fn deprecated_entries_resolve_with_a_warning() {
        let out = run("40k/Orkz/Boyz");
        assert_eq!(out.fields.codex_faction.as_deref(), Some("old_orks"));
        assert_eq!(codes(&out), vec![WarningCode::DeprecatedVocabularyEntry]);
        assert_eq!(out.classification(), Classification::Matched);
    }

    #[test]
    fn designer_collision_keeps_first() {
        let out = run("ArtisanGuild/Ghamak/Knight");
        assert_eq!(out.fields.designer.as_deref(), Some("artisan_guild"));
        assert_eq!(codes(&out), vec![WarningCode::DesignerAliasCollision]);
    }

    #[test]
    fn ambiguous_lineage_is_nulled() {
        let out = run("Elves/Dwarves/Warband");
        assert_eq!(out.fields.lineage_family, None);
        assert_eq!(codes(&out), vec![WarningCode::AmbiguousLineageToken]);
    }

    #[test]
    fn structural_version_conflict() {
        let out = run("Knight_v1/Knight_v2");
        assert_eq!(out.fields.version_num, None);
        assert_eq!(codes(&out), vec![WarningCode::VersionConflict]);
        assert!(out.nulled.contains(&Field::VersionNum));
    }

    #[test]
    fn nsfw_cues() {
        let strong = run("Pinups/Elf_Nsfw");
        assert_eq!(strong.fields.content_flag, Some(ContentFlag::Nsfw));
        assert!(strong.warnings.is_empty());

        let weak = run("Elf_Pinup");
        assert_eq!(weak.fields.content_flag, Some(ContentFlag::Nsfw));
        assert_eq!(codes(&weak), vec![WarningCode::NsfwWeakCue]);
        assert_eq!(weak.classification(), Classification::Matched);

        let mut stored = variant("Elf_Pinup");
        stored.fields.content_flag = Some(ContentFlag::Sfw);
        let out = normalize(&stored, &index(), &EngineConfig::default());
        assert_eq!(out.fields.content_flag, None);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn weak_nsfw_cue_is_stable_across_reruns() {
        let idx = index();
        let config = EngineConfig::default();
        let mut v = variant("Elf_Pinup");

        let first = normalize(&v, &idx, &config);
        apply_outcome(&mut v, &first, WriteMode::SAFE).unwrap();
        assert_eq!(v.fields.content_flag, Some(ContentFlag::Nsfw));
        let stored_confidence = v.confidence;

        let rerun = normalize(&v, &idx, &config);
        assert_eq!(codes(&rerun), vec![WarningCode::NsfwWeakCue]);
        assert_eq!(rerun.confidence, first.confidence);
        apply_outcome(&mut v, &rerun, WriteMode::FORCE).unwrap();
        assert_eq!(v.fields.content_flag, Some(ContentFlag::Nsfw));
        assert_eq!(
            v.normalization_warnings.iter().map(|w| w.code).collect::<Vec<_>>(),
            vec![WarningCode::NsfwWeakCue]
        );
        assert_eq!(v.confidence, stored_confidence);
    }

    #[test]
    fn intended_use_reads_only_leading_segments() {
        let out = run("Display/Busts/Elf_Queen");
        assert_eq!(out.fields.intended_use_bucket, None);
        assert_eq!(codes(&out), vec![WarningCode::IntendedUseConflict]);

        let deep = run("Ghamak/Elves/Display_Queen");
        assert_eq!(deep.fields.intended_use_bucket, None);
        assert!(deep.warnings.is_empty());

        let top = run("Terrain/Ruins");
        assert_eq!(top.fields.intended_use_bucket, Some(IntendedUse::Terrain));
    }

    #[test]
    fn role_flags() {
        assert_eq!(run("Heroes/Elf_Ranger").fields.pc_candidate, Some(true));

        let conflict = run("Heroes/Monsters/Troll");
        assert_eq!(conflict.fields.pc_candidate, None);
        assert_eq!(codes(&conflict), vec![WarningCode::RoleConflict]);

        let negative = run("Monsters/Troll");
        assert_eq!(negative.fields.pc_candidate, None);
        assert!(negative.warnings.is_empty());
        assert_eq!(negative.residual_tokens, vec!["troll"]);
    }

    #[test]
    fn part_pack_axis() {
        let out = run("Intercessors/heads");
        assert_eq!(out.fields.part_pack_type, Some(PartPackType::Heads));
    }

    #[test]
    fn no_signal_is_skipped() {
        let out = run("misc/untitled");
        assert_eq!(out.classification(), Classification::Skipped);
        assert_eq!(out.residual_tokens, vec!["misc", "untitled"]);
    }

    #[test]
    fn normalize_is_deterministic() {
        let a = run("Astartes/Ultramarines/Intercessors_split_merged_v2_pose3");
        let b = run("Astartes/Ultramarines/Intercessors_split_merged_v2_pose3");
        assert_eq!(a, b);
    }

    #[test]
    fn apply_then_rerun_is_a_noop() {
        let idx = index();
        let config = EngineConfig::default();
        let mut v = variant("GhamakMiniatures/Elf_Archer_32mm_v2_split_presupported");

        assert_eq!(plan_normalization(&v, &idx, RULES, None, false), NormalizePlan::Normalize);
        let outcome = normalize(&v, &idx, &config);
        let applied = apply_outcome(&mut v, &outcome, WriteMode::SAFE).unwrap();
        assert!(applied.row_changed);
        assert_eq!(applied.fields_written(), 6);

        assert_eq!(plan_normalization(&v, &idx, RULES, None, false), NormalizePlan::UpToDate);
        let recheck = normalize(&v, &idx, &config);
        let again = apply_outcome(&mut v, &recheck, WriteMode::SAFE).unwrap();
        assert!(!again.row_changed);
    }

    #[test]
    fn override_survives_unless_forced() {
        let idx = index();
        let config = EngineConfig::default();
        let mut v = variant("GhamakMiniatures/Elf_Archer");
        v.set_override(Field::Designer, Some(FieldValue::text("artisan_guild")))
            .unwrap();

        let outcome = normalize(&v, &idx, &config);
        let applied = apply_outcome(&mut v, &outcome, WriteMode::SAFE).unwrap();
        assert!(applied
            .writes
            .contains(&(Field::Designer, FieldWrite::SkippedOverride)));
        assert_eq!(v.fields.designer.as_deref(), Some("artisan_guild"));

        apply_outcome(&mut v, &outcome, WriteMode::FORCE).unwrap();
        assert_eq!(v.fields.designer.as_deref(), Some("ghamak"));
    }

    #[test]
    fn conflict_nulls_clear_only_under_force() {
        let idx = index();
        let config = EngineConfig::default();
        let mut v = variant("Elves/Dwarves/Warband");
        v.fields.lineage_family = Some("elf".to_string());

        let outcome = normalize(&v, &idx, &config);
        assert!(field_changes(&v, &outcome, WriteMode::SAFE).is_empty());
        let forced = field_changes(&v, &outcome, WriteMode::FORCE);
        assert_eq!(
            forced,
            vec![FieldChange {
                field: Field::LineageFamily,
                value: None,
                prior: Some(FieldValue::text("elf")),
            }]
        );
        apply_outcome(&mut v, &outcome, WriteMode::FORCE).unwrap();
        assert_eq!(v.fields.lineage_family, None);
    }

    #[test]
    fn digest_bump_restamps_untouched_variants() {
        let config = EngineConfig::default();
        let old = vocab();
        let old_index = index();
        let mut new = vocab();
        new.entries
            .push(VocabularyEntry::new(Domain::Lineage, "orc").with_aliases(&["orcs"]));
        let new_index = VocabularyIndex::build(&new, &config.tokenizer).unwrap();
        let diff = VocabularyDiff::between(&old, &new, &config.tokenizer);

        let mut elf = variant("Elves/Archer");
        let mut orc = variant("Orcs/Boss");
        for v in [&mut elf, &mut orc] {
            let outcome = normalize(v, &old_index, &config);
            apply_outcome(v, &outcome, WriteMode::SAFE).unwrap();
        }

        assert_eq!(
            plan_normalization(&elf, &new_index, RULES, Some(&diff), false),
            NormalizePlan::Restamp
        );
        assert_eq!(
            plan_normalization(&orc, &new_index, RULES, Some(&diff), false),
            NormalizePlan::Normalize
        );
        assert!(restamp(&mut elf, new_index.digest()));
        assert!(!restamp(&mut elf, new_index.digest()));
    }

    #[test]
    fn rules_version_bump_renormalizes() {
        let idx = index();
        let config = EngineConfig::default();
        let mut v = variant("GhamakMiniatures/Elf_Archer_v2");
        let outcome = normalize(&v, &idx, &config);
        assert_eq!(outcome.rules_version, RULES);
        apply_outcome(&mut v, &outcome, WriteMode::SAFE).unwrap();
        assert_eq!(v.rules_version, Some(RULES));
        assert_eq!(plan_normalization(&v, &idx, RULES, None, false), NormalizePlan::UpToDate);
        assert_eq!(
            plan_normalization(&v, &idx, RULES + 1, None, false),
            NormalizePlan::Normalize
        );

        let bumped = EngineConfig {
            normalizer: NormalizerConfig {
                rules_version: RULES + 1,
                ..NormalizerConfig::default()
            },
            ..EngineConfig::default()
        };
        let rebumped = normalize(&v, &idx, &bumped);
        let again = apply_outcome(&mut v, &rebumped, WriteMode::SAFE).unwrap();
        assert!(again.row_changed);
        assert_eq!(again.fields_written(), 0);
        assert_eq!(v.rules_version, Some(RULES + 1));
        assert_eq!(
            plan_normalization(&v, &idx, RULES + 1, None, false),
            NormalizePlan::UpToDate
        );
    }
}

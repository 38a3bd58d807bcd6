//! The nine classification passes, in their fixed order.
//!
//! Later passes read what earlier ones decided (the NSFW weak cue checks the
//! flag, residual capture checks consumed tokens), so the order in [`PASSES`]
//! is part of the output contract.

use super::rules::{confidence_delta, AxisMask, CueStrength, RuleFired, RuleOutcome, SystemSource};
use super::structural::{self, STRUCTURAL_FIELDS};
use crate::config::{AxisRule, NormalizerConfig};
use crate::model::{
    ContentFlag, Field, FieldValue, IntendedUse, InternalVolume, NormalizedFields, PartPackType,
    Segmentation, SupportState, Warning, WarningCode,
};
use modelvault_vocab::{Domain, EntryId, TokenStream, VocabularyEntry, VocabularyIndex};
use std::collections::{BTreeMap, BTreeSet, HashSet};

pub(crate) struct PassContext<'a> {
    pub index: &'a VocabularyIndex,
    pub config: &'a NormalizerConfig,
    pub stream: &'a TokenStream,
    /// Content flag already stored on the variant.
    pub stored_content_flag: Option<ContentFlag>,
}

#[derive(Debug, Default)]
pub(crate) struct PassState {
    pub fields: NormalizedFields,
    pub nulled: BTreeSet<Field>,
    pub warnings: Vec<Warning>,
    pub consumed: HashSet<String>,
    pub fired: Vec<RuleFired>,
    pub confidence: f64,
}

impl PassState {
    fn record(&mut self, ctx: &PassContext<'_>, outcome: RuleOutcome) {
        let delta = confidence_delta(&outcome, &ctx.config.weights);
        self.confidence += delta;
        self.fired.push(RuleFired { outcome, delta });
    }

    fn warn(&mut self, code: WarningCode, detail: impl Into<String>) {
        self.warnings.push(Warning::with_detail(code, detail));
    }

    fn consume<'t>(&mut self, tokens: impl IntoIterator<Item = &'t String>) {
        self.consumed.extend(tokens.into_iter().cloned());
    }

    fn null(&mut self, field: Field) {
        self.nulled.insert(field);
    }
}

pub(crate) type Pass = fn(&PassContext<'_>, &mut PassState);

pub(crate) const PASSES: [(&str, Pass); 9] = [
    ("structural", structural_pass),
    ("designer", designer_pass),
    ("faction", faction_pass),
    ("lineage", lineage_pass),
    ("axes", axes_pass),
    ("nsfw", nsfw_pass),
    ("intended_use", intended_use_pass),
    ("role", role_pass),
    ("residual", residual_pass),
];

/// Alias hits of one domain, one per distinct entry, in first-occurrence order.
struct EntryHits {
    entries: Vec<EntryId>,
    tokens: Vec<String>,
}

fn entry_hits(index: &VocabularyIndex, domain: Domain, stream: &TokenStream) -> EntryHits {
    let mut entries: Vec<EntryId> = Vec::new();
    let mut tokens: Vec<String> = Vec::new();
    for hit in index.scan(domain, stream) {
        if !entries.contains(&hit.entry) {
            entries.push(hit.entry);
        }
        for token in hit.tokens {
            if !tokens.contains(&token) {
                tokens.push(token);
            }
        }
    }
    EntryHits { entries, tokens }
}

fn warn_deprecated(state: &mut PassState, entries: &[&VocabularyEntry]) {
    for entry in entries.iter().filter(|e| e.deprecated) {
        state.warn(
            WarningCode::DeprecatedVocabularyEntry,
            format!("{}:{}", entry.domain, entry.canonical),
        );
    }
}

fn canonicals(entries: &[&VocabularyEntry]) -> Vec<String> {
    entries.iter().map(|e| e.canonical.clone()).collect()
}

fn structural_pass(ctx: &PassContext<'_>, state: &mut PassState) {
    let range = (
        ctx.config.scale_denominator_min,
        ctx.config.scale_denominator_max,
    );
    let matches = structural::extract(&ctx.stream.normalized_segments, range);

    for (found, (field, code)) in matches.iter().zip(STRUCTURAL_FIELDS) {
        if found.values.is_empty() {
            continue;
        }
        state.consume(&found.tokens);
        let candidates = found.distinct();
        let value = if candidates.len() == 1 {
            Some(candidates[0].clone())
        } else {
            let listed: Vec<String> = candidates.iter().map(|v| v.to_string()).collect();
            state.warn(code, listed.join(", "));
            state.null(field);
            None
        };
        match (field, &value) {
            (Field::ScaleRatio, Some(FieldValue::Number(n))) => state.fields.scale_ratio = Some(*n),
            (Field::HeightMm, Some(FieldValue::Number(n))) => state.fields.height_mm = Some(*n),
            (Field::VersionNum, Some(FieldValue::Number(n))) => state.fields.version_num = Some(*n),
            (Field::PoseCode, Some(FieldValue::Text(pose))) => {
                state.fields.pose_code = Some(pose.clone())
            }
            _ => {}
        }
        state.record(
            ctx,
            RuleOutcome::Structural {
                field,
                value,
                candidates,
                tokens: found.tokens.clone(),
            },
        );
    }
}

fn designer_pass(ctx: &PassContext<'_>, state: &mut PassState) {
    let hits = entry_hits(ctx.index, Domain::Designer, ctx.stream);
    let entries: Vec<&VocabularyEntry> = hits.entries.iter().map(|&id| ctx.index.entry(id)).collect();
    let Some(first) = entries.first() else {
        return;
    };
    state.consume(&hits.tokens);
    warn_deprecated(state, &entries);

    let rejected = canonicals(&entries[1..]);
    if !rejected.is_empty() {
        state.warn(
            WarningCode::DesignerAliasCollision,
            format!("kept {}; rejected {}", first.canonical, rejected.join(", ")),
        );
    }
    state.fields.designer = Some(first.canonical.clone());
    state.record(
        ctx,
        RuleOutcome::Designer {
            designer: first.canonical.clone(),
            rejected,
            tokens: hits.tokens,
        },
    );
}

/// Resolve compatible staged factions to one.
///
/// Factions on a single ancestor chain resolve to the most specific; otherwise
/// the first occurrence is kept and the result is a collision.
fn resolve_factions(index: &VocabularyIndex, staged: &[&VocabularyEntry]) -> (Option<String>, bool) {
    let Some(first) = staged.first() else {
        return (None, false);
    };
    if staged.len() == 1 {
        return (Some(first.canonical.clone()), false);
    }

    let chains: Vec<Vec<String>> = staged
        .iter()
        .map(|e| index.ancestors(Domain::Faction, &e.canonical))
        .collect();
    let deepest = (0..chains.len())
        .rev()
        .max_by_key(|&i| chains[i].len())
        .unwrap_or(0);
    let on_one_chain = staged
        .iter()
        .all(|e| chains[deepest].contains(&e.canonical));

    if on_one_chain {
        (Some(staged[deepest].canonical.clone()), false)
    } else {
        (Some(first.canonical.clone()), true)
    }
}

fn faction_pass(ctx: &PassContext<'_>, state: &mut PassState) {
    let system_hits = entry_hits(ctx.index, Domain::GameSystem, ctx.stream);
    let faction_hits = entry_hits(ctx.index, Domain::Faction, ctx.stream);
    if system_hits.entries.is_empty() && faction_hits.entries.is_empty() {
        return;
    }

    let systems: Vec<&VocabularyEntry> = system_hits
        .entries
        .iter()
        .map(|&id| ctx.index.entry(id))
        .collect();
    let staged: Vec<&VocabularyEntry> = faction_hits
        .entries
        .iter()
        .map(|&id| ctx.index.entry(id))
        .collect();
    state.consume(&system_hits.tokens);
    state.consume(&faction_hits.tokens);
    warn_deprecated(state, &systems);
    warn_deprecated(state, &staged);

    let mut tokens = system_hits.tokens;
    tokens.extend(faction_hits.tokens);

    let (mut game_system, mut system_source) = match systems.as_slice() {
        [] => (None, SystemSource::None),
        [only] => (Some(only.canonical.clone()), SystemSource::Explicit),
        many => {
            state.warn(
                WarningCode::GameSystemConflict,
                canonicals(many).join(", "),
            );
            state.null(Field::GameSystem);
            (None, SystemSource::Conflict)
        }
    };

    if system_source == SystemSource::None {
        let mut votes: BTreeMap<&str, usize> = BTreeMap::new();
        for faction in &staged {
            if let Some(system) = faction.system.as_deref() {
                *votes.entry(system).or_default() += 1;
            }
        }
        let best = votes.values().copied().max().unwrap_or(0);
        let leaders: Vec<&str> = votes
            .iter()
            .filter(|&(_, &n)| n == best && n >= 2)
            .map(|(s, _)| *s)
            .collect();
        if let [leader] = leaders.as_slice() {
            game_system = Some(leader.to_string());
            system_source = SystemSource::Promoted;
        }
    }

    let mut mismatched = Vec::new();
    let mut without_system = Vec::new();
    let (faction, collision) = match game_system.as_deref() {
        Some(system) => {
            let mut compatible: Vec<&VocabularyEntry> = Vec::new();
            for faction in &staged {
                match faction.system.as_deref() {
                    Some(own) if own != system => {
                        state.warn(
                            WarningCode::FactionSystemMismatch,
                            format!("{} belongs to {own}, not {system}", faction.canonical),
                        );
                        mismatched.push(faction.canonical.clone());
                    }
                    _ => compatible.push(faction),
                }
            }
            resolve_factions(ctx.index, &compatible)
        }
        None => {
            for faction in &staged {
                state.warn(WarningCode::FactionWithoutSystem, faction.canonical.clone());
                without_system.push(faction.canonical.clone());
            }
            (None, false)
        }
    };

    if collision {
        state.warn(
            WarningCode::FactionAliasCollision,
            format!(
                "kept {}; staged {}",
                faction.as_deref().unwrap_or_default(),
                canonicals(&staged).join(", ")
            ),
        );
    }
    if faction.is_none() && !staged.is_empty() {
        state.null(Field::CodexFaction);
    }

    state.fields.game_system = game_system.clone();
    state.fields.codex_faction = faction.clone();
    state.record(
        ctx,
        RuleOutcome::Faction {
            game_system,
            system_source,
            faction,
            staged: canonicals(&staged),
            collision,
            mismatched,
            without_system,
            tokens,
        },
    );
}

fn lineage_pass(ctx: &PassContext<'_>, state: &mut PassState) {
    let hits = entry_hits(ctx.index, Domain::Lineage, ctx.stream);
    let entries: Vec<&VocabularyEntry> = hits.entries.iter().map(|&id| ctx.index.entry(id)).collect();
    if entries.is_empty() {
        return;
    }
    state.consume(&hits.tokens);
    warn_deprecated(state, &entries);

    let candidates = canonicals(&entries);
    let lineage = if candidates.len() == 1 {
        Some(candidates[0].clone())
    } else {
        state.warn(WarningCode::AmbiguousLineageToken, candidates.join(", "));
        state.null(Field::LineageFamily);
        None
    };
    state.fields.lineage_family = lineage.clone();
    state.record(
        ctx,
        RuleOutcome::Lineage {
            lineage,
            candidates,
            tokens: hits.tokens,
        },
    );
}

/// One variant axis. Returns the resolved class, `unknown` on conflict.
fn axis<T: Copy + PartialEq>(
    ctx: &PassContext<'_>,
    state: &mut PassState,
    field: Field,
    rules: &[AxisRule<T>],
    unknown: T,
    code: WarningCode,
    label: fn(T) -> &'static str,
) -> Option<T> {
    let mask = AxisMask::scan(rules, &ctx.stream.dedup);
    if mask.is_empty() {
        return None;
    }
    state.consume(&mask.tokens);

    let classes = mask.classes(rules);
    let value = match classes.as_slice() {
        [one] => *one,
        many => {
            let listed: Vec<&str> = many.iter().map(|c| label(*c)).collect();
            state.warn(code, listed.join(", "));
            unknown
        }
    };
    state.record(
        ctx,
        RuleOutcome::Axis {
            field,
            value: label(value).to_string(),
            classes: classes.iter().map(|c| label(*c).to_string()).collect(),
            tokens: mask.tokens,
        },
    );
    Some(value)
}

fn axes_pass(ctx: &PassContext<'_>, state: &mut PassState) {
    let config = ctx.config;
    if let Some(v) = axis(
        ctx,
        state,
        Field::Segmentation,
        &config.segmentation,
        Segmentation::Unknown,
        WarningCode::SegmentationConflict,
        Segmentation::as_str,
    ) {
        state.fields.segmentation = Some(v);
    }
    if let Some(v) = axis(
        ctx,
        state,
        Field::InternalVolume,
        &config.internal_volume,
        InternalVolume::Unknown,
        WarningCode::InternalVolumeConflict,
        InternalVolume::as_str,
    ) {
        state.fields.internal_volume = Some(v);
    }
    if let Some(v) = axis(
        ctx,
        state,
        Field::SupportState,
        &config.support_state,
        SupportState::Unknown,
        WarningCode::SupportStateConflict,
        SupportState::as_str,
    ) {
        state.fields.support_state = Some(v);
    }
    if let Some(v) = axis(
        ctx,
        state,
        Field::PartPackType,
        &config.part_pack_type,
        PartPackType::Unknown,
        WarningCode::PartPackTypeConflict,
        PartPackType::as_str,
    ) {
        state.fields.part_pack_type = Some(v);
    }
}

fn matching_tokens(stream: &TokenStream, cues: &[String]) -> Vec<String> {
    stream
        .dedup
        .iter()
        .filter(|t| cues.contains(t))
        .cloned()
        .collect()
}

fn nsfw_pass(ctx: &PassContext<'_>, state: &mut PassState) {
    let strong = matching_tokens(ctx.stream, &ctx.config.nsfw_strong);
    let weak = matching_tokens(ctx.stream, &ctx.config.nsfw_weak);
    state.consume(&strong);
    state.consume(&weak);

    if !strong.is_empty() {
        state.fields.content_flag = Some(ContentFlag::Nsfw);
        state.record(
            ctx,
            RuleOutcome::Nsfw {
                strength: CueStrength::Strong,
                applied: true,
                tokens: strong,
            },
        );
    } else if !weak.is_empty() {
        // A stored nsfw flag is this cue's own earlier result.
        let applied = state.fields.content_flag.is_none()
            && matches!(ctx.stored_content_flag, None | Some(ContentFlag::Nsfw));
        if applied {
            state.fields.content_flag = Some(ContentFlag::Nsfw);
            state.warn(WarningCode::NsfwWeakCue, weak.join(", "));
        }
        state.record(
            ctx,
            RuleOutcome::Nsfw {
                strength: CueStrength::Weak,
                applied,
                tokens: weak,
            },
        );
    }
}

fn intended_use_pass(ctx: &PassContext<'_>, state: &mut PassState) {
    let rules = &ctx.config.intended_use;
    let mut candidates: Vec<IntendedUse> = Vec::new();
    let mut tokens: Vec<String> = Vec::new();
    for token in ctx.stream.leading_tokens(ctx.config.intended_use_depth) {
        if let Some(bucket) = rules.iter().find(|r| r.matches(token)).map(|r| r.class) {
            tokens.push(token.to_string());
            if !candidates.contains(&bucket) {
                candidates.push(bucket);
            }
        }
    }
    if candidates.is_empty() {
        return;
    }
    state.consume(&tokens);

    let bucket = match candidates.as_slice() {
        [one] => Some(*one),
        many => {
            let listed: Vec<&str> = many.iter().map(|b| b.as_str()).collect();
            state.warn(WarningCode::IntendedUseConflict, listed.join(", "));
            state.null(Field::IntendedUseBucket);
            None
        }
    };
    state.fields.intended_use_bucket = bucket;
    state.record(
        ctx,
        RuleOutcome::IntendedUse {
            bucket,
            candidates,
            tokens,
        },
    );
}

fn role_pass(ctx: &PassContext<'_>, state: &mut PassState) {
    let positive = matching_tokens(ctx.stream, &ctx.config.role_positive);
    let negative = matching_tokens(ctx.stream, &ctx.config.role_negative);
    if positive.is_empty() && negative.is_empty() {
        return;
    }
    state.consume(&positive);
    state.consume(&negative);

    let pc_candidate = match (positive.is_empty(), negative.is_empty()) {
        (false, true) => Some(true),
        (false, false) => {
            state.warn(
                WarningCode::RoleConflict,
                format!("{} vs {}", positive.join(", "), negative.join(", ")),
            );
            state.null(Field::PcCandidate);
            None
        }
        // Negative-only: consumed, flag left alone.
        _ => None,
    };
    state.fields.pc_candidate = pc_candidate;
    state.record(
        ctx,
        RuleOutcome::Role {
            pc_candidate,
            positive,
            negative,
        },
    );
}

fn residual_pass(ctx: &PassContext<'_>, state: &mut PassState) {
    let tokens: Vec<String> = ctx
        .stream
        .residual_candidates
        .iter()
        .filter(|t| !state.consumed.contains(*t))
        .cloned()
        .collect();
    if tokens.is_empty() {
        return;
    }
    state.record(ctx, RuleOutcome::Residual { tokens });
}

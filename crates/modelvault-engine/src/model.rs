//! Variant data model.
//!
//! A [`Variant`] is created at ingestion with empty normalized fields and is
//! mutated only through [`Variant::check_and_set`] (normalizer, apply engine)
//! and the kit helpers in [`crate::kits`]. Nothing in this crate deletes one.

use crate::normalize::RuleFired;
use crate::EngineError;
use modelvault_vocab::{path_segments, Domain};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub type VariantId = String;

/// Closed enums with a stable snake_case label used in reports, the store and
/// config tables.
macro_rules! labelled_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident => $label:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub const fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }

            pub fn parse(label: &str) -> Option<Self> {
                match label {
                    $($label => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

labelled_enum! {
    pub enum Segmentation {
        Split => "split",
        Merged => "merged",
        Unknown => "unknown",
    }
}

labelled_enum! {
    pub enum InternalVolume {
        Hollow => "hollow",
        Solid => "solid",
        Unknown => "unknown",
    }
}

labelled_enum! {
    pub enum SupportState {
        Presupported => "presupported",
        Supported => "supported",
        Unsupported => "unsupported",
        Unknown => "unknown",
    }
}

labelled_enum! {
    /// Part-pack type of a folder; doubles as the normalized kit-child label.
    pub enum PartPackType {
        Bodies => "bodies",
        Heads => "heads",
        Weapons => "weapons",
        Arms => "arms",
        Legs => "legs",
        Bits => "bits",
        Shields => "shields",
        Backpacks => "backpacks",
        Bases => "bases",
        Other => "other",
        Unknown => "unknown",
    }
}

labelled_enum! {
    pub enum ContentFlag {
        Sfw => "sfw",
        Nsfw => "nsfw",
    }
}

labelled_enum! {
    pub enum IntendedUse {
        Tabletop => "tabletop",
        Display => "display",
        Terrain => "terrain",
        Bust => "bust",
    }
}

labelled_enum! {
    /// Every writable per-variant field, including entity links.
    pub enum Field {
        Designer => "designer",
        GameSystem => "game_system",
        CodexFaction => "codex_faction",
        LineageFamily => "lineage_family",
        Segmentation => "segmentation",
        InternalVolume => "internal_volume",
        SupportState => "support_state",
        PartPackType => "part_pack_type",
        ContentFlag => "content_flag",
        IntendedUseBucket => "intended_use_bucket",
        PcCandidate => "pc_candidate",
        ScaleRatio => "scale_ratio",
        HeightMm => "height_mm",
        VersionNum => "version_num",
        PoseCode => "pose_code",
        UnitLink => "unit_link",
        PartLink => "part_link",
        FranchiseLink => "franchise_link",
        CharacterLink => "character_link",
    }
}

impl Field {
    /// Fields produced by the normalizer (links excluded).
    pub const NORMALIZED: [Field; 15] = [
        Field::Designer,
        Field::GameSystem,
        Field::CodexFaction,
        Field::LineageFamily,
        Field::Segmentation,
        Field::InternalVolume,
        Field::SupportState,
        Field::PartPackType,
        Field::ContentFlag,
        Field::IntendedUseBucket,
        Field::PcCandidate,
        Field::ScaleRatio,
        Field::HeightMm,
        Field::VersionNum,
        Field::PoseCode,
    ];

    /// Parse a curator-supplied value for this field.
    pub fn parse_value(self, raw: &str) -> Result<FieldValue, EngineError> {
        let invalid = || EngineError::FieldValue {
            field: self,
            value: raw.to_string(),
        };
        let value = match self {
            Field::PcCandidate => FieldValue::Flag(raw.parse().map_err(|_| invalid())?),
            Field::ScaleRatio | Field::HeightMm | Field::VersionNum => {
                FieldValue::Number(raw.parse().map_err(|_| invalid())?)
            }
            _ => FieldValue::text(raw),
        };
        let mut probe = NormalizedFields::default();
        if self.link_kind().is_none() {
            probe.set(self, Some(value.clone()))?;
        }
        Ok(value)
    }

    pub fn link_kind(self) -> Option<EntityKind> {
        match self {
            Field::UnitLink => Some(EntityKind::Unit),
            Field::PartLink => Some(EntityKind::Part),
            Field::FranchiseLink => Some(EntityKind::Franchise),
            Field::CharacterLink => Some(EntityKind::Character),
            _ => None,
        }
    }
}

labelled_enum! {
    /// Taxonomy kinds the matcher proposes links for.
    pub enum EntityKind {
        Unit => "unit",
        Part => "part",
        Franchise => "franchise",
        Character => "character",
    }
}

impl EntityKind {
    pub const fn domain(self) -> Domain {
        match self {
            EntityKind::Unit => Domain::Unit,
            EntityKind::Part => Domain::Part,
            EntityKind::Franchise => Domain::Franchise,
            EntityKind::Character => Domain::Character,
        }
    }

    pub const fn link_field(self) -> Field {
        match self {
            EntityKind::Unit => Field::UnitLink,
            EntityKind::Part => Field::PartLink,
            EntityKind::Franchise => Field::FranchiseLink,
            EntityKind::Character => Field::CharacterLink,
        }
    }
}

labelled_enum! {
    /// Stable warning codes. Codes are part of the report contract.
    pub enum WarningCode {
        ScaleRatioConflict => "scale_ratio_conflict",
        HeightMmConflict => "height_mm_conflict",
        VersionConflict => "version_conflict",
        PoseConflict => "pose_conflict",
        DesignerAliasCollision => "designer_alias_collision",
        GameSystemConflict => "game_system_conflict",
        FactionWithoutSystem => "faction_without_system",
        FactionSystemMismatch => "faction_system_mismatch",
        FactionAliasCollision => "faction_alias_collision",
        AmbiguousLineageToken => "ambiguous_lineage_token",
        SegmentationConflict => "segmentation_conflict",
        InternalVolumeConflict => "internal_volume_conflict",
        SupportStateConflict => "support_state_conflict",
        PartPackTypeConflict => "part_pack_type_conflict",
        NsfwWeakCue => "nsfw_weak_cue",
        IntendedUseConflict => "intended_use_conflict",
        RoleConflict => "role_conflict",
        DeprecatedVocabularyEntry => "deprecated_vocabulary_entry",
    }
}

impl WarningCode {
    /// Advisory codes do not make a variant "conflicted".
    pub fn is_conflict(self) -> bool {
        !matches!(
            self,
            WarningCode::NsfwWeakCue | WarningCode::DeprecatedVocabularyEntry
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub code: WarningCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Warning {
    pub fn new(code: WarningCode) -> Self {
        Self { code, detail: None }
    }

    pub fn with_detail(code: WarningCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: Some(detail.into()),
        }
    }
}

/// A field value as it crosses the report/store boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Flag(bool),
    Number(u32),
    Text(String),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Text(value.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Flag(b) => write!(f, "{b}"),
            FieldValue::Number(n) => write!(f, "{n}"),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedFields {
    pub designer: Option<String>,
    pub game_system: Option<String>,
    pub codex_faction: Option<String>,
    pub lineage_family: Option<String>,
    pub segmentation: Option<Segmentation>,
    pub internal_volume: Option<InternalVolume>,
    pub support_state: Option<SupportState>,
    pub part_pack_type: Option<PartPackType>,
    pub content_flag: Option<ContentFlag>,
    pub intended_use_bucket: Option<IntendedUse>,
    pub pc_candidate: Option<bool>,
    /// Denominator of a `1:N` scale.
    pub scale_ratio: Option<u32>,
    pub height_mm: Option<u32>,
    pub version_num: Option<u32>,
    pub pose_code: Option<String>,
}

fn text_of<T: Copy>(value: Option<T>, label: fn(T) -> &'static str) -> Option<FieldValue> {
    value.map(|v| FieldValue::text(label(v)))
}

fn parse_label<T>(
    field: Field,
    value: Option<FieldValue>,
    parse: fn(&str) -> Option<T>,
) -> Result<Option<T>, EngineError> {
    match value {
        None => Ok(None),
        Some(FieldValue::Text(s)) => parse(&s)
            .map(Some)
            .ok_or(EngineError::FieldValue { field, value: s }),
        Some(other) => Err(EngineError::FieldValue {
            field,
            value: other.to_string(),
        }),
    }
}

fn expect_text(field: Field, value: Option<FieldValue>) -> Result<Option<String>, EngineError> {
    match value {
        None => Ok(None),
        Some(FieldValue::Text(s)) => Ok(Some(s)),
        Some(other) => Err(EngineError::FieldValue {
            field,
            value: other.to_string(),
        }),
    }
}

fn expect_number(field: Field, value: Option<FieldValue>) -> Result<Option<u32>, EngineError> {
    match value {
        None => Ok(None),
        Some(FieldValue::Number(n)) => Ok(Some(n)),
        Some(other) => Err(EngineError::FieldValue {
            field,
            value: other.to_string(),
        }),
    }
}

fn expect_flag(field: Field, value: Option<FieldValue>) -> Result<Option<bool>, EngineError> {
    match value {
        None => Ok(None),
        Some(FieldValue::Flag(b)) => Ok(Some(b)),
        Some(other) => Err(EngineError::FieldValue {
            field,
            value: other.to_string(),
        }),
    }
}

impl NormalizedFields {
    /// Current value of a normalized field. Link fields are always `None` here.
    pub fn get(&self, field: Field) -> Option<FieldValue> {
        match field {
            Field::Designer => self.designer.clone().map(FieldValue::Text),
            Field::GameSystem => self.game_system.clone().map(FieldValue::Text),
            Field::CodexFaction => self.codex_faction.clone().map(FieldValue::Text),
            Field::LineageFamily => self.lineage_family.clone().map(FieldValue::Text),
            Field::Segmentation => text_of(self.segmentation, Segmentation::as_str),
            Field::InternalVolume => text_of(self.internal_volume, InternalVolume::as_str),
            Field::SupportState => text_of(self.support_state, SupportState::as_str),
            Field::PartPackType => text_of(self.part_pack_type, PartPackType::as_str),
            Field::ContentFlag => text_of(self.content_flag, ContentFlag::as_str),
            Field::IntendedUseBucket => text_of(self.intended_use_bucket, IntendedUse::as_str),
            Field::PcCandidate => self.pc_candidate.map(FieldValue::Flag),
            Field::ScaleRatio => self.scale_ratio.map(FieldValue::Number),
            Field::HeightMm => self.height_mm.map(FieldValue::Number),
            Field::VersionNum => self.version_num.map(FieldValue::Number),
            Field::PoseCode => self.pose_code.clone().map(FieldValue::Text),
            Field::UnitLink | Field::PartLink | Field::FranchiseLink | Field::CharacterLink => {
                None
            }
        }
    }

    /// Set a normalized field, checking the value's shape.
    pub fn set(&mut self, field: Field, value: Option<FieldValue>) -> Result<(), EngineError> {
        match field {
            Field::Designer => self.designer = expect_text(field, value)?,
            Field::GameSystem => self.game_system = expect_text(field, value)?,
            Field::CodexFaction => self.codex_faction = expect_text(field, value)?,
            Field::LineageFamily => self.lineage_family = expect_text(field, value)?,
            Field::Segmentation => {
                self.segmentation = parse_label(field, value, Segmentation::parse)?
            }
            Field::InternalVolume => {
                self.internal_volume = parse_label(field, value, InternalVolume::parse)?
            }
            Field::SupportState => {
                self.support_state = parse_label(field, value, SupportState::parse)?
            }
            Field::PartPackType => {
                self.part_pack_type = parse_label(field, value, PartPackType::parse)?
            }
            Field::ContentFlag => {
                self.content_flag = parse_label(field, value, ContentFlag::parse)?
            }
            Field::IntendedUseBucket => {
                self.intended_use_bucket = parse_label(field, value, IntendedUse::parse)?
            }
            Field::PcCandidate => self.pc_candidate = expect_flag(field, value)?,
            Field::ScaleRatio => self.scale_ratio = expect_number(field, value)?,
            Field::HeightMm => self.height_mm = expect_number(field, value)?,
            Field::VersionNum => self.version_num = expect_number(field, value)?,
            Field::PoseCode => self.pose_code = expect_text(field, value)?,
            Field::UnitLink | Field::PartLink | Field::FranchiseLink | Field::CharacterLink => {
                return Err(EngineError::FieldValue {
                    field,
                    value: value.map(|v| v.to_string()).unwrap_or_default(),
                })
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantKind {
    File,
    #[default]
    Folder,
}

/// Extensions of files that hold printable models.
pub const MODEL_EXTENSIONS: &[&str] = &[
    "stl", "obj", "3mf", "lys", "chitubox", "ztl", "blend", "fbx", "ply",
];

impl VariantKind {
    /// A row whose last segment carries a model extension is a file.
    pub fn infer(path: &str) -> VariantKind {
        let name = path_segments(path).last().copied().unwrap_or("");
        let is_model = name.rsplit_once('.').is_some_and(|(stem, ext)| {
            !stem.is_empty()
                && MODEL_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
        });
        if is_model {
            VariantKind::File
        } else {
            VariantKind::Folder
        }
    }
}

/// Kit relationship fields. The kit graph is a flat table of variants with
/// `parent_id` back-references.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KitFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<VariantId>,
    #[serde(default)]
    pub is_kit_container: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kit_child_types: Vec<PartPackType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kit_child_label: Option<PartPackType>,
}

/// Accepted entity links.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityLinks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub franchise: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character: Option<String>,
    /// Non-primary links (multi-unit proxies).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub secondary: BTreeMap<EntityKind, BTreeSet<String>>,
}

impl EntityLinks {
    pub fn get(&self, kind: EntityKind) -> Option<&String> {
        match kind {
            EntityKind::Unit => self.unit.as_ref(),
            EntityKind::Part => self.part.as_ref(),
            EntityKind::Franchise => self.franchise.as_ref(),
            EntityKind::Character => self.character.as_ref(),
        }
    }

    pub fn slot_mut(&mut self, kind: EntityKind) -> &mut Option<String> {
        match kind {
            EntityKind::Unit => &mut self.unit,
            EntityKind::Part => &mut self.part,
            EntityKind::Franchise => &mut self.franchise,
            EntityKind::Character => &mut self.character,
        }
    }
}

/// One scanned row as delivered by the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRow {
    pub id: VariantId,
    pub path: String,
    /// Inferred from the path's extension when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<VariantKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime: Option<i64>,
    /// Model files directly inside a folder (or 1 for a model file).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_file_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub id: VariantId,
    pub path: String,
    #[serde(default)]
    pub kind: VariantKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime: Option<i64>,
    #[serde(default)]
    pub model_file_count: u32,

    #[serde(default)]
    pub raw_tokens: Vec<String>,
    #[serde(default)]
    pub residual_tokens: Vec<String>,
    #[serde(default)]
    pub fields: NormalizedFields,
    /// Fields a curator pinned by hand.
    #[serde(default)]
    pub overrides: BTreeSet<Field>,
    #[serde(default)]
    pub kit: KitFields,
    #[serde(default)]
    pub links: EntityLinks,

    /// Vocabulary digest that produced `fields`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_version: Option<String>,
    /// Rule-table version that produced `fields`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules_version: Option<u32>,
    #[serde(default)]
    pub normalization_warnings: Vec<Warning>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub rules_fired: Vec<RuleFired>,
}

/// How a variant's normalized fields were derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub token_version: String,
    pub rules_version: u32,
    pub raw_tokens: Vec<String>,
    pub residual_tokens: Vec<String>,
    pub warnings: Vec<Warning>,
    pub rules_fired: Vec<RuleFired>,
    pub confidence: f64,
}

/// Force semantics for one write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteMode {
    pub force: bool,
}

impl WriteMode {
    pub const SAFE: WriteMode = WriteMode { force: false };
    pub const FORCE: WriteMode = WriteMode { force: true };
}

/// Result of a per-field check-and-set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FieldWrite {
    Written,
    Unchanged,
    SkippedOccupied,
    SkippedOverride,
    /// The field no longer holds the value a proposal was computed against.
    Conflict { current: Option<FieldValue> },
}

impl FieldWrite {
    pub fn is_written(&self) -> bool {
        matches!(self, FieldWrite::Written)
    }
}

impl Variant {
    pub fn from_scan(row: ScanRow) -> Result<Self, EngineError> {
        if path_segments(&row.path).is_empty() {
            return Err(EngineError::EmptyPath { variant_id: row.id });
        }
        let kind = row.kind.unwrap_or_else(|| VariantKind::infer(&row.path));
        Ok(Self {
            model_file_count: row.model_file_count.unwrap_or(match kind {
                VariantKind::File => 1,
                VariantKind::Folder => 0,
            }),
            id: row.id,
            path: row.path,
            kind,
            size: row.size,
            mtime: row.mtime,
            raw_tokens: Vec::new(),
            residual_tokens: Vec::new(),
            fields: NormalizedFields::default(),
            overrides: BTreeSet::new(),
            kit: KitFields::default(),
            links: EntityLinks::default(),
            token_version: None,
            rules_version: None,
            normalization_warnings: Vec::new(),
            confidence: 0.0,
            rules_fired: Vec::new(),
        })
    }

    pub fn segments(&self) -> Vec<&str> {
        path_segments(&self.path)
    }

    /// Last path segment.
    pub fn name(&self) -> &str {
        self.segments().last().copied().unwrap_or("")
    }

    /// Parent folder path, `None` at the library root.
    pub fn parent_path(&self) -> Option<String> {
        let segments = self.segments();
        if segments.len() < 2 {
            return None;
        }
        Some(segments[..segments.len() - 1].join("/"))
    }

    pub fn field(&self, field: Field) -> Option<FieldValue> {
        match field.link_kind() {
            Some(kind) => self.links.get(kind).cloned().map(FieldValue::Text),
            None => self.fields.get(field),
        }
    }

    fn store_field(&mut self, field: Field, value: Option<FieldValue>) -> Result<(), EngineError> {
        match field.link_kind() {
            Some(kind) => {
                *self.links.slot_mut(kind) = expect_text(field, value)?;
                Ok(())
            }
            None => self.fields.set(field, value),
        }
    }

    pub fn is_overridden(&self, field: Field) -> bool {
        self.overrides.contains(&field)
    }

    /// Per-field check-and-set.
    ///
    /// Without `force` a value is written only into an empty, non-overridden
    /// field. With `force`, set and overridden fields are overwritten too.
    pub fn check_and_set(
        &mut self,
        field: Field,
        value: Option<FieldValue>,
        mode: WriteMode,
    ) -> Result<FieldWrite, EngineError> {
        let current = self.field(field);
        if current == value {
            return Ok(FieldWrite::Unchanged);
        }
        if self.is_overridden(field) && !mode.force {
            return Ok(FieldWrite::SkippedOverride);
        }
        if current.is_some() && !mode.force {
            return Ok(FieldWrite::SkippedOccupied);
        }
        self.store_field(field, value)?;
        Ok(FieldWrite::Written)
    }

    /// Check-and-set guarded by the value observed when a proposal was made.
    pub fn compare_and_set(
        &mut self,
        field: Field,
        expected_prior: Option<&FieldValue>,
        value: Option<FieldValue>,
        mode: WriteMode,
    ) -> Result<FieldWrite, EngineError> {
        let current = self.field(field);
        if current == value {
            return Ok(FieldWrite::Unchanged);
        }
        if current.as_ref() != expected_prior {
            return Ok(FieldWrite::Conflict { current });
        }
        self.check_and_set(field, value, mode)
    }

    /// Curator override: always written, and pinned against later runs.
    pub fn set_override(
        &mut self,
        field: Field,
        value: Option<FieldValue>,
    ) -> Result<(), EngineError> {
        self.store_field(field, value)?;
        self.overrides.insert(field);
        Ok(())
    }

    pub fn clear_override(&mut self, field: Field) -> bool {
        self.overrides.remove(&field)
    }

    /// Replace the stored provenance. Returns whether anything changed.
    pub fn record_provenance(&mut self, provenance: &Provenance) -> bool {
        let unchanged = self.token_version.as_deref() == Some(provenance.token_version.as_str())
            && self.rules_version == Some(provenance.rules_version)
            && self.raw_tokens == provenance.raw_tokens
            && self.residual_tokens == provenance.residual_tokens
            && self.normalization_warnings == provenance.warnings
            && self.rules_fired == provenance.rules_fired
            && self.confidence == provenance.confidence;
        if unchanged {
            return false;
        }
        self.token_version = Some(provenance.token_version.clone());
        self.rules_version = Some(provenance.rules_version);
        self.raw_tokens = provenance.raw_tokens.clone();
        self.residual_tokens = provenance.residual_tokens.clone();
        self.normalization_warnings = provenance.warnings.clone();
        self.rules_fired = provenance.rules_fired.clone();
        self.confidence = provenance.confidence;
        true
    }

    pub fn has_conflicts(&self) -> bool {
        self.normalization_warnings.iter().any(|w| w.code.is_conflict())
    }
}

/// A row of the inventory that could not become a variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRow {
    pub row: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<VariantId>,
    pub message: String,
}

/// Parse an inventory JSON array row by row.
///
/// A malformed row never aborts the load; it is returned as a [`RejectedRow`].
/// Only a document that is not a JSON array is an error.
pub fn parse_inventory(text: &str) -> Result<(Vec<Variant>, Vec<RejectedRow>), EngineError> {
    let rows: Vec<serde_json::Value> = serde_json::from_str(text)?;
    let mut variants = Vec::with_capacity(rows.len());
    let mut rejected = Vec::new();

    for (row, value) in rows.into_iter().enumerate() {
        let variant_id = value
            .get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let parsed = serde_json::from_value::<ScanRow>(value)
            .map_err(|e| EngineError::InvalidRow {
                row,
                message: e.to_string(),
            })
            .and_then(Variant::from_scan);
        match parsed {
            Ok(variant) => variants.push(variant),
            Err(err) => {
                tracing::warn!(row, variant_id = ?variant_id, error = %err, "skipping inventory row");
                rejected.push(RejectedRow {
                    row,
                    variant_id,
                    message: err.to_string(),
                });
            }
        }
    }

    Ok((variants, rejected))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(path: &str) -> Variant {
        Variant::from_scan(ScanRow {
            id: "v1".to_string(),
            path: path.to_string(),
            kind: Some(VariantKind::Folder),
            size: None,
            mtime: None,
            model_file_count: Some(3),
        })
        .unwrap()
    }

    #[test]
    fn parse_value_is_typed_by_field() {
        assert_eq!(Field::VersionNum.parse_value("3").unwrap(), FieldValue::Number(3));
        assert_eq!(Field::PcCandidate.parse_value("true").unwrap(), FieldValue::Flag(true));
        assert_eq!(Field::Segmentation.parse_value("split").unwrap(), FieldValue::text("split"));
        assert!(Field::Segmentation.parse_value("halved").is_err());
        assert!(Field::ScaleRatio.parse_value("1:32").is_err());
        assert_eq!(Field::UnitLink.parse_value("intercessors").unwrap(), FieldValue::text("intercessors"));
    }

    #[test]
    fn labels_round_trip_through_parse() {
        for field in Field::ALL {
            assert_eq!(Field::parse(field.as_str()), Some(*field));
        }
        assert_eq!(PartPackType::parse("heads"), Some(PartPackType::Heads));
        assert_eq!(PartPackType::parse("helmets"), None);
    }

    #[test]
    fn serde_uses_the_same_labels() {
        let json = serde_json::to_string(&WarningCode::SegmentationConflict).unwrap();
        assert_eq!(json, "\"segmentation_conflict\"");
        let json = serde_json::to_string(&Field::IntendedUseBucket).unwrap();
        assert_eq!(json, format!("\"{}\"", Field::IntendedUseBucket.as_str()));
    }

    #[test]
    fn empty_path_is_rejected() {
        let err = Variant::from_scan(ScanRow {
            id: "bad".to_string(),
            path: " / ".to_string(),
            kind: Some(VariantKind::File),
            size: None,
            mtime: None,
            model_file_count: None,
        })
        .unwrap_err();
        assert!(matches!(err, EngineError::EmptyPath { .. }));
    }

    #[test]
    fn check_and_set_writes_only_empty_fields() {
        let mut v = variant("Elf/Archer");
        let split = Some(FieldValue::text("split"));
        let merged = Some(FieldValue::text("merged"));

        assert_eq!(
            v.check_and_set(Field::Segmentation, split.clone(), WriteMode::SAFE).unwrap(),
            FieldWrite::Written
        );
        assert_eq!(v.fields.segmentation, Some(Segmentation::Split));
        assert_eq!(
            v.check_and_set(Field::Segmentation, split, WriteMode::SAFE).unwrap(),
            FieldWrite::Unchanged
        );
        assert_eq!(
            v.check_and_set(Field::Segmentation, merged.clone(), WriteMode::SAFE).unwrap(),
            FieldWrite::SkippedOccupied
        );
        assert_eq!(
            v.check_and_set(Field::Segmentation, merged, WriteMode::FORCE).unwrap(),
            FieldWrite::Written
        );
        assert_eq!(v.fields.segmentation, Some(Segmentation::Merged));
    }

    #[test]
    fn overrides_survive_unless_forced() {
        let mut v = variant("Elf/Archer");
        v.set_override(Field::Designer, Some(FieldValue::text("ghamak")))
            .unwrap();
        assert_eq!(
            v.check_and_set(Field::Designer, Some(FieldValue::text("other")), WriteMode::SAFE)
                .unwrap(),
            FieldWrite::SkippedOverride
        );
        assert_eq!(
            v.check_and_set(Field::Designer, Some(FieldValue::text("other")), WriteMode::FORCE)
                .unwrap(),
            FieldWrite::Written
        );
    }

    #[test]
    fn compare_and_set_detects_drift() {
        let mut v = variant("Elf/Archer");
        v.links.unit = Some("archers".to_string());
        let result = v
            .compare_and_set(
                Field::UnitLink,
                None,
                Some(FieldValue::text("rangers")),
                WriteMode::SAFE,
            )
            .unwrap();
        assert_eq!(
            result,
            FieldWrite::Conflict {
                current: Some(FieldValue::text("archers"))
            }
        );
    }

    #[test]
    fn wrong_value_shape_is_an_error() {
        let mut v = variant("Elf/Archer");
        assert!(v
            .check_and_set(Field::VersionNum, Some(FieldValue::text("two")), WriteMode::SAFE)
            .is_err());
        assert!(v
            .check_and_set(Field::SupportState, Some(FieldValue::text("glued")), WriteMode::SAFE)
            .is_err());
    }

    #[test]
    fn inventory_rows_fail_independently() {
        let text = r#"[
            {"id": "a", "path": "Ghamak/Elf_Archer", "kind": "folder", "model_file_count": 2},
            {"id": "b", "path": ""},
            {"path": "missing/id"},
            {"id": "c", "path": "Ghamak/Elf_Archer/archer.stl", "kind": "file"}
        ]"#;
        let (variants, rejected) = parse_inventory(text).unwrap();
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[1].model_file_count, 1);
        assert_eq!(rejected.len(), 2);
        assert_eq!(rejected[0].variant_id.as_deref(), Some("b"));
        assert_eq!(rejected[1].row, 2);
    }

    #[test]
    fn missing_kind_is_inferred_from_extension() {
        let text = r#"[
            {"id": "k0", "path": "Intercessors"},
            {"id": "k1", "path": "Intercessors/bodies"},
            {"id": "f1", "path": "Intercessors/bodies/body_a.STL"},
            {"id": "f3", "path": "Intercessors/v1.5_release"}
        ]"#;
        let (variants, rejected) = parse_inventory(text).unwrap();
        assert!(rejected.is_empty());
        let kinds: Vec<VariantKind> = variants.iter().map(|v| v.kind).collect();
        assert_eq!(
            kinds,
            vec![
                VariantKind::Folder,
                VariantKind::Folder,
                VariantKind::File,
                VariantKind::Folder,
            ]
        );
        assert_eq!(variants[1].model_file_count, 0);
        assert_eq!(variants[2].model_file_count, 1);
    }

    #[test]
    fn parent_path_and_name() {
        let v = variant("Intercessors/heads");
        assert_eq!(v.parent_path().as_deref(), Some("Intercessors"));
        assert_eq!(v.name(), "heads");
        assert_eq!(variant("Intercessors").parent_path(), None);
    }
}

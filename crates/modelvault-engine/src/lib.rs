//! Deterministic taxonomy engine for modelvault.
//!
//! ```text
//! ScanRow ──► Variant ──► normalize (rule passes) ──► NormalizeOutcome ──► apply_outcome
//!                │                                                            │
//!                ├──► backfill_kits (structural) ──► KitWrite plan             ▼
//!                │                                                      stored Variant
//!                └──► Matcher (hints, kit inheritance, delta gate) ──► VariantMatch
//! ```
//!
//! Everything here is pure planning over in-memory variants. Persistence and
//! reporting live in `modelvault-storage` and `modelvault-proposals`.

pub mod config;
pub mod error;
pub mod kits;
pub mod matcher;
pub mod model;
pub mod normalize;

pub use config::{
    AxisRule, ConfidenceWeights, EngineConfig, HintConfig, KitConfig, MatchWeights,
    MatcherConfig, NormalizerConfig,
};
pub use error::EngineError;
pub use kits::{apply_kit_write, backfill_kits, AmbiguousChild, KitBackfill, KitWrite};
pub use matcher::{
    ConfidenceTier, CoveragePolicy, KindMatch, KitCoverage, MatchDecision, MatchProposal, Matcher,
    ScoreAdjustment, ScoreBreakdown, VariantMatch,
};
pub use model::{
    parse_inventory, ContentFlag, EntityKind, EntityLinks, Field, FieldValue, FieldWrite,
    IntendedUse, InternalVolume, KitFields, NormalizedFields, PartPackType, Provenance,
    RejectedRow, ScanRow, Segmentation, SupportState, Variant, VariantId, VariantKind, Warning,
    WarningCode, WriteMode,
};
pub use normalize::{
    apply_outcome, field_changes, normalize, plan_normalization, restamp, AppliedNormalization,
    Classification, FieldChange, NormalizeOutcome, NormalizePlan, RuleFired, RuleOutcome,
};

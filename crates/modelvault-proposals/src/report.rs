//! Job reports.
//!
//! Every job run, dry or not, produces one [`Report`]. Items carry the full
//! provenance of each decision (proposed writes with the values they were
//! computed against, rules fired, warnings, score breakdowns) so a saved dry-run
//! report can later be applied or shown without recomputation.

use crate::apply::ApplyConflict;
use crate::JobError;
use chrono::{DateTime, Utc};
use modelvault_engine::normalize::{FieldChange, NormalizeOutcome, NormalizePlan};
use modelvault_engine::{
    AmbiguousChild, Classification, KitWrite, RuleFired, ScanRow, Variant, VariantId,
    VariantMatch, Warning, WarningCode,
};
use modelvault_storage::IngestWrite;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const REPORT_VERSION_V1: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Ingest,
    Normalize,
    Kits,
    Match,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Ingest => "ingest",
            JobKind::Normalize => "normalize",
            JobKind::Kits => "kits",
            JobKind::Match => "match",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run totals. `processed = matched + conflicted + skipped + errored` always holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub processed: usize,
    pub matched: usize,
    pub conflicted: usize,
    pub skipped: usize,
    pub errored: usize,
    /// Variants whose digest was bumped without re-normalizing.
    #[serde(default)]
    pub restamped: usize,
    #[serde(default)]
    pub up_to_date: usize,
    #[serde(default)]
    pub rows_updated: usize,
    #[serde(default)]
    pub apply_conflicts: usize,
    /// Proposed writes not applied because the field was already set.
    #[serde(default)]
    pub fields_kept: usize,
    #[serde(default)]
    pub warnings: BTreeMap<WarningCode, usize>,
}

impl Summary {
    fn slot(&mut self, class: Classification) -> &mut usize {
        match class {
            Classification::Matched => &mut self.matched,
            Classification::Conflicted => &mut self.conflicted,
            Classification::Skipped => &mut self.skipped,
            Classification::Errored => &mut self.errored,
        }
    }

    pub fn tally(&mut self, class: Classification) {
        self.processed += 1;
        *self.slot(class) += 1;
    }

    /// Move one already-tallied item to another class.
    pub fn reclassify(&mut self, from: Classification, to: Classification) {
        if from == to {
            return;
        }
        let old = self.slot(from);
        *old = old.saturating_sub(1);
        *self.slot(to) += 1;
    }

    pub fn reconciles(&self) -> bool {
        self.processed == self.matched + self.conflicted + self.skipped + self.errored
    }
}

/// What a report item proposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Proposal {
    Ingest {
        write: IngestWrite,
        row: ScanRow,
    },
    Normalize {
        plan: NormalizePlan,
        #[serde(default)]
        changes: Vec<FieldChange>,
        #[serde(default)]
        raw_tokens: Vec<String>,
        #[serde(default)]
        residual_tokens: Vec<String>,
    },
    Kit {
        #[serde(default)]
        writes: Vec<KitWrite>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ambiguous: Option<AmbiguousChild>,
        #[serde(default)]
        stale_link: bool,
        #[serde(default)]
        part_pack_conflict: bool,
    },
    Match {
        matches: VariantMatch,
    },
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportItem {
    pub variant_id: VariantId,
    pub proposal: Proposal,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub rules_fired: Vec<RuleFired>,
    #[serde(default)]
    pub warnings: Vec<Warning>,
    pub outcome: Classification,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub apply_conflicts: Vec<ApplyConflict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReportItem {
    fn bare(variant_id: VariantId, proposal: Proposal, outcome: Classification) -> Self {
        Self {
            variant_id,
            proposal,
            confidence: 0.0,
            rules_fired: Vec::new(),
            warnings: Vec::new(),
            outcome,
            apply_conflicts: Vec::new(),
            error: None,
        }
    }

    pub fn ingest(row: ScanRow, write: IngestWrite) -> Self {
        let outcome = match write {
            IngestWrite::Inserted | IngestWrite::Updated => Classification::Matched,
            IngestWrite::Unchanged => Classification::Skipped,
        };
        Self::bare(row.id.clone(), Proposal::Ingest { write, row }, outcome)
    }

    pub fn normalized(variant_id: VariantId, changes: Vec<FieldChange>, outcome: &NormalizeOutcome) -> Self {
        Self {
            confidence: outcome.confidence,
            rules_fired: outcome.rules_fired.clone(),
            warnings: outcome.warnings.clone(),
            ..Self::bare(
                variant_id,
                Proposal::Normalize {
                    plan: NormalizePlan::Normalize,
                    changes,
                    raw_tokens: outcome.raw_tokens.clone(),
                    residual_tokens: outcome.residual_tokens.clone(),
                },
                outcome.classification(),
            )
        }
    }

    /// A variant the run did not re-normalize (up to date or restamped).
    pub fn unchanged(variant: &Variant, plan: NormalizePlan) -> Self {
        Self {
            confidence: variant.confidence,
            ..Self::bare(
                variant.id.clone(),
                Proposal::Normalize {
                    plan,
                    changes: Vec::new(),
                    raw_tokens: Vec::new(),
                    residual_tokens: Vec::new(),
                },
                Classification::Skipped,
            )
        }
    }

    pub fn kit(
        variant_id: VariantId,
        writes: Vec<KitWrite>,
        involved: bool,
        ambiguous: Option<AmbiguousChild>,
        stale_link: bool,
        part_pack_conflict: bool,
    ) -> Self {
        let outcome = if stale_link || part_pack_conflict || ambiguous.as_ref().is_some_and(|a| !a.grouped) {
            Classification::Conflicted
        } else if involved {
            Classification::Matched
        } else {
            Classification::Skipped
        };
        Self::bare(
            variant_id,
            Proposal::Kit {
                writes,
                ambiguous,
                stale_link,
                part_pack_conflict,
            },
            outcome,
        )
    }

    pub fn matched(matches: VariantMatch) -> Self {
        let confidence = matches
            .primaries()
            .map(|p| p.score)
            .fold(0.0_f64, f64::max);
        let outcome = matches.classification();
        Self {
            confidence,
            ..Self::bare(matches.variant_id.clone(), Proposal::Match { matches }, outcome)
        }
    }

    pub fn errored(variant_id: VariantId, message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::bare(variant_id, Proposal::None, Classification::Errored)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub version: u32,
    pub generated_at: DateTime<Utc>,
    pub script: JobKind,
    pub db_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vocabulary_digest: Option<String>,
    /// Normalizer rules version, on normalize reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules_version: Option<u32>,
    pub dry_run: bool,
    #[serde(default)]
    pub force: bool,
    pub summary: Summary,
    pub items: Vec<ReportItem>,
}

impl Report {
    pub fn new(script: JobKind, db_url: String, vocabulary_digest: Option<String>, force: bool) -> Self {
        Self {
            version: REPORT_VERSION_V1,
            generated_at: Utc::now(),
            script,
            db_url,
            vocabulary_digest,
            rules_version: None,
            dry_run: true,
            force,
            summary: Summary::default(),
            items: Vec::new(),
        }
    }

    pub fn push(&mut self, item: ReportItem) {
        self.summary.tally(item.outcome);
        for warning in &item.warnings {
            *self.summary.warnings.entry(warning.code).or_default() += 1;
        }
        self.items.push(item);
    }

    pub fn item(&self, variant_id: &str) -> Option<&ReportItem> {
        self.items.iter().find(|i| i.variant_id == variant_id)
    }

    /// Conventional file name: `<script>-<timestamp>.json`.
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}.json",
            self.script,
            self.generated_at.format("%Y%m%dT%H%M%SZ")
        )
    }

    pub fn to_json(&self) -> Result<String, JobError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), JobError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| JobError::io(dir, e))?;
        }
        std::fs::write(path, self.to_json()? + "\n").map_err(|e| JobError::io(path, e))
    }

    pub fn load(path: &Path) -> Result<Self, JobError> {
        let text = std::fs::read_to_string(path).map_err(|e| JobError::io(path, e))?;
        Ok(serde_json::from_str(&text)?)
    }
}

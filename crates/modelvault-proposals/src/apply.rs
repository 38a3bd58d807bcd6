//! Apply engine.
//!
//! Writes a report's proposals into the store, one transaction per chunk of
//! `batch_size` items. Every field write is a compare-and-set against the value
//! the proposal was computed from: a field that moved in the meantime is an
//! [`ApplyConflict`], skipped and reported while the batch continues.

use crate::report::{Proposal, Report, ReportItem, Summary};
use crate::status::StatusWriter;
use chrono::{DateTime, Utc};
use modelvault_engine::normalize::NormalizePlan;
use modelvault_engine::{
    Classification, FieldValue, FieldWrite, Provenance, Variant, VariantId, WriteMode,
};
use modelvault_storage::{ProposalRecord, Store, StoreError, Tx};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    /// The field no longer holds the value the proposal was computed against.
    ValueChanged,
    /// A curator override pins the field.
    Overridden,
    /// The variant is not in the store.
    MissingVariant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyConflict {
    pub variant_id: VariantId,
    /// Stored field the write targeted.
    pub target: String,
    pub reason: ConflictReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposed: Option<FieldValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOptions {
    pub force: bool,
    /// Also record secondary-tier match proposals as secondary links.
    pub apply_secondary: bool,
    pub batch_size: usize,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            force: false,
            apply_secondary: false,
            batch_size: 500,
        }
    }
}

impl ApplyOptions {
    pub fn mode(&self) -> WriteMode {
        WriteMode { force: self.force }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyTotals {
    pub rows_updated: usize,
    pub conflicts: usize,
    pub fields_kept: usize,
    pub errored: usize,
    pub chunks: usize,
}

/// Per-item write bookkeeping.
#[derive(Default)]
struct ItemWrites {
    conflicts: Vec<ApplyConflict>,
    fields_kept: usize,
}

impl ItemWrites {
    fn field(
        &mut self,
        variant_id: &str,
        target: &str,
        expected: Option<FieldValue>,
        proposed: Option<FieldValue>,
        write: FieldWrite,
    ) {
        let (reason, current) = match write {
            FieldWrite::Written | FieldWrite::Unchanged => return,
            FieldWrite::SkippedOccupied => {
                self.fields_kept += 1;
                return;
            }
            FieldWrite::SkippedOverride => (ConflictReason::Overridden, None),
            FieldWrite::Conflict { current } => (ConflictReason::ValueChanged, current),
        };
        self.conflicts.push(ApplyConflict {
            variant_id: variant_id.to_string(),
            target: target.to_string(),
            reason,
            expected,
            current,
            proposed,
        });
    }
}

struct ApplyScope<'a> {
    digest: Option<&'a str>,
    rules_version: Option<u32>,
    generated_at: DateTime<Utc>,
    options: &'a ApplyOptions,
}

fn apply_proposal(tx: &mut Tx<'_>, item: &ReportItem, scope: &ApplyScope<'_>) -> Result<ItemWrites, StoreError> {
    let mut out = ItemWrites::default();
    let id = item.variant_id.as_str();
    let mode = scope.options.mode();

    let needs_variant = !matches!(item.proposal, Proposal::Ingest { .. } | Proposal::None);
    if needs_variant && tx.variant(id).is_err() {
        out.conflicts.push(ApplyConflict {
            variant_id: id.to_string(),
            target: "variant".to_string(),
            reason: ConflictReason::MissingVariant,
            expected: None,
            current: None,
            proposed: None,
        });
        return Ok(out);
    }

    match &item.proposal {
        Proposal::None => {}
        Proposal::Ingest { row, .. } => {
            tx.ingest(Variant::from_scan(row.clone())?);
        }
        Proposal::Normalize {
            plan,
            changes,
            raw_tokens,
            residual_tokens,
        } => match plan {
            NormalizePlan::UpToDate => {}
            NormalizePlan::Restamp => {
                if let Some(digest) = scope.digest {
                    tx.restamp(id, digest)?;
                }
            }
            NormalizePlan::Normalize => {
                for change in changes {
                    let write = tx.compare_and_set(
                        id,
                        change.field,
                        change.prior.as_ref(),
                        change.value.clone(),
                        mode,
                    )?;
                    out.field(
                        id,
                        change.field.as_str(),
                        change.prior.clone(),
                        change.value.clone(),
                        write,
                    );
                }
                if let (Some(digest), Some(rules_version)) = (scope.digest, scope.rules_version) {
                    tx.record_provenance(
                        id,
                        &Provenance {
                            token_version: digest.to_string(),
                            rules_version,
                            raw_tokens: raw_tokens.clone(),
                            residual_tokens: residual_tokens.clone(),
                            warnings: item.warnings.clone(),
                            rules_fired: item.rules_fired.clone(),
                            confidence: item.confidence,
                        },
                    )?;
                }
            }
        },
        Proposal::Kit { writes, .. } => {
            for write in writes {
                let result = tx.apply_kit_write(write, mode)?;
                out.field(id, write.target(), None, write.proposed(), result);
            }
        }
        Proposal::Match { matches } => {
            tx.put_proposals(ProposalRecord {
                generated_at: scope.generated_at,
                vocabulary_digest: scope.digest.unwrap_or_default().to_string(),
                matches: matches.clone(),
            })?;
            for kind in &matches.kinds {
                if let Some(primary) = kind.primary() {
                    let field = kind.kind.link_field();
                    let expected = primary.prior.clone().map(FieldValue::Text);
                    let proposed = Some(FieldValue::text(primary.target.as_str()));
                    let write = tx.compare_and_set(id, field, expected.as_ref(), proposed.clone(), mode)?;
                    out.field(id, field.as_str(), expected, proposed, write);
                }
                if scope.options.apply_secondary {
                    for secondary in kind.secondary() {
                        tx.add_secondary_link(id, kind.kind, &secondary.target)?;
                    }
                }
            }
        }
    }
    Ok(out)
}

/// Apply one item. A corrupt item is marked errored and never aborts the chunk.
fn apply_item(
    tx: &mut Tx<'_>,
    item: &mut ReportItem,
    scope: &ApplyScope<'_>,
    totals: &mut ApplyTotals,
    reclassified: &mut Vec<(Classification, Classification)>,
) -> Result<(), StoreError> {
    match apply_proposal(tx, item, scope) {
        Ok(writes) => {
            totals.conflicts += writes.conflicts.len();
            totals.fields_kept += writes.fields_kept;
            for conflict in &writes.conflicts {
                warn!(
                    variant_id = %conflict.variant_id,
                    target = %conflict.target,
                    reason = ?conflict.reason,
                    "apply conflict"
                );
            }
            item.apply_conflicts = writes.conflicts;
            Ok(())
        }
        Err(StoreError::Engine(e)) => {
            warn!(variant_id = %item.variant_id, error = %e, "skipping corrupt item");
            reclassified.push((item.outcome, Classification::Errored));
            item.outcome = Classification::Errored;
            item.error = Some(e.to_string());
            totals.errored += 1;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Apply every item of `report` to `store`.
///
/// Updates the report in place: per-item conflicts and errors, the summary's
/// apply counters, and `dry_run = false`. Only store failures are returned as
/// errors; chunks committed before such a failure stay committed.
pub fn apply_report(
    store: &Store,
    report: &mut Report,
    options: &ApplyOptions,
    status: Option<&StatusWriter>,
) -> Result<ApplyTotals, StoreError> {
    let Report {
        items,
        summary,
        vocabulary_digest,
        rules_version,
        generated_at,
        ..
    } = &mut *report;
    let scope = ApplyScope {
        digest: vocabulary_digest.as_deref(),
        rules_version: *rules_version,
        generated_at: *generated_at,
        options,
    };

    let mut totals = ApplyTotals::default();
    let mut done = 0;
    for chunk in items.chunks_mut(options.batch_size.max(1)) {
        let len = chunk.len();
        let mut reclassified = Vec::new();
        let result = store.transaction(|tx| {
            let mut chunk_totals = ApplyTotals::default();
            for item in chunk.iter_mut() {
                apply_item(tx, item, &scope, &mut chunk_totals, &mut reclassified)?;
            }
            chunk_totals.rows_updated = tx.rows_changed();
            Ok::<_, StoreError>(chunk_totals)
        });
        let chunk_totals = match result {
            Ok(t) => t,
            Err(e) => {
                if let Some(status) = status {
                    status.failed(done, &e.to_string());
                }
                return Err(e);
            }
        };

        for (from, to) in reclassified {
            summary.reclassify(from, to);
        }
        totals.rows_updated += chunk_totals.rows_updated;
        totals.conflicts += chunk_totals.conflicts;
        totals.fields_kept += chunk_totals.fields_kept;
        totals.errored += chunk_totals.errored;
        totals.chunks += 1;
        done += len;
        info!(
            chunk = totals.chunks,
            items = len,
            rows = chunk_totals.rows_updated,
            "applied chunk"
        );
        if let Some(status) = status {
            status.running(done);
        }
    }

    record_totals(summary, &totals);
    report.dry_run = false;
    Ok(totals)
}

fn record_totals(summary: &mut Summary, totals: &ApplyTotals) {
    summary.rows_updated += totals.rows_updated;
    summary.apply_conflicts += totals.conflicts;
    summary.fields_kept += totals.fields_kept;
}

//! Batch jobs: ingest, normalize, kits, match.
//!
//! Each job plans over an in-memory working set of variants (scoring is
//! read-only and runs in parallel), records one report item per variant, and
//! only when `apply` is set hands the report to the apply engine. A dry run
//! opens no write transaction. The working set is updated as if the plan had
//! been applied, so a pipeline run feeds normalized fields into kits and
//! matching even when nothing is written.

use crate::apply::{apply_report, ApplyOptions};
use crate::report::{JobKind, Report, ReportItem};
use crate::status::StatusWriter;
use crate::JobError;
use modelvault_engine::normalize::{
    apply_outcome, field_changes, normalize, plan_normalization, restamp, NormalizeOutcome,
    NormalizePlan,
};
use modelvault_engine::{
    apply_kit_write, backfill_kits, parse_inventory, EngineConfig, Matcher, ScanRow, Variant,
    WriteMode,
};
use modelvault_storage::{IngestWrite, Store, StoreError};
use modelvault_vocab::{VocabularyDiff, VocabularyIndex, VocabularySnapshot};
use rayon::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone)]
pub struct JobOptions {
    pub apply: bool,
    pub force: bool,
    pub batch_size: usize,
    pub apply_secondary: bool,
    pub status_path: Option<PathBuf>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            apply: false,
            force: false,
            batch_size: 500,
            apply_secondary: false,
            status_path: None,
        }
    }
}

impl JobOptions {
    pub fn mode(&self) -> WriteMode {
        WriteMode { force: self.force }
    }

    pub fn apply_options(&self) -> ApplyOptions {
        ApplyOptions {
            force: self.force,
            apply_secondary: self.apply_secondary,
            batch_size: self.batch_size,
        }
    }

    fn status(&self, job: JobKind, total: usize) -> Option<StatusWriter> {
        self.status_path
            .as_deref()
            .map(|p| StatusWriter::new(p, job.as_str(), total))
    }
}

/// Everything a vocabulary-backed job reads.
pub struct JobContext<'a> {
    pub store: &'a Store,
    pub vocabulary: &'a VocabularySnapshot,
    pub index: &'a VocabularyIndex,
    pub config: &'a EngineConfig,
    pub options: &'a JobOptions,
}

/// Apply `report` when requested, then mark the job finished.
fn finish(
    store: &Store,
    mut report: Report,
    options: &JobOptions,
    status: Option<StatusWriter>,
) -> Result<Report, JobError> {
    let total = report.items.len();
    if options.apply {
        let totals = apply_report(store, &mut report, &options.apply_options(), status.as_ref())?;
        info!(
            script = %report.script,
            rows_updated = totals.rows_updated,
            conflicts = totals.conflicts,
            "applied report"
        );
    }
    if let Some(status) = &status {
        status.completed(total);
    }
    info!(
        script = %report.script,
        processed = report.summary.processed,
        matched = report.summary.matched,
        conflicted = report.summary.conflicted,
        skipped = report.summary.skipped,
        errored = report.summary.errored,
        dry_run = report.dry_run,
        "job finished"
    );
    Ok(report)
}

/// Ingest inventory rows. Rejected rows become errored items.
pub fn ingest(store: &Store, inventory: &str, options: &JobOptions) -> Result<Report, JobError> {
    let (variants, rejected) = parse_inventory(inventory)?;
    let mut report = Report::new(JobKind::Ingest, store.db_url(), None, options.force);
    let status = options.status(JobKind::Ingest, variants.len() + rejected.len());

    for variant in variants {
        let write = match store.variant(&variant.id) {
            None => IngestWrite::Inserted,
            Some(stored)
                if stored.path == variant.path
                    && stored.kind == variant.kind
                    && stored.size == variant.size
                    && stored.mtime == variant.mtime
                    && stored.model_file_count == variant.model_file_count =>
            {
                IngestWrite::Unchanged
            }
            Some(_) => IngestWrite::Updated,
        };
        let row = ScanRow {
            id: variant.id,
            path: variant.path,
            kind: Some(variant.kind),
            size: variant.size,
            mtime: variant.mtime,
            model_file_count: Some(variant.model_file_count),
        };
        report.push(ReportItem::ingest(row, write));
    }
    for row in rejected {
        let id = row
            .variant_id
            .clone()
            .unwrap_or_else(|| format!("#row{}", row.row));
        report.push(ReportItem::errored(id, row.message));
    }
    finish(store, report, options, status)
}

/// Diff of the store's vocabulary against the one in use, if it has one.
pub fn vocabulary_diff(ctx: &JobContext<'_>) -> Option<VocabularyDiff> {
    ctx.store
        .vocabulary()
        .map(|old| VocabularyDiff::between(&old, ctx.vocabulary, &ctx.config.tokenizer))
}

/// Normalize the working set.
pub fn normalize_job(ctx: &JobContext<'_>, working: &mut [Variant]) -> Result<Report, JobError> {
    let digest = ctx.index.digest().to_string();
    let rules_version = ctx.config.normalizer.rules_version;
    let diff = vocabulary_diff(ctx);
    let force = ctx.options.force;
    let mode = ctx.options.mode();
    let status = ctx.options.status(JobKind::Normalize, working.len());
    if let Some(status) = &status {
        status.running(0);
    }

    let planned: Vec<(NormalizePlan, Option<NormalizeOutcome>)> = working
        .par_iter()
        .map(|variant| {
            let plan = plan_normalization(variant, ctx.index, rules_version, diff.as_ref(), force);
            let outcome = (plan == NormalizePlan::Normalize)
                .then(|| normalize(variant, ctx.index, ctx.config));
            (plan, outcome)
        })
        .collect();

    let mut report = Report::new(JobKind::Normalize, ctx.store.db_url(), Some(digest.clone()), force);
    report.rules_version = Some(rules_version);
    for (variant, (plan, outcome)) in working.iter_mut().zip(planned) {
        let item = match (plan, outcome) {
            (NormalizePlan::Normalize, Some(outcome)) => {
                let changes = field_changes(variant, &outcome, mode);
                let item = ReportItem::normalized(variant.id.clone(), changes, &outcome);
                match apply_outcome(variant, &outcome, mode) {
                    Ok(_) => item,
                    Err(e) => ReportItem::errored(variant.id.clone(), e.to_string()),
                }
            }
            (NormalizePlan::Restamp, _) => {
                restamp(variant, &digest);
                report.summary.restamped += 1;
                ReportItem::unchanged(variant, NormalizePlan::Restamp)
            }
            (plan, _) => {
                report.summary.up_to_date += 1;
                ReportItem::unchanged(variant, plan)
            }
        };
        report.push(item);
    }

    let report = finish(ctx.store, report, ctx.options, status)?;
    if ctx.options.apply {
        ctx.store
            .transaction(|tx| Ok::<_, StoreError>(tx.set_vocabulary(ctx.vocabulary)))?;
    }
    Ok(report)
}

/// Backfill kit structure over the working set.
pub fn kits_job(
    store: &Store,
    config: &EngineConfig,
    options: &JobOptions,
    working: &mut [Variant],
) -> Result<Report, JobError> {
    let plan = backfill_kits(working, &config.kits, &config.tokenizer, options.force);
    let status = options.status(JobKind::Kits, working.len());

    let mut writes: HashMap<&str, Vec<_>> = HashMap::new();
    for write in &plan.writes {
        writes.entry(write.variant_id()).or_default().push(write.clone());
    }
    let ambiguous: HashMap<&str, _> = plan
        .ambiguous
        .iter()
        .map(|a| (a.child_id.as_str(), a.clone()))
        .collect();
    let involved: BTreeSet<&str> = plan
        .parents_marked
        .iter()
        .chain(&plan.children_linked)
        .map(|id| id.as_str())
        .collect();
    let stale: BTreeSet<&str> = plan.stale_links.iter().map(|id| id.as_str()).collect();
    let part_pack: BTreeSet<&str> = plan.part_pack_conflicts.iter().map(|id| id.as_str()).collect();

    let mut report = Report::new(JobKind::Kits, store.db_url(), None, options.force);
    for variant in working.iter_mut() {
        let variant_writes = writes.remove(variant.id.as_str()).unwrap_or_default();
        let mut error = None;
        for write in &variant_writes {
            if let Err(e) = apply_kit_write(variant, write, options.mode()) {
                error = Some(e.to_string());
            }
        }
        let id = variant.id.as_str();
        let item = match error {
            Some(message) => ReportItem::errored(variant.id.clone(), message),
            None => ReportItem::kit(
                variant.id.clone(),
                variant_writes,
                involved.contains(id),
                ambiguous.get(id).cloned(),
                stale.contains(id),
                part_pack.contains(id),
            ),
        };
        report.push(item);
    }
    finish(store, report, options, status)
}

/// Score the working set against the vocabulary.
pub fn match_job(ctx: &JobContext<'_>, working: &[Variant]) -> Result<Report, JobError> {
    let matcher = Matcher::new(ctx.index, &ctx.config.matcher, &ctx.config.tokenizer);
    let status = ctx.options.status(JobKind::Match, working.len());
    let mut report = Report::new(
        JobKind::Match,
        ctx.store.db_url(),
        Some(ctx.index.digest().to_string()),
        ctx.options.force,
    );
    for matches in matcher.match_all(working) {
        report.push(ReportItem::matched(matches));
    }
    finish(ctx.store, report, ctx.options, status)
}

/// Normalize, then backfill kits, then match, each stage seeing the previous
/// stage's results.
pub fn run_pipeline(ctx: &JobContext<'_>) -> Result<Vec<Report>, JobError> {
    let mut working = ctx.store.variants();
    let normalized = normalize_job(ctx, &mut working)?;
    let kits = kits_job(ctx.store, ctx.config, ctx.options, &mut working)?;
    let matched = match_job(ctx, &working)?;
    Ok(vec![normalized, kits, matched])
}

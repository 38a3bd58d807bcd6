//! Report output and terminal summaries.

use anyhow::{Context, Result};
use colored::Colorize;
use modelvault_proposals::Report;
use std::path::{Path, PathBuf};

/// Print the summary to stderr and write the report under `out_dir`, or to
/// stdout when `to_stdout` is set.
pub fn emit(report: &Report, out_dir: &Path, to_stdout: bool) -> Result<Option<PathBuf>> {
    summarize(report);
    if to_stdout {
        println!("{}", report.to_json()?);
        return Ok(None);
    }
    let path = out_dir.join(report.file_name());
    save(report, &path)?;
    Ok(Some(path))
}

pub fn save(report: &Report, path: &Path) -> Result<()> {
    report
        .save(path)
        .with_context(|| format!("writing report {}", path.display()))?;
    eprintln!("{} {}", "wrote".green().bold(), path.display());
    Ok(())
}

pub fn summarize(report: &Report) {
    let s = &report.summary;
    let mode = if report.dry_run {
        "dry run".yellow()
    } else {
        "applied".green()
    };
    eprintln!(
        "{} {} ({})",
        report.script.as_str().cyan().bold(),
        mode,
        report.db_url
    );
    eprintln!(
        "  processed {}  matched {}  conflicted {}  skipped {}  errored {}",
        s.processed,
        s.matched.to_string().green(),
        s.conflicted.to_string().yellow(),
        s.skipped,
        if s.errored > 0 {
            s.errored.to_string().red()
        } else {
            s.errored.to_string().normal()
        },
    );
    if s.restamped + s.up_to_date > 0 {
        eprintln!("  restamped {}  up to date {}", s.restamped, s.up_to_date);
    }
    if !report.dry_run {
        eprintln!(
            "  rows updated {}  apply conflicts {}  fields kept {}",
            s.rows_updated, s.apply_conflicts, s.fields_kept
        );
    }
    for (code, count) in &s.warnings {
        eprintln!("  {} {} x{}", "warning".yellow(), code, count);
    }
}

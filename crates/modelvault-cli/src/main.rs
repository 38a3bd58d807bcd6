//! Modelvault CLI
//!
//! Batch entrypoints over one store file:
//! - `ingest` scanned inventory rows
//! - `normalize`, `kits`, `match` (or `run` for all three) producing timestamped reports
//! - `apply` a saved dry-run report
//! - `show`, `override` and `vocab check` for curators
//!
//! Every job is a dry run unless `--apply` is given. Reports are JSON files;
//! logs go to stderr.

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use modelvault_engine::{EngineConfig, Field};
use modelvault_proposals::{
    apply_report, ApplyOptions, JobContext, JobOptions, JobStatus, Report, StatusWriter,
};
use modelvault_storage::Store;
use modelvault_vocab::{Domain, VocabularyDiff, VocabularyError, VocabularyIndex, VocabularySnapshot};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod output;

#[derive(Parser)]
#[command(name = "modelvault")]
#[command(author, version, about = "Deterministic taxonomy normalization for 3D-model libraries")]
struct Cli {
    /// Store file
    #[arg(long, global = true, default_value = "modelvault-store.json")]
    db: PathBuf,

    /// Engine configuration (JSON). Compiled-in defaults when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Raise log verbosity (-v debug, -vv trace). `RUST_LOG` wins when unset.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest scanned inventory rows (JSON array) into the store.
    Ingest {
        /// Inventory JSON file
        inventory: PathBuf,
        #[command(flatten)]
        job: JobArgs,
    },

    /// Normalize variant fields against a vocabulary.
    Normalize {
        #[command(flatten)]
        vocab: VocabArgs,
        #[command(flatten)]
        job: JobArgs,
    },

    /// Detect kit containers and link their part folders.
    Kits {
        #[command(flatten)]
        job: JobArgs,
        #[command(flatten)]
        kits: KitArgs,
    },

    /// Propose unit/part/franchise/character links.
    Match {
        #[command(flatten)]
        vocab: VocabArgs,
        #[command(flatten)]
        job: JobArgs,
        #[command(flatten)]
        matcher: MatchArgs,
    },

    /// Normalize, backfill kits, then match.
    Run {
        #[command(flatten)]
        vocab: VocabArgs,
        #[command(flatten)]
        job: JobArgs,
        #[command(flatten)]
        kits: KitArgs,
        #[command(flatten)]
        matcher: MatchArgs,
    },

    /// Apply a saved dry-run report.
    Apply {
        /// Report produced by an earlier dry run
        #[arg(long)]
        report: PathBuf,
        /// Overwrite set and overridden fields
        #[arg(long)]
        force: bool,
        /// Variants per transaction
        #[arg(long)]
        batch: Option<usize>,
        /// Also record secondary match proposals as links
        #[arg(long)]
        apply_secondary: bool,
        /// Directory for the applied report
        #[arg(long, default_value = "reports")]
        out_dir: PathBuf,
        /// Status record rewritten after every chunk
        #[arg(long)]
        status: Option<PathBuf>,
    },

    /// Print a variant's stored fields, provenance and proposals.
    Show {
        variant_id: String,
    },

    /// Pin a field to a curated value (or release it with --clear).
    Override {
        variant_id: String,
        /// Field name, e.g. `designer` or `unit_link`
        field: String,
        /// New value; omit with --clear
        value: Option<String>,
        #[arg(long, conflicts_with = "value")]
        clear: bool,
    },

    /// Vocabulary commands.
    Vocab {
        #[command(subcommand)]
        command: VocabCommands,
    },

    /// Print a job status record.
    Status {
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum VocabCommands {
    /// Validate a vocabulary snapshot and show its digest and diff against the store.
    Check {
        vocab: PathBuf,
    },
}

#[derive(Args)]
struct VocabArgs {
    /// Vocabulary snapshot (JSON)
    #[arg(long)]
    vocab: PathBuf,
}

#[derive(Args)]
struct JobArgs {
    /// Write to the store (default is a dry run)
    #[arg(long)]
    apply: bool,
    /// Overwrite set and overridden fields
    #[arg(long)]
    force: bool,
    /// Variants per transaction
    #[arg(long)]
    batch: Option<usize>,
    /// Also record secondary match proposals as links
    #[arg(long)]
    apply_secondary: bool,
    /// Directory for report files
    #[arg(long, default_value = "reports")]
    out_dir: PathBuf,
    /// Print reports to stdout instead of writing files
    #[arg(long)]
    stdout: bool,
    /// Status record rewritten after every chunk
    #[arg(long)]
    status: Option<PathBuf>,
}

#[derive(Args)]
struct KitArgs {
    /// Link unrecognized sibling folders of a kit as `other` parts
    #[arg(long)]
    group_children: bool,
}

#[derive(Args)]
struct MatchArgs {
    #[arg(long)]
    min_score: Option<f64>,
    #[arg(long)]
    delta: Option<f64>,
    /// Restrict candidates to these game systems
    #[arg(long, value_delimiter = ',')]
    systems: Vec<String>,
    /// Score kit children after their parents, inheriting part of the parent score
    #[arg(long)]
    include_kit_children: bool,
}

impl JobArgs {
    fn options(&self, config: &EngineConfig) -> JobOptions {
        JobOptions {
            apply: self.apply,
            force: self.force,
            batch_size: self.batch.unwrap_or(config.batch_size),
            apply_secondary: self.apply_secondary,
            status_path: self.status.clone(),
        }
    }
}

impl KitArgs {
    fn configure(&self, config: &mut EngineConfig) {
        if self.group_children {
            config.kits.group_children = true;
        }
    }
}

impl MatchArgs {
    fn configure(&self, config: &mut EngineConfig) {
        if let Some(min_score) = self.min_score {
            config.matcher.min_score = min_score;
        }
        if let Some(delta) = self.delta {
            config.matcher.delta = delta;
        }
        if !self.systems.is_empty() {
            config.matcher.systems = self.systems.clone();
        }
        if self.include_kit_children {
            config.matcher.include_kit_children = true;
        }
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(p) => EngineConfig::load(p).with_context(|| format!("loading config {}", p.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn open_store(path: &Path) -> Result<Store> {
    Store::open_or_create(path).with_context(|| format!("opening store {}", path.display()))
}

/// Load and index a vocabulary. Alias collisions are fatal and listed in full.
fn load_vocabulary(path: &Path, config: &EngineConfig) -> Result<(VocabularySnapshot, VocabularyIndex)> {
    let snapshot = VocabularySnapshot::load(path)
        .with_context(|| format!("loading vocabulary {}", path.display()))?;
    match VocabularyIndex::build(&snapshot, &config.tokenizer) {
        Ok(index) => Ok((snapshot, index)),
        Err(VocabularyError::Validation(collisions)) => {
            for collision in &collisions {
                eprintln!("  {} {}", "collision".red().bold(), collision);
            }
            Err(anyhow!(
                "vocabulary {} has {} ambiguous aliases",
                path.display(),
                collisions.len()
            ))
        }
        Err(e) => Err(e).with_context(|| format!("indexing vocabulary {}", path.display())),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Ingest { inventory, job } => {
            let store = open_store(&cli.db)?;
            let text = std::fs::read_to_string(&inventory)
                .with_context(|| format!("reading inventory {}", inventory.display()))?;
            let report = modelvault_proposals::ingest(&store, &text, &job.options(&config))?;
            output::emit(&report, &job.out_dir, job.stdout)?;
        }

        Commands::Normalize { vocab, job } => {
            let store = open_store(&cli.db)?;
            let (snapshot, index) = load_vocabulary(&vocab.vocab, &config)?;
            let options = job.options(&config);
            let ctx = JobContext {
                store: &store,
                vocabulary: &snapshot,
                index: &index,
                config: &config,
                options: &options,
            };
            let mut working = store.variants();
            let report = modelvault_proposals::normalize_job(&ctx, &mut working)?;
            output::emit(&report, &job.out_dir, job.stdout)?;
        }

        Commands::Kits { job, kits } => {
            kits.configure(&mut config);
            let store = open_store(&cli.db)?;
            let mut working = store.variants();
            let report =
                modelvault_proposals::kits_job(&store, &config, &job.options(&config), &mut working)?;
            output::emit(&report, &job.out_dir, job.stdout)?;
        }

        Commands::Match { vocab, job, matcher } => {
            matcher.configure(&mut config);
            let store = open_store(&cli.db)?;
            let (snapshot, index) = load_vocabulary(&vocab.vocab, &config)?;
            let options = job.options(&config);
            let ctx = JobContext {
                store: &store,
                vocabulary: &snapshot,
                index: &index,
                config: &config,
                options: &options,
            };
            let report = modelvault_proposals::match_job(&ctx, &store.variants())?;
            output::emit(&report, &job.out_dir, job.stdout)?;
        }

        Commands::Run {
            vocab,
            job,
            kits,
            matcher,
        } => {
            kits.configure(&mut config);
            matcher.configure(&mut config);
            let store = open_store(&cli.db)?;
            let (snapshot, index) = load_vocabulary(&vocab.vocab, &config)?;
            let options = job.options(&config);
            let ctx = JobContext {
                store: &store,
                vocabulary: &snapshot,
                index: &index,
                config: &config,
                options: &options,
            };
            for report in modelvault_proposals::run_pipeline(&ctx)? {
                output::emit(&report, &job.out_dir, job.stdout)?;
            }
        }

        Commands::Apply {
            report,
            force,
            batch,
            apply_secondary,
            out_dir,
            status,
        } => {
            let store = open_store(&cli.db)?;
            let mut saved = Report::load(&report)?;
            if saved.db_url != store.db_url() {
                tracing::warn!(
                    report_db = %saved.db_url,
                    store_db = %store.db_url(),
                    "report was generated against another store"
                );
            }
            let options = ApplyOptions {
                force: force || saved.force,
                apply_secondary,
                batch_size: batch.unwrap_or(config.batch_size),
            };
            let writer = status
                .as_deref()
                .map(|p| StatusWriter::new(p, saved.script.as_str(), saved.items.len()));
            apply_report(&store, &mut saved, &options, writer.as_ref())?;
            if let Some(writer) = &writer {
                writer.completed(saved.items.len());
            }
            output::summarize(&saved);
            let stem = saved.file_name().trim_end_matches(".json").to_string();
            output::save(&saved, &out_dir.join(format!("{stem}-applied.json")))?;
        }

        Commands::Show { variant_id } => {
            let store = Store::open(&cli.db)
                .with_context(|| format!("opening store {}", cli.db.display()))?;
            let variant = store
                .variant(&variant_id)
                .ok_or_else(|| anyhow!("unknown variant `{variant_id}`"))?;
            let view = serde_json::json!({
                "variant": variant,
                "proposals": store.proposals(&variant_id),
            });
            println!("{}", serde_json::to_string_pretty(&view)?);
        }

        Commands::Override {
            variant_id,
            field,
            value,
            clear,
        } => {
            let field = Field::parse(&field).ok_or_else(|| {
                let known: Vec<&str> = Field::ALL.iter().map(|f| f.as_str()).collect();
                anyhow!("unknown field `{field}` (expected one of: {})", known.join(", "))
            })?;
            let store = Store::open(&cli.db)
                .with_context(|| format!("opening store {}", cli.db.display()))?;
            if clear {
                let cleared = store.transaction(|tx| tx.clear_override(&variant_id, field))?;
                let verb = if cleared { "cleared" } else { "not overridden" };
                eprintln!("{} {} {}", verb.green().bold(), variant_id, field);
            } else {
                let raw = value.ok_or_else(|| anyhow!("a value is required unless --clear is given"))?;
                let parsed = field.parse_value(&raw)?;
                store.transaction(|tx| tx.set_override(&variant_id, field, Some(parsed)))?;
                eprintln!("{} {} {} = {}", "pinned".green().bold(), variant_id, field, raw);
            }
        }

        Commands::Vocab {
            command: VocabCommands::Check { vocab },
        } => {
            let (snapshot, index) = load_vocabulary(&vocab, &config)?;
            eprintln!("{} {}", "ok".green().bold(), vocab.display());
            println!("digest: {}", index.digest().cyan());
            for domain in Domain::ALL {
                let count = index.entries_in(domain).count();
                if count > 0 {
                    println!("  {domain}: {count}");
                }
            }
            if cli.db.exists() {
                let store = Store::open(&cli.db)?;
                match store.vocabulary() {
                    Some(old) => {
                        let diff = VocabularyDiff::between(&old, &snapshot, &config.tokenizer);
                        let touched = store
                            .variants()
                            .iter()
                            .filter(|v| diff.touches(&v.raw_tokens))
                            .count();
                        println!(
                            "store digest: {}\nchanged alias tokens: {}\nvariants to re-normalize: {}",
                            diff.from_digest,
                            diff.changed_tokens.len(),
                            touched
                        );
                    }
                    None => println!("store has no vocabulary yet"),
                }
            }
        }

        Commands::Status { path } => {
            let status = JobStatus::load(&path)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }
    Ok(())
}

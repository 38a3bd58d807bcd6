//! Modelvault store.
//!
//! ```text
//! ┌──────────────┐  transaction(|tx| ..)   ┌──────────────┐  commit   ┌────────────┐
//! │  job chunk   │ ──────────────────────► │ staged copy  │ ────────► │ store.json │
//! └──────────────┘                         │  (Tx writes) │  temp +   └────────────┘
//!                                          └──────────────┘  rename
//!                                                 │ Err
//!                                                 ▼
//!                                             discarded
//! ```
//!
//! One JSON file holds every variant (normalized fields, overrides, kit links,
//! provenance), the ephemeral match proposals and the vocabulary snapshot that
//! last stamped the store. Field writes go through the engine's per-field
//! check-and-set, so "write only when empty unless forced" holds for every
//! caller.

mod persistence;

#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use modelvault_engine::normalize::{apply_outcome, restamp, AppliedNormalization, NormalizeOutcome};
use modelvault_engine::{
    apply_kit_write, EngineError, EntityKind, Field, FieldValue, FieldWrite, KitWrite,
    PartPackType, Provenance, Variant, VariantId, VariantMatch, WriteMode,
};
use modelvault_vocab::VocabularySnapshot;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const STORE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("unknown variant `{0}`")]
    UnknownVariant(VariantId),
    #[error("unsupported store format version {found} (expected {expected})")]
    Format { found: u32, expected: u32 },
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Stored match proposals for one variant. Replaced on every match run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalRecord {
    pub generated_at: DateTime<Utc>,
    pub vocabulary_digest: String,
    pub matches: VariantMatch,
}

/// On-disk layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreData {
    pub format_version: u32,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub variants: BTreeMap<VariantId, Variant>,
    #[serde(default)]
    pub proposals: BTreeMap<VariantId, ProposalRecord>,
    /// Snapshot of the vocabulary that last stamped the store.
    #[serde(default)]
    pub vocabulary: Option<VocabularySnapshot>,
}

impl Default for StoreData {
    fn default() -> Self {
        Self {
            format_version: STORE_FORMAT_VERSION,
            updated_at: None,
            variants: BTreeMap::new(),
            proposals: BTreeMap::new(),
            vocabulary: None,
        }
    }
}

/// Result of ingesting one scanned variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestWrite {
    Inserted,
    /// Scan metadata changed; normalized state was kept.
    Updated,
    Unchanged,
}

pub struct Store {
    path: PathBuf,
    data: RwLock<StoreData>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let data = persistence::read_store(path)?;
        debug!(path = %path.display(), variants = data.variants.len(), "opened store");
        Ok(Self {
            path: path.to_path_buf(),
            data: RwLock::new(data),
        })
    }

    /// Open `path`, creating an empty store when it does not exist yet.
    pub fn open_or_create(path: &Path) -> Result<Self, StoreError> {
        if path.exists() {
            return Self::open(path);
        }
        let data = StoreData::default();
        persistence::write_store(path, &data)?;
        info!(path = %path.display(), "created store");
        Ok(Self {
            path: path.to_path_buf(),
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Location reported in job reports.
    pub fn db_url(&self) -> String {
        format!("file://{}", self.path.display())
    }

    pub fn len(&self) -> usize {
        self.data.read().variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn variant(&self, id: &str) -> Option<Variant> {
        self.data.read().variants.get(id).cloned()
    }

    /// Every variant, ordered by id.
    pub fn variants(&self) -> Vec<Variant> {
        self.data.read().variants.values().cloned().collect()
    }

    pub fn variant_ids(&self) -> Vec<VariantId> {
        self.data.read().variants.keys().cloned().collect()
    }

    pub fn proposals(&self, id: &str) -> Option<ProposalRecord> {
        self.data.read().proposals.get(id).cloned()
    }

    pub fn vocabulary(&self) -> Option<VocabularySnapshot> {
        self.data.read().vocabulary.clone()
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.data.read().updated_at
    }

    /// Run `f` against a staged copy of the store.
    ///
    /// `Ok` commits the staged copy atomically (nothing is written when `f`
    /// changed nothing); `Err` discards it. Committed transactions are never
    /// affected by a later failing one.
    pub fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Tx<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut data = self.data.write();
        let mut staged = data.clone();
        let mut tx = Tx {
            data: &mut staged,
            changed: BTreeSet::new(),
            dirty: false,
        };
        let value = match f(&mut tx) {
            Ok(value) => value,
            Err(e) => {
                debug!(path = %self.path.display(), "rolled back store transaction");
                return Err(e);
            }
        };
        let (dirty, rows) = (tx.dirty, tx.changed.len());

        if dirty {
            staged.updated_at = Some(Utc::now());
            persistence::write_store(&self.path, &staged)?;
            *data = staged;
            debug!(path = %self.path.display(), rows, "committed store transaction");
        }
        Ok(value)
    }
}

/// Write access inside [`Store::transaction`].
pub struct Tx<'a> {
    data: &'a mut StoreData,
    changed: BTreeSet<VariantId>,
    dirty: bool,
}

impl Tx<'_> {
    pub fn variant(&self, id: &str) -> Result<&Variant, StoreError> {
        self.data
            .variants
            .get(id)
            .ok_or_else(|| StoreError::UnknownVariant(id.to_string()))
    }

    pub fn variants(&self) -> impl Iterator<Item = &Variant> {
        self.data.variants.values()
    }

    fn slot(&mut self, id: &str) -> Result<&mut Variant, StoreError> {
        self.data
            .variants
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownVariant(id.to_string()))
    }

    fn touch(&mut self, id: &str, changed: bool) {
        if changed {
            self.changed.insert(id.to_string());
            self.dirty = true;
        }
    }

    /// Variants changed so far in this transaction.
    pub fn rows_changed(&self) -> usize {
        self.changed.len()
    }

    /// Insert a scanned variant, or refresh the scan metadata of a known one.
    ///
    /// A moved variant loses its digest stamp so the next run re-normalizes it.
    pub fn ingest(&mut self, variant: Variant) -> IngestWrite {
        let id = variant.id.clone();
        let write = match self.data.variants.get_mut(&id) {
            None => {
                self.data.variants.insert(id.clone(), variant);
                IngestWrite::Inserted
            }
            Some(stored) => {
                let same = stored.path == variant.path
                    && stored.kind == variant.kind
                    && stored.size == variant.size
                    && stored.mtime == variant.mtime
                    && stored.model_file_count == variant.model_file_count;
                if same {
                    IngestWrite::Unchanged
                } else {
                    if stored.path != variant.path {
                        stored.token_version = None;
                    }
                    stored.path = variant.path;
                    stored.kind = variant.kind;
                    stored.size = variant.size;
                    stored.mtime = variant.mtime;
                    stored.model_file_count = variant.model_file_count;
                    IngestWrite::Updated
                }
            }
        };
        self.touch(&id, write != IngestWrite::Unchanged);
        write
    }

    /// Per-field check-and-set.
    pub fn set_field(
        &mut self,
        id: &str,
        field: Field,
        value: Option<FieldValue>,
        mode: WriteMode,
    ) -> Result<FieldWrite, StoreError> {
        let write = self.slot(id)?.check_and_set(field, value, mode)?;
        self.touch(id, write.is_written());
        Ok(write)
    }

    /// Check-and-set that first verifies the field still holds `expected_prior`.
    pub fn compare_and_set(
        &mut self,
        id: &str,
        field: Field,
        expected_prior: Option<&FieldValue>,
        value: Option<FieldValue>,
        mode: WriteMode,
    ) -> Result<FieldWrite, StoreError> {
        let write = self
            .slot(id)?
            .compare_and_set(field, expected_prior, value, mode)?;
        self.touch(id, write.is_written());
        Ok(write)
    }

    pub fn set_override(
        &mut self,
        id: &str,
        field: Field,
        value: Option<FieldValue>,
    ) -> Result<(), StoreError> {
        let variant = self.slot(id)?;
        let changed = variant.field(field) != value || !variant.is_overridden(field);
        variant.set_override(field, value)?;
        self.touch(id, changed);
        Ok(())
    }

    pub fn clear_override(&mut self, id: &str, field: Field) -> Result<bool, StoreError> {
        let cleared = self.slot(id)?.clear_override(field);
        self.touch(id, cleared);
        Ok(cleared)
    }

    pub fn apply_normalization(
        &mut self,
        id: &str,
        outcome: &NormalizeOutcome,
        mode: WriteMode,
    ) -> Result<AppliedNormalization, StoreError> {
        let applied = apply_outcome(self.slot(id)?, outcome, mode)?;
        self.touch(id, applied.row_changed);
        Ok(applied)
    }

    /// Replace a variant's normalization provenance.
    pub fn record_provenance(&mut self, id: &str, provenance: &Provenance) -> Result<bool, StoreError> {
        let changed = self.slot(id)?.record_provenance(provenance);
        self.touch(id, changed);
        Ok(changed)
    }

    pub fn restamp(&mut self, id: &str, digest: &str) -> Result<bool, StoreError> {
        let changed = restamp(self.slot(id)?, digest);
        self.touch(id, changed);
        Ok(changed)
    }

    pub fn apply_kit_write(&mut self, write: &KitWrite, mode: WriteMode) -> Result<FieldWrite, StoreError> {
        let id = write.variant_id().to_string();
        let result = apply_kit_write(self.slot(&id)?, write, mode)?;
        self.touch(&id, result.is_written());
        Ok(result)
    }

    pub fn mark_container(
        &mut self,
        parent_id: &str,
        child_types: Vec<PartPackType>,
    ) -> Result<FieldWrite, StoreError> {
        let write = KitWrite::MarkContainer {
            parent_id: parent_id.to_string(),
            child_types,
        };
        self.apply_kit_write(&write, WriteMode::SAFE)
    }

    /// Link a kit child to its container; a second call with the same link is a no-op.
    pub fn upsert_kit_link(
        &mut self,
        child_id: &str,
        parent_id: &str,
        label: PartPackType,
    ) -> Result<FieldWrite, StoreError> {
        self.variant(parent_id)?;
        let write = KitWrite::LinkChild {
            child_id: child_id.to_string(),
            parent_id: parent_id.to_string(),
            label,
        };
        self.apply_kit_write(&write, WriteMode::SAFE)
    }

    /// Record a non-primary entity link. Returns whether it was new.
    pub fn add_secondary_link(
        &mut self,
        id: &str,
        kind: EntityKind,
        target: &str,
    ) -> Result<bool, StoreError> {
        let added = self
            .slot(id)?
            .links
            .secondary
            .entry(kind)
            .or_default()
            .insert(target.to_string());
        self.touch(id, added);
        Ok(added)
    }

    /// Replace the stored proposals of one variant.
    pub fn put_proposals(&mut self, record: ProposalRecord) -> Result<(), StoreError> {
        let id = record.matches.variant_id.clone();
        self.variant(&id)?;
        let same = self.data.proposals.get(&id).is_some_and(|old| {
            old.vocabulary_digest == record.vocabulary_digest && old.matches == record.matches
        });
        if !same {
            self.data.proposals.insert(id, record);
            self.dirty = true;
        }
        Ok(())
    }

    /// Remember the vocabulary that stamped this store. Returns whether it changed.
    pub fn set_vocabulary(&mut self, snapshot: &VocabularySnapshot) -> bool {
        if self.data.vocabulary.as_ref() == Some(snapshot) {
            return false;
        }
        self.data.vocabulary = Some(snapshot.clone());
        self.dirty = true;
        true
    }
}

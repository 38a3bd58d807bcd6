//! Store transaction tests

use super::*;
use modelvault_engine::{normalize, EngineConfig, ScanRow, VariantKind};
use modelvault_vocab::{Domain, VocabularyEntry, VocabularyIndex};
use tempfile::tempdir;

fn scanned(id: &str, path: &str) -> Variant {
    Variant::from_scan(ScanRow {
        id: id.to_string(),
        path: path.to_string(),
        kind: Some(VariantKind::Folder),
        size: None,
        mtime: None,
        model_file_count: Some(1),
    })
    .unwrap()
}

fn seeded(dir: &Path) -> Store {
    let store = Store::open_or_create(&dir.join("store.json")).unwrap();
    store
        .transaction(|tx| {
            tx.ingest(scanned("v1", "GhamakMiniatures/Elf_Archer_32mm_v2_split_presupported"));
            tx.ingest(scanned("v2", "Intercessors"));
            tx.ingest(scanned("v3", "Intercessors/bodies"));
            Ok::<_, StoreError>(())
        })
        .unwrap();
    store
}

fn text(s: &str) -> Option<FieldValue> {
    Some(FieldValue::text(s))
}

#[test]
fn test_open_or_create_writes_an_empty_store() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("store.json");
    let store = Store::open_or_create(&path).unwrap();
    assert!(path.exists());
    assert!(store.is_empty());
    assert!(store.db_url().starts_with("file://"));

    let reopened = Store::open(&path).unwrap();
    assert!(reopened.is_empty());
}

#[test]
fn test_committed_transaction_survives_reopen() {
    let dir = tempdir().unwrap();
    let store = seeded(dir.path());
    assert_eq!(store.len(), 3);

    let reopened = Store::open(store.path()).unwrap();
    assert_eq!(reopened.variant_ids(), vec!["v1", "v2", "v3"]);
    assert!(reopened.updated_at().is_some());
}

#[test]
fn test_failed_transaction_rolls_back() {
    let dir = tempdir().unwrap();
    let store = seeded(dir.path());
    let before = std::fs::read_to_string(store.path()).unwrap();

    let result: Result<(), StoreError> = store.transaction(|tx| {
        tx.set_field("v1", Field::Designer, text("ghamak"), WriteMode::SAFE)?;
        tx.set_field("missing", Field::Designer, text("ghamak"), WriteMode::SAFE)?;
        Ok(())
    });
    assert!(matches!(result, Err(StoreError::UnknownVariant(id)) if id == "missing"));

    assert_eq!(store.variant("v1").unwrap().fields.designer, None);
    assert_eq!(std::fs::read_to_string(store.path()).unwrap(), before);
}

#[test]
fn test_noop_transaction_does_not_rewrite() {
    let dir = tempdir().unwrap();
    let store = seeded(dir.path());
    let stamp = store.updated_at();

    let rows = store
        .transaction(|tx| {
            tx.ingest(scanned("v1", "GhamakMiniatures/Elf_Archer_32mm_v2_split_presupported"));
            Ok::<_, StoreError>(tx.rows_changed())
        })
        .unwrap();
    assert_eq!(rows, 0);
    assert_eq!(store.updated_at(), stamp);
}

#[test]
fn test_set_field_is_check_and_set() {
    let dir = tempdir().unwrap();
    let store = seeded(dir.path());

    let writes = store
        .transaction(|tx| {
            Ok::<_, StoreError>(vec![
                tx.set_field("v1", Field::Designer, text("ghamak"), WriteMode::SAFE)?,
                tx.set_field("v1", Field::Designer, text("ghamak"), WriteMode::SAFE)?,
                tx.set_field("v1", Field::Designer, text("other"), WriteMode::SAFE)?,
                tx.set_field("v1", Field::Designer, text("other"), WriteMode::FORCE)?,
            ])
        })
        .unwrap();
    assert_eq!(
        writes,
        vec![
            FieldWrite::Written,
            FieldWrite::Unchanged,
            FieldWrite::SkippedOccupied,
            FieldWrite::Written,
        ]
    );
    assert_eq!(store.variant("v1").unwrap().fields.designer.as_deref(), Some("other"));
}

#[test]
fn test_override_survives_safe_writes() {
    let dir = tempdir().unwrap();
    let store = seeded(dir.path());

    store
        .transaction(|tx| tx.set_override("v1", Field::Designer, text("curated")))
        .unwrap();
    let write = store
        .transaction(|tx| tx.set_field("v1", Field::Designer, text("ghamak"), WriteMode::SAFE))
        .unwrap();
    assert_eq!(write, FieldWrite::SkippedOverride);

    let v = store.variant("v1").unwrap();
    assert!(v.is_overridden(Field::Designer));
    assert_eq!(v.fields.designer.as_deref(), Some("curated"));
}

#[test]
fn test_compare_and_set_detects_drift() {
    let dir = tempdir().unwrap();
    let store = seeded(dir.path());
    store
        .transaction(|tx| tx.set_field("v1", Field::Designer, text("someone"), WriteMode::SAFE))
        .unwrap();

    let write = store
        .transaction(|tx| {
            tx.compare_and_set("v1", Field::Designer, None, text("ghamak"), WriteMode::SAFE)
        })
        .unwrap();
    assert_eq!(
        write,
        FieldWrite::Conflict {
            current: text("someone")
        }
    );
}

#[test]
fn test_normalization_applies_once() {
    let dir = tempdir().unwrap();
    let store = seeded(dir.path());
    let config = EngineConfig::default();
    let index = VocabularyIndex::build(
        &VocabularySnapshot::new(vec![
            VocabularyEntry::new(Domain::Designer, "ghamak").with_aliases(&["ghamakminiatures"]),
        ]),
        &config.tokenizer,
    )
    .unwrap();

    let run = || {
        store
            .transaction(|tx| {
                let variant = tx.variant("v1")?.clone();
                let outcome = normalize(&variant, &index, &config);
                tx.apply_normalization("v1", &outcome, WriteMode::SAFE)?;
                Ok::<_, StoreError>(tx.rows_changed())
            })
            .unwrap()
    };
    assert_eq!(run(), 1);
    assert_eq!(run(), 0);

    let v = store.variant("v1").unwrap();
    assert_eq!(v.fields.designer.as_deref(), Some("ghamak"));
    assert_eq!(v.token_version.as_deref(), Some(index.digest()));
}

#[test]
fn test_kit_links_upsert_idempotently() {
    let dir = tempdir().unwrap();
    let store = seeded(dir.path());

    let first = store
        .transaction(|tx| {
            tx.mark_container("v2", vec![PartPackType::Bodies])?;
            tx.upsert_kit_link("v3", "v2", PartPackType::Bodies)
        })
        .unwrap();
    let second = store
        .transaction(|tx| tx.upsert_kit_link("v3", "v2", PartPackType::Bodies))
        .unwrap();
    assert_eq!(first, FieldWrite::Written);
    assert_eq!(second, FieldWrite::Unchanged);

    let child = store.variant("v3").unwrap();
    assert_eq!(child.kit.parent_id.as_deref(), Some("v2"));
    assert!(store.variant("v2").unwrap().kit.is_kit_container);
}

#[test]
fn test_moved_variant_loses_digest_stamp() {
    let dir = tempdir().unwrap();
    let store = seeded(dir.path());
    store
        .transaction(|tx| tx.restamp("v2", "sha256:abc"))
        .unwrap();

    let write = store
        .transaction(|tx| Ok::<_, StoreError>(tx.ingest(scanned("v2", "Marines/Intercessors"))))
        .unwrap();
    assert_eq!(write, IngestWrite::Updated);
    let v = store.variant("v2").unwrap();
    assert_eq!(v.path, "Marines/Intercessors");
    assert_eq!(v.token_version, None);
}

#[test]
fn test_vocabulary_snapshot_is_kept() {
    let dir = tempdir().unwrap();
    let store = seeded(dir.path());
    let snapshot = VocabularySnapshot::new(vec![VocabularyEntry::new(Domain::Designer, "ghamak")]);

    assert!(store
        .transaction(|tx| Ok::<_, StoreError>(tx.set_vocabulary(&snapshot)))
        .unwrap());
    assert!(!store
        .transaction(|tx| Ok::<_, StoreError>(tx.set_vocabulary(&snapshot)))
        .unwrap());
    let reopened = Store::open(store.path()).unwrap();
    assert_eq!(reopened.vocabulary(), Some(snapshot));
}

#[test]
fn test_unsupported_format_version_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.json");
    std::fs::write(&path, r#"{"format_version": 99}"#).unwrap();
    assert!(matches!(
        Store::open(&path),
        Err(StoreError::Format { found: 99, .. })
    ));
}

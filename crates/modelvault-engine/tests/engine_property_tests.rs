//! Property tests for normalization, matching and kit backfill.

use modelvault_engine::*;
use modelvault_vocab::{Domain, VocabularyEntry, VocabularyIndex, VocabularySnapshot};
use proptest::prelude::*;

fn vocabulary() -> VocabularySnapshot {
    VocabularySnapshot::new(vec![
        VocabularyEntry::new(Domain::Designer, "ghamak").with_aliases(&["ghamakminiatures"]),
        VocabularyEntry::new(Domain::GameSystem, "w40k").with_aliases(&["40k", "warhammer40k"]),
        VocabularyEntry::new(Domain::GameSystem, "aos").with_aliases(&["sigmar"]),
        VocabularyEntry::new(Domain::Faction, "space_marines")
            .with_aliases(&["space marines", "astartes"])
            .with_system("w40k"),
        VocabularyEntry::new(Domain::Lineage, "elf").with_aliases(&["elves", "aelf"]),
        VocabularyEntry::new(Domain::Lineage, "dwarf").with_aliases(&["dwarves", "duardin"]),
        VocabularyEntry::new(Domain::Unit, "intercessors")
            .with_system("w40k")
            .with_faction("space_marines"),
        VocabularyEntry::new(Domain::Unit, "assault_intercessors")
            .with_aliases(&["assault intercessors"])
            .with_system("w40k")
            .with_faction("space_marines"),
        VocabularyEntry::new(Domain::Unit, "heavy_intercessors")
            .with_aliases(&["heavy intercessors"])
            .with_system("w40k")
            .with_faction("space_marines"),
        VocabularyEntry::new(Domain::Unit, "archers").with_system("aos"),
    ])
}

const WORDS: &[&str] = &[
    "GhamakMiniatures",
    "Elf",
    "Dwarves",
    "Archer",
    "archers",
    "Intercessors",
    "Assault",
    "Heavy",
    "40k",
    "Sigmar",
    "Astartes",
    "32mm",
    "75mm",
    "1-10",
    "v2",
    "split",
    "merged",
    "presupported",
    "unsupported",
    "hollow",
    "nsfw",
    "bust",
    "heads",
    "bodies",
    "weapons",
];

fn segment_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(WORDS), 1..4).prop_map(|w| w.join("_"))
}

fn path_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(segment_strategy(), 1..4).prop_map(|s| s.join("/"))
}

fn folder(id: &str, path: &str, files: u32) -> Variant {
    Variant::from_scan(ScanRow {
        id: id.to_string(),
        path: path.to_string(),
        kind: Some(VariantKind::Folder),
        size: None,
        mtime: None,
        model_file_count: Some(files),
    })
    .unwrap()
}

fn kit_strategy() -> impl Strategy<Value = Vec<Variant>> {
    const CHILDREN: &[&str] = &["bodies", "heads", "weapons", "arms", "sergeant", "bases"];
    (
        prop::sample::subsequence(CHILDREN.to_vec(), 0..=CHILDREN.len()),
        prop::collection::vec(0u32..4, CHILDREN.len()),
    )
        .prop_map(|(children, files)| {
            let mut variants = vec![folder("p", "Intercessors", 0)];
            for (i, (name, count)) in children.into_iter().zip(files).enumerate() {
                variants.push(folder(&format!("c{i}"), &format!("Intercessors/{name}"), count));
            }
            variants
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn normalize_is_deterministic(path in path_strategy()) {
        let config = EngineConfig::default();
        let index = VocabularyIndex::build(&vocabulary(), &config.tokenizer).unwrap();
        let variant = folder("v", &path, 1);
        prop_assert_eq!(normalize(&variant, &index, &config), normalize(&variant, &index, &config));
    }

    #[test]
    fn nulled_fields_are_never_set(path in path_strategy()) {
        let config = EngineConfig::default();
        let index = VocabularyIndex::build(&vocabulary(), &config.tokenizer).unwrap();
        let outcome = normalize(&folder("v", &path, 1), &index, &config);
        for field in &outcome.nulled {
            prop_assert_eq!(outcome.fields.get(*field), None);
        }
    }

    #[test]
    fn applying_an_outcome_twice_changes_nothing(path in path_strategy()) {
        let config = EngineConfig::default();
        let index = VocabularyIndex::build(&vocabulary(), &config.tokenizer).unwrap();
        let mut variant = folder("v", &path, 1);

        let outcome = normalize(&variant, &index, &config);
        apply_outcome(&mut variant, &outcome, WriteMode::SAFE).unwrap();
        let snapshot = variant.clone();

        let again = normalize(&variant, &index, &config);
        let applied = apply_outcome(&mut variant, &again, WriteMode::SAFE).unwrap();
        prop_assert!(!applied.row_changed);
        prop_assert_eq!(variant, snapshot);
    }

    #[test]
    fn delta_gate_never_promotes_a_near_tie(path in path_strategy(), delta in 0.0f64..20.0) {
        let mut config = EngineConfig::default();
        config.matcher.delta = delta;
        let index = VocabularyIndex::build(&vocabulary(), &config.tokenizer).unwrap();
        let matcher = Matcher::new(&index, &config.matcher, &config.tokenizer);

        let result = matcher.match_variant(&folder("v", &path, 1));
        for kind in &result.kinds {
            let scores: Vec<f64> = kind.proposals.iter().map(|p| p.score).collect();
            prop_assert!(scores.windows(2).all(|w| w[0] >= w[1]));

            let primaries = kind
                .proposals
                .iter()
                .filter(|p| p.tier == ConfidenceTier::Primary)
                .count();
            match kind.decision {
                MatchDecision::Accepted => {
                    prop_assert_eq!(primaries, 1);
                    let top = &kind.proposals[0];
                    prop_assert_eq!(top.tier, ConfidenceTier::Primary);
                    prop_assert!(top.score >= config.matcher.min_score);
                    if let Some(runner_up) = kind.proposals.get(1) {
                        prop_assert!(top.score - runner_up.score >= delta);
                    }
                }
                _ => prop_assert_eq!(primaries, 0),
            }
        }
    }

    #[test]
    fn kit_backfill_is_idempotent(mut variants in kit_strategy(), group in any::<bool>()) {
        let config = KitConfig { group_children: group, ..KitConfig::default() };
        let tokenizer = modelvault_vocab::TokenizerConfig::default();

        let plan = backfill_kits(&variants, &config, &tokenizer, false);
        for write in &plan.writes {
            let variant = variants.iter_mut().find(|v| v.id == write.variant_id()).unwrap();
            apply_kit_write(variant, write, WriteMode::SAFE).unwrap();
        }

        let second = backfill_kits(&variants, &config, &tokenizer, false);
        prop_assert!(second.writes.is_empty(), "second pass planned {:?}", second.writes);
        prop_assert!(second.stale_links.is_empty());
    }
}

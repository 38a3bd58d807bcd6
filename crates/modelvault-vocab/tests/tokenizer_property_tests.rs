//! Property tests for the tokenizer and index.

use modelvault_vocab::*;
use proptest::prelude::*;
use std::collections::HashSet;

fn segment_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_ .()-]{0,24}".prop_map(|s| s)
}

fn path_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(segment_strategy(), 1..5)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn tokenize_is_deterministic(path in path_strategy()) {
        let config = TokenizerConfig::default();
        prop_assert_eq!(tokenize(&path, &config), tokenize(&path, &config));
    }

    #[test]
    fn dedup_has_no_duplicates_and_respects_min_len(path in path_strategy()) {
        let config = TokenizerConfig::default();
        let stream = tokenize(&path, &config);
        let unique: HashSet<&String> = stream.dedup.iter().collect();
        prop_assert_eq!(unique.len(), stream.dedup.len());
        for token in &stream.dedup {
            prop_assert!(token.chars().count() >= config.min_token_len);
            prop_assert!(stream.raw.contains(token));
            prop_assert_eq!(token.to_lowercase(), token.clone());
        }
    }

    #[test]
    fn residual_candidates_are_an_ordered_subset(path in path_strategy()) {
        let config = TokenizerConfig::default();
        let stream = tokenize(&path, &config);
        let mut cursor = stream.dedup.iter();
        for token in &stream.residual_candidates {
            prop_assert!(!config.is_stopword(token));
            prop_assert!(cursor.any(|t| t == token));
        }
    }

    #[test]
    fn unknown_tokens_never_match(token in "[q-z]{12,16}") {
        let snapshot = VocabularySnapshot::new(vec![
            VocabularyEntry::new(Domain::Designer, "ghamak").with_aliases(&["ghamakminiatures"]),
        ]);
        let index = VocabularyIndex::build(&snapshot, &TokenizerConfig::default()).unwrap();
        prop_assert!(index.lookup(Domain::Designer, &token).is_none());
    }
}

#[test]
fn digest_is_order_independent() {
    let a = VocabularyEntry::new(Domain::Designer, "ghamak");
    let b = VocabularyEntry::new(Domain::Lineage, "elf");
    let one = VocabularySnapshot::new(vec![a.clone(), b.clone()]);
    let two = VocabularySnapshot::new(vec![b, a]);
    assert_eq!(one.digest(), two.digest());
}

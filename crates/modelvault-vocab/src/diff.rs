//! Vocabulary snapshot diffs.
//!
//! A digest bump must not trigger a blanket re-normalization. Instead the old
//! and new snapshots are diffed at load time and only variants whose raw tokens
//! intersect the changed alias tokens are re-normalized.

use crate::digest::entry_fingerprint;
use crate::{Domain, TokenizerConfig, VocabularySnapshot};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabularyDiff {
    pub from_digest: String,
    pub to_digest: String,
    /// Tokens of every alias that was added, removed or now resolves differently.
    pub changed_tokens: BTreeSet<String>,
}

fn alias_table(
    snapshot: &VocabularySnapshot,
    tokenizer: &TokenizerConfig,
) -> HashMap<(Domain, String), String> {
    let mut table = HashMap::new();
    for entry in &snapshot.entries {
        let fingerprint = entry_fingerprint(entry);
        for form in entry.surface_forms() {
            let tokens = tokenizer.alias_tokens(form);
            if tokens.is_empty() {
                continue;
            }
            table
                .entry((entry.domain, tokens.join(" ")))
                .or_insert_with(|| fingerprint.clone());
        }
    }
    table
}

impl VocabularyDiff {
    pub fn between(
        old: &VocabularySnapshot,
        new: &VocabularySnapshot,
        tokenizer: &TokenizerConfig,
    ) -> Self {
        let from_digest = old.digest();
        let to_digest = new.digest();
        let mut changed_tokens = BTreeSet::new();

        if from_digest != to_digest {
            let before = alias_table(old, tokenizer);
            let after = alias_table(new, tokenizer);

            let mut changed_keys: Vec<&String> = Vec::new();
            for (key, fingerprint) in &before {
                if after.get(key) != Some(fingerprint) {
                    changed_keys.push(&key.1);
                }
            }
            for key in after.keys() {
                if !before.contains_key(key) {
                    changed_keys.push(&key.1);
                }
            }
            for alias in changed_keys {
                changed_tokens.extend(alias.split(' ').map(|t| t.to_string()));
            }
        }

        Self {
            from_digest,
            to_digest,
            changed_tokens,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changed_tokens.is_empty()
    }

    /// Whether a variant with these raw tokens needs re-normalization.
    pub fn touches<'a>(&self, raw_tokens: impl IntoIterator<Item = &'a String>) -> bool {
        raw_tokens
            .into_iter()
            .any(|t| self.changed_tokens.contains(t))
    }
}

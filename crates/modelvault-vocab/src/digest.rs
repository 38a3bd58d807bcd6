//! Vocabulary content digests (versioned).
//!
//! Every normalized variant is stamped with the digest of the vocabulary that
//! produced its fields (`token_version`). The digest must therefore be stable
//! under curator-side reordering:
//!
//! - entries are sorted by `(domain, canonical)`
//! - aliases are sorted and deduplicated
//! - the canonical form is serialized as compact JSON
//!
//! Output: `"sha256:<64 lowercase hex digits>"`.

use crate::{VocabularyEntry, VocabularySnapshot};
use sha2::{Digest, Sha256};

/// Prefix used in serialized vocabulary digests.
pub const VOCAB_DIGEST_V1_PREFIX: &str = "sha256:";

/// Canonical form of one entry, as hashed.
pub(crate) fn canonical_entry(entry: &VocabularyEntry) -> VocabularyEntry {
    let mut entry = entry.clone();
    entry.aliases.sort();
    entry.aliases.dedup();
    entry
}

/// Compute the v1 digest of a vocabulary snapshot.
pub fn vocabulary_digest_v1(snapshot: &VocabularySnapshot) -> String {
    let mut entries: Vec<VocabularyEntry> = snapshot.entries.iter().map(canonical_entry).collect();
    entries.sort_by(|a, b| (a.domain, &a.canonical).cmp(&(b.domain, &b.canonical)));

    let mut hasher = Sha256::new();
    for entry in &entries {
        // Serializing a plain struct of strings/bools cannot fail.
        let bytes = serde_json::to_vec(entry).unwrap_or_default();
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(&bytes);
    }

    format!("{VOCAB_DIGEST_V1_PREFIX}{:x}", hasher.finalize())
}

/// Fingerprint of a single entry; changes whenever anything about the entry changes.
pub(crate) fn entry_fingerprint(entry: &VocabularyEntry) -> String {
    let bytes = serde_json::to_vec(&canonical_entry(entry)).unwrap_or_default();
    format!("{:x}", Sha256::digest(&bytes))
}

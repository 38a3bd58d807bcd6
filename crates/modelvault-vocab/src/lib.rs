//! Tokenizer and vocabulary index for modelvault.
//!
//! Leaves of the normalization pipeline:
//!
//! ```text
//! path segments ──► tokenize ──► TokenStream ──┐
//!                                              ├──► normalizer / matcher
//! VocabularySnapshot ──► VocabularyIndex ──────┘
//!        │                  (digest-keyed, immutable, Arc-shared)
//!        └──► VocabularyDiff (scopes re-normalization on a digest bump)
//! ```
//!
//! Nothing here knows about variants or storage.

pub mod diff;
pub mod digest;
pub mod index;
pub mod snapshot;
pub mod tokenize;

pub use diff::VocabularyDiff;
pub use digest::{vocabulary_digest_v1, VOCAB_DIGEST_V1_PREFIX};
pub use index::{EntryId, IndexCache, PhraseHit, VocabularyIndex};
pub use snapshot::{Domain, UnitCategory, VocabularyEntry, VocabularySnapshot};
pub use tokenize::{path_segments, tokenize, TokenStream, TokenizerConfig};

use serde::{Deserialize, Serialize};

/// An alias claimed by two canonical targets within one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasCollision {
    pub domain: Domain,
    pub alias: String,
    pub first: String,
    pub second: String,
}

impl std::fmt::Display for AliasCollision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: alias `{}` claimed by `{}` and `{}`",
            self.domain, self.alias, self.first, self.second
        )
    }
}

fn format_collisions(collisions: &[AliasCollision]) -> String {
    collisions
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Vocabulary load-time failures. These are fatal to a run and surface to the
/// curator; they never occur during per-variant processing.
#[derive(Debug, thiserror::Error)]
pub enum VocabularyError {
    #[error("ambiguous vocabulary aliases ({}): {}", .0.len(), format_collisions(.0))]
    Validation(Vec<AliasCollision>),

    #[error("vocabulary entry in domain `{domain}` has an empty canonical key")]
    EmptyCanonical { domain: Domain },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

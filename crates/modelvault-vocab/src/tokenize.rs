//! Path tokenization.
//!
//! Turns the segments of a scanned path (folders + filename) into normalized
//! tokens:
//!
//! 1. lowercase
//! 2. Unicode NFC
//! 3. split on configured separators
//! 4. strip configured punctuation from token ends
//! 5. drop tokens shorter than `min_token_len` from classification (they stay in `raw`)
//! 6. dedup, first occurrence wins
//!
//! The tokenizer never consults a vocabulary. Identical input and an identical
//! [`TokenizerConfig`] always produce an identical [`TokenStream`].

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

pub const TOKENIZER_CONFIG_VERSION_V1: u32 = 1;

const DEFAULT_SEPARATORS: &str = "/\\_-.,+()[]{}&~";
const DEFAULT_STRIP_CHARS: &str = "'\"!?#@*:;";

const DEFAULT_STOPWORDS: &[&str] = &[
    "the", "and", "of", "for", "with", "by", "in", "on", "stl", "stls", "obj", "lys", "chitubox",
    "3mf", "ztl", "blend", "zip", "rar", "7z", "file", "files", "model", "models", "print",
    "printable", "final", "new", "copy",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizerConfig {
    /// Bumped whenever a change here can change token output.
    pub version: u32,
    /// Characters that split a segment into tokens (whitespace always splits).
    pub separators: String,
    /// Characters trimmed from both ends of every token.
    pub strip_chars: String,
    pub min_token_len: usize,
    pub stopwords: Vec<String>,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            version: TOKENIZER_CONFIG_VERSION_V1,
            separators: DEFAULT_SEPARATORS.to_string(),
            strip_chars: DEFAULT_STRIP_CHARS.to_string(),
            min_token_len: 2,
            stopwords: DEFAULT_STOPWORDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl TokenizerConfig {
    fn is_separator(&self, c: char) -> bool {
        c.is_whitespace() || self.separators.contains(c)
    }

    fn is_strip_char(&self, c: char) -> bool {
        self.strip_chars.contains(c)
    }

    pub fn is_stopword(&self, token: &str) -> bool {
        self.stopwords.iter().any(|s| s == token)
    }

    /// Lowercase + NFC + whitespace collapse for one segment.
    pub fn normalize_segment(&self, segment: &str) -> String {
        let folded: String = segment.to_lowercase().nfc().collect();
        folded.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Split one normalized segment into tokens (no length filtering).
    pub fn split_tokens(&self, normalized: &str) -> Vec<String> {
        normalized
            .split(|c: char| self.is_separator(c))
            .map(|t| t.trim_matches(|c: char| self.is_strip_char(c)))
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .collect()
    }

    /// Token sequence for a vocabulary alias.
    ///
    /// Uses the same pipeline as path segments so both sides of a lookup agree,
    /// but keeps short tokens: a phrase is matched as a whole.
    pub fn alias_tokens(&self, alias: &str) -> Vec<String> {
        self.split_tokens(&self.normalize_segment(alias))
    }

    fn classifiable(&self, token: &str) -> bool {
        token.chars().count() >= self.min_token_len
    }
}

/// Tokenizer output for one variant path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenStream {
    /// Every token, in path order, including sub-minimum-length ones.
    pub raw: Vec<String>,
    /// Classifiable tokens, deduplicated, first occurrence order.
    pub dedup: Vec<String>,
    /// `dedup` minus stopwords: what residual capture may keep.
    pub residual_candidates: Vec<String>,
    /// Classifiable tokens per path segment, in order (duplicates kept).
    pub segments: Vec<Vec<String>>,
    /// Lowercased NFC text of each segment, for structural patterns.
    pub normalized_segments: Vec<String>,
}

impl TokenStream {
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.dedup.iter().any(|t| t == token)
    }

    /// Classifiable tokens of the first `depth` segments, deduplicated.
    pub fn leading_tokens(&self, depth: usize) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.segments
            .iter()
            .take(depth)
            .flatten()
            .filter(|t| seen.insert(t.as_str()))
            .map(|t| t.as_str())
            .collect()
    }
}

/// Tokenize path segments (folders then filename).
pub fn tokenize<S: AsRef<str>>(path_segments: &[S], config: &TokenizerConfig) -> TokenStream {
    let mut stream = TokenStream::default();
    let mut seen: HashSet<String> = HashSet::new();

    for segment in path_segments {
        let normalized = config.normalize_segment(segment.as_ref());
        let mut segment_tokens = Vec::new();

        for token in config.split_tokens(&normalized) {
            stream.raw.push(token.clone());
            if !config.classifiable(&token) {
                continue;
            }
            segment_tokens.push(token.clone());
            if seen.insert(token.clone()) {
                if !config.is_stopword(&token) {
                    stream.residual_candidates.push(token.clone());
                }
                stream.dedup.push(token);
            }
        }

        stream.segments.push(segment_tokens);
        stream.normalized_segments.push(normalized);
    }

    stream
}

/// Split a `/`-separated relative path into segments, skipping empty ones.
pub fn path_segments(path: &str) -> Vec<&str> {
    path.split(|c: char| c == '/' || c == '\\')
        .filter(|s| !s.trim().is_empty())
        .collect()
}

//! Digest-keyed alias → canonical lookup.
//!
//! A [`VocabularyIndex`] is built once per vocabulary digest and then shared
//! (immutably, behind an `Arc`) by every per-variant call. It supports:
//!
//! - O(1) single-token alias lookup per domain,
//! - longest-phrase-first multi-token alias matching over a sliding window,
//! - token → entries lookup for partial-overlap scoring in the matcher.
//!
//! Two different canonical targets claiming the same alias within a domain is a
//! load-time validation error. Unknown tokens simply produce no match.

use crate::{
    AliasCollision, Domain, TokenStream, TokenizerConfig, VocabularyEntry, VocabularyError,
    VocabularySnapshot,
};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub type EntryId = usize;

/// One phrase (or single-token) alias hit inside a token sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhraseHit {
    pub entry: EntryId,
    /// Segment the hit was found in.
    pub segment: usize,
    /// Token offset inside the segment.
    pub start: usize,
    /// The matched tokens.
    pub tokens: Vec<String>,
}

#[derive(Debug)]
pub struct VocabularyIndex {
    digest: String,
    tokenizer_version: u32,
    entries: Vec<VocabularyEntry>,
    alias_to_canonical: HashMap<(Domain, String), EntryId>,
    phrases: HashMap<(Domain, String), EntryId>,
    max_phrase_len: BTreeMap<Domain, usize>,
    by_canonical: HashMap<(Domain, String), EntryId>,
    token_index: HashMap<(Domain, String), Vec<EntryId>>,
    surface_tokens: Vec<Vec<Vec<String>>>,
}

impl VocabularyIndex {
    /// Build and validate an index.
    ///
    /// All alias collisions are collected before failing so the curator sees
    /// the complete list in one pass.
    pub fn build(
        snapshot: &VocabularySnapshot,
        tokenizer: &TokenizerConfig,
    ) -> Result<Self, VocabularyError> {
        let digest = snapshot.digest();
        let entries = snapshot.entries.clone();

        let mut alias_to_canonical: HashMap<(Domain, String), EntryId> = HashMap::new();
        let mut phrases: HashMap<(Domain, String), EntryId> = HashMap::new();
        let mut max_phrase_len: BTreeMap<Domain, usize> = BTreeMap::new();
        let mut by_canonical: HashMap<(Domain, String), EntryId> = HashMap::new();
        let mut token_index: HashMap<(Domain, String), Vec<EntryId>> = HashMap::new();
        let mut surface_tokens: Vec<Vec<Vec<String>>> = Vec::with_capacity(entries.len());
        let mut collisions: Vec<AliasCollision> = Vec::new();

        for (id, entry) in entries.iter().enumerate() {
            if entry.canonical.trim().is_empty() {
                return Err(VocabularyError::EmptyCanonical {
                    domain: entry.domain,
                });
            }
            by_canonical
                .entry((entry.domain, entry.canonical.clone()))
                .or_insert(id);

            let mut forms: Vec<Vec<String>> = Vec::new();
            for form in entry.surface_forms() {
                let tokens = tokenizer.alias_tokens(form);
                if tokens.is_empty() || forms.contains(&tokens) {
                    continue;
                }

                let key = tokens.join(" ");
                let table = if tokens.len() == 1 {
                    &mut alias_to_canonical
                } else {
                    &mut phrases
                };
                match table.entry((entry.domain, key.clone())) {
                    Entry::Occupied(existing) if *existing.get() != id => {
                        collisions.push(AliasCollision {
                            domain: entry.domain,
                            alias: key,
                            first: entries[*existing.get()].canonical.clone(),
                            second: entry.canonical.clone(),
                        });
                        continue;
                    }
                    Entry::Occupied(_) => {}
                    Entry::Vacant(slot) => {
                        slot.insert(id);
                    }
                }

                let longest = max_phrase_len.entry(entry.domain).or_insert(1);
                *longest = (*longest).max(tokens.len());

                for token in &tokens {
                    let ids = token_index.entry((entry.domain, token.clone())).or_default();
                    if ids.last() != Some(&id) {
                        ids.push(id);
                    }
                }
                forms.push(tokens);
            }
            surface_tokens.push(forms);
        }

        if !collisions.is_empty() {
            tracing::warn!(
                digest = %digest,
                collisions = collisions.len(),
                "vocabulary rejected: ambiguous aliases"
            );
            return Err(VocabularyError::Validation(collisions));
        }

        tracing::debug!(
            digest = %digest,
            entries = entries.len(),
            aliases = alias_to_canonical.len(),
            phrases = phrases.len(),
            "built vocabulary index"
        );

        Ok(Self {
            digest,
            tokenizer_version: tokenizer.version,
            entries,
            alias_to_canonical,
            phrases,
            max_phrase_len,
            by_canonical,
            token_index,
            surface_tokens,
        })
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn tokenizer_version(&self) -> u32 {
        self.tokenizer_version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, id: EntryId) -> &VocabularyEntry {
        &self.entries[id]
    }

    pub fn entries(&self) -> impl Iterator<Item = (EntryId, &VocabularyEntry)> {
        self.entries.iter().enumerate()
    }

    pub fn entries_in(&self, domain: Domain) -> impl Iterator<Item = (EntryId, &VocabularyEntry)> {
        self.entries().filter(move |(_, e)| e.domain == domain)
    }

    /// Single-token alias lookup.
    pub fn lookup(&self, domain: Domain, token: &str) -> Option<&VocabularyEntry> {
        self.lookup_id(domain, token).map(|id| &self.entries[id])
    }

    pub fn lookup_id(&self, domain: Domain, token: &str) -> Option<EntryId> {
        self.alias_to_canonical
            .get(&(domain, token.to_string()))
            .copied()
    }

    pub fn canonical_id(&self, domain: Domain, canonical: &str) -> Option<EntryId> {
        self.by_canonical
            .get(&(domain, canonical.to_string()))
            .copied()
    }

    pub fn canonical(&self, domain: Domain, canonical: &str) -> Option<&VocabularyEntry> {
        self.canonical_id(domain, canonical).map(|id| &self.entries[id])
    }

    /// Entries whose surface forms contain `token`.
    pub fn entries_with_token(&self, domain: Domain, token: &str) -> &[EntryId] {
        self.token_index
            .get(&(domain, token.to_string()))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Token sequences of an entry's canonical key, name and aliases.
    pub fn surface_tokens(&self, id: EntryId) -> &[Vec<String>] {
        &self.surface_tokens[id]
    }

    fn lookup_window(&self, domain: Domain, window: &[String]) -> Option<EntryId> {
        if window.len() == 1 {
            return self.lookup_id(domain, &window[0]);
        }
        self.phrases.get(&(domain, window.join(" "))).copied()
    }

    /// Longest-phrase-first, non-overlapping alias hits in one token sequence.
    pub fn match_tokens(&self, domain: Domain, tokens: &[String]) -> Vec<(usize, usize, EntryId)> {
        let max_len = self.max_phrase_len.get(&domain).copied().unwrap_or(0);
        let mut hits = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            let longest = max_len.min(tokens.len() - i);
            let hit = (1..=longest)
                .rev()
                .find_map(|len| self.lookup_window(domain, &tokens[i..i + len]).map(|id| (len, id)));
            match hit {
                Some((len, id)) => {
                    hits.push((i, len, id));
                    i += len;
                }
                None => i += 1,
            }
        }
        hits
    }

    /// Alias hits for one domain across every segment of a token stream.
    ///
    /// Phrases never span segment boundaries.
    pub fn scan(&self, domain: Domain, stream: &TokenStream) -> Vec<PhraseHit> {
        let mut out = Vec::new();
        for (segment, tokens) in stream.segments.iter().enumerate() {
            for (start, len, entry) in self.match_tokens(domain, tokens) {
                out.push(PhraseHit {
                    entry,
                    segment,
                    start,
                    tokens: tokens[start..start + len].to_vec(),
                });
            }
        }
        out
    }

    /// Walk `parent` links within a domain, starting at `canonical` (inclusive).
    pub fn ancestors(&self, domain: Domain, canonical: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = Some(canonical.to_string());
        while let Some(key) = current {
            if chain.contains(&key) {
                break;
            }
            current = self.canonical(domain, &key).and_then(|e| e.parent.clone());
            chain.push(key);
        }
        chain
    }

    /// Hierarchy distance between two entries of a domain.
    ///
    /// `Some(0)` for the same entry, `Some(n)` when one is reachable from the
    /// other through a common ancestor in `n` total steps, `None` when unrelated.
    pub fn hierarchy_distance(&self, domain: Domain, a: &str, b: &str) -> Option<usize> {
        let up_a = self.ancestors(domain, a);
        let up_b = self.ancestors(domain, b);
        up_a.iter()
            .enumerate()
            .filter_map(|(i, key)| up_b.iter().position(|k| k == key).map(|j| i + j))
            .min()
    }
}

/// Index cache keyed by vocabulary digest.
///
/// Rebuilds only when a snapshot with an unseen digest is presented.
#[derive(Debug, Default)]
pub struct IndexCache {
    built: HashMap<(String, u32), Arc<VocabularyIndex>>,
    builds: usize,
}

impl IndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build(
        &mut self,
        snapshot: &VocabularySnapshot,
        tokenizer: &TokenizerConfig,
    ) -> Result<Arc<VocabularyIndex>, VocabularyError> {
        let key = (snapshot.digest(), tokenizer.version);
        if let Some(index) = self.built.get(&key) {
            return Ok(Arc::clone(index));
        }
        let index = Arc::new(VocabularyIndex::build(snapshot, tokenizer)?);
        self.builds += 1;
        self.built.insert(key, Arc::clone(&index));
        Ok(index)
    }

    /// Number of index builds performed so far.
    pub fn build_count(&self) -> usize {
        self.builds
    }
}

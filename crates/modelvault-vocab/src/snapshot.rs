//! Vocabulary snapshots as curated on disk.
//!
//! A snapshot is versioned as a whole by its content digest (see [`crate::digest`]).
//! Parsing the curator's source files into this shape happens upstream; this
//! crate only reads the JSON form.

use crate::VocabularyError;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Designer,
    GameSystem,
    Faction,
    Lineage,
    Unit,
    Part,
    Franchise,
    Character,
}

impl Domain {
    pub const ALL: [Domain; 8] = [
        Domain::Designer,
        Domain::GameSystem,
        Domain::Faction,
        Domain::Lineage,
        Domain::Unit,
        Domain::Part,
        Domain::Franchise,
        Domain::Character,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Domain::Designer => "designer",
            Domain::GameSystem => "game_system",
            Domain::Faction => "faction",
            Domain::Lineage => "lineage",
            Domain::Unit => "unit",
            Domain::Part => "part",
            Domain::Franchise => "franchise",
            Domain::Character => "character",
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit category, used by contextual matcher hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitCategory {
    Infantry,
    Cavalry,
    MonstrousMount,
    Monster,
    Character,
    Spell,
    Vehicle,
    #[serde(other)]
    Other,
}

impl UnitCategory {
    pub fn is_mounted(self) -> bool {
        matches!(self, UnitCategory::Cavalry | UnitCategory::MonstrousMount)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabularyEntry {
    pub domain: Domain,
    /// Stable key within the domain.
    pub canonical: String,
    /// Display name; matched like an alias when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub deprecated: bool,
    /// Game system a faction/unit/part belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Faction of a unit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub faction: Option<String>,
    /// Parent entry in the same domain (sub-faction -> faction, character -> franchise).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<UnitCategory>,
    /// Unit a part belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Part is an optional loadout component.
    #[serde(default)]
    pub optional: bool,
}

impl VocabularyEntry {
    pub fn new(domain: Domain, canonical: &str) -> Self {
        Self {
            domain,
            canonical: canonical.to_string(),
            name: None,
            aliases: Vec::new(),
            deprecated: false,
            system: None,
            faction: None,
            parent: None,
            category: None,
            unit: None,
            optional: false,
        }
    }

    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_system(mut self, system: &str) -> Self {
        self.system = Some(system.to_string());
        self
    }

    pub fn with_faction(mut self, faction: &str) -> Self {
        self.faction = Some(faction.to_string());
        self
    }

    pub fn with_parent(mut self, parent: &str) -> Self {
        self.parent = Some(parent.to_string());
        self
    }

    pub fn with_category(mut self, category: UnitCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_unit(mut self, unit: &str, optional: bool) -> Self {
        self.unit = Some(unit.to_string());
        self.optional = optional;
        self
    }

    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    /// Canonical key, display name and aliases, in that order.
    pub fn surface_forms(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.canonical.as_str())
            .chain(self.name.as_deref())
            .chain(self.aliases.iter().map(|a| a.as_str()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabularySnapshot {
    pub entries: Vec<VocabularyEntry>,
}

impl VocabularySnapshot {
    pub fn new(entries: Vec<VocabularyEntry>) -> Self {
        Self { entries }
    }

    pub fn from_json_str(text: &str) -> Result<Self, VocabularyError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, VocabularyError> {
        let text = std::fs::read_to_string(path)?;
        let snapshot = Self::from_json_str(&text)?;
        tracing::debug!(
            path = %path.display(),
            entries = snapshot.entries.len(),
            "loaded vocabulary snapshot"
        );
        Ok(snapshot)
    }

    /// Content digest; see [`crate::digest::vocabulary_digest_v1`].
    pub fn digest(&self) -> String {
        crate::digest::vocabulary_digest_v1(self)
    }

    pub fn in_domain(&self, domain: Domain) -> impl Iterator<Item = &VocabularyEntry> {
        self.entries.iter().filter(move |e| e.domain == domain)
    }
}

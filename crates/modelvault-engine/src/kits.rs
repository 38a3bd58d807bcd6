//! Kit hierarchy backfill.
//!
//! Purely structural: no vocabulary is consulted. The variants form a flat
//! node table; a folder whose child folders (holding model files) are named
//! like kit parts ("bodies", "heads", ...) becomes a kit container and each
//! recognized child gets a `parent_id` back-reference and a label.
//!
//! [`backfill_kits`] only plans. The plan lists the writes an unchanged tree
//! would not need, so planning against an already-backfilled store is empty.

use crate::config::{classify, KitConfig};
use crate::model::{Field, FieldValue, FieldWrite, PartPackType, Variant, VariantId, VariantKind, WriteMode};
use crate::EngineError;
use modelvault_vocab::{tokenize, TokenizerConfig};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum KitWrite {
    MarkContainer {
        parent_id: VariantId,
        child_types: Vec<PartPackType>,
    },
    LinkChild {
        child_id: VariantId,
        parent_id: VariantId,
        label: PartPackType,
    },
    SetPartPackType {
        child_id: VariantId,
        value: PartPackType,
    },
}

impl KitWrite {
    pub fn variant_id(&self) -> &str {
        match self {
            KitWrite::MarkContainer { parent_id, .. } => parent_id,
            KitWrite::LinkChild { child_id, .. } => child_id,
            KitWrite::SetPartPackType { child_id, .. } => child_id,
        }
    }

    /// Name of the stored field the write targets.
    pub fn target(&self) -> &'static str {
        match self {
            KitWrite::MarkContainer { .. } => "is_kit_container",
            KitWrite::LinkChild { .. } => "parent_id",
            KitWrite::SetPartPackType { .. } => Field::PartPackType.as_str(),
        }
    }

    /// Value the write proposes, for writes to a normalized field.
    pub fn proposed(&self) -> Option<FieldValue> {
        match self {
            KitWrite::SetPartPackType { value, .. } => Some(FieldValue::text(value.as_str())),
            _ => None,
        }
    }
}

/// A child folder that could be a standalone variant or a kit part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmbiguousChild {
    pub child_id: VariantId,
    pub parent_id: VariantId,
    /// Linked as `other` because grouping was requested.
    pub grouped: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KitBackfill {
    /// Every detected container.
    pub parents_marked: Vec<VariantId>,
    /// Every linked child.
    pub children_linked: Vec<VariantId>,
    pub child_labels: BTreeMap<VariantId, PartPackType>,
    /// Writes needed to reach the detected state.
    pub writes: Vec<KitWrite>,
    pub ambiguous: Vec<AmbiguousChild>,
    /// Stored links the current tree no longer supports. Reported, never deleted.
    pub stale_links: Vec<VariantId>,
    /// Children whose part-pack type is set to something else and was kept.
    pub part_pack_conflicts: Vec<VariantId>,
}

struct KitNode {
    variant: usize,
    parent: Option<usize>,
}

/// Build the flat node table: one node per folder, parent by path.
fn node_table(variants: &[Variant]) -> (Vec<KitNode>, Vec<Vec<usize>>) {
    let by_path: HashMap<String, usize> = variants
        .iter()
        .enumerate()
        .filter(|(_, v)| v.kind == VariantKind::Folder)
        .map(|(i, v)| (v.segments().join("/"), i))
        .collect();

    let nodes: Vec<KitNode> = variants
        .iter()
        .enumerate()
        .map(|(i, v)| KitNode {
            variant: i,
            parent: v.parent_path().and_then(|p| by_path.get(&p).copied()),
        })
        .collect();

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); variants.len()];
    for node in &nodes {
        if let Some(parent) = node.parent {
            children[parent].push(node.variant);
        }
    }
    (nodes, children)
}

/// A folder holds models when the scan counted some or a file row sits directly under it.
fn holds_models(variants: &[Variant], children: &[Vec<usize>], folder: usize) -> bool {
    variants[folder].model_file_count > 0
        || children[folder]
            .iter()
            .any(|&c| variants[c].kind == VariantKind::File)
}

/// Kit-child label for a folder name. Names mixing labels are not recognized.
fn child_label(name: &str, config: &KitConfig, tokenizer: &TokenizerConfig) -> Option<PartPackType> {
    let stream = tokenize(&[name], tokenizer);
    let labels: BTreeSet<PartPackType> = stream
        .dedup
        .iter()
        .filter_map(|t| classify(&config.child_tokens, t))
        .collect();
    match labels.len() {
        1 => labels.into_iter().next(),
        _ => None,
    }
}

/// Plan the kit hierarchy for a set of variants.
pub fn backfill_kits(
    variants: &[Variant],
    config: &KitConfig,
    tokenizer: &TokenizerConfig,
    force: bool,
) -> KitBackfill {
    let (nodes, children) = node_table(variants);
    let mut plan = KitBackfill::default();
    let mut desired_parent: HashMap<usize, usize> = HashMap::new();

    for node in &nodes {
        let parent = &variants[node.variant];
        if parent.kind != VariantKind::Folder {
            continue;
        }

        let mut recognized: Vec<(usize, PartPackType)> = Vec::new();
        let mut unrecognized: Vec<usize> = Vec::new();
        for &c in &children[node.variant] {
            let child = &variants[c];
            if child.kind != VariantKind::Folder || !holds_models(variants, &children, c) {
                continue;
            }
            match child_label(child.name(), config, tokenizer) {
                Some(label) => recognized.push((c, label)),
                None => unrecognized.push(c),
            }
        }
        if recognized.len() < config.min_recognized_children {
            continue;
        }

        for c in unrecognized {
            plan.ambiguous.push(AmbiguousChild {
                child_id: variants[c].id.clone(),
                parent_id: parent.id.clone(),
                grouped: config.group_children,
            });
            if config.group_children {
                recognized.push((c, PartPackType::Other));
            }
        }
        recognized.sort_by_key(|(c, _)| *c);

        let child_types: Vec<PartPackType> = recognized
            .iter()
            .map(|(_, label)| *label)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        plan.parents_marked.push(parent.id.clone());
        if !parent.kit.is_kit_container || parent.kit.kit_child_types != child_types {
            plan.writes.push(KitWrite::MarkContainer {
                parent_id: parent.id.clone(),
                child_types,
            });
        }

        for (c, label) in recognized {
            let child = &variants[c];
            desired_parent.insert(c, node.variant);
            plan.children_linked.push(child.id.clone());
            plan.child_labels.insert(child.id.clone(), label);

            if child.kit.parent_id.as_deref() != Some(parent.id.as_str())
                || child.kit.kit_child_label != Some(label)
            {
                plan.writes.push(KitWrite::LinkChild {
                    child_id: child.id.clone(),
                    parent_id: parent.id.clone(),
                    label,
                });
            }

            if child.fields.part_pack_type == Some(label) {
                continue;
            }
            let blocked = child.fields.part_pack_type.is_some()
                || child.is_overridden(Field::PartPackType);
            if blocked && !force {
                plan.part_pack_conflicts.push(child.id.clone());
            } else {
                plan.writes.push(KitWrite::SetPartPackType {
                    child_id: child.id.clone(),
                    value: label,
                });
            }
        }
    }

    let index_of: HashMap<&str, usize> = variants
        .iter()
        .enumerate()
        .map(|(i, v)| (v.id.as_str(), i))
        .collect();
    for (i, variant) in variants.iter().enumerate() {
        let Some(stored) = variant.kit.parent_id.as_deref() else {
            continue;
        };
        let still_supported = index_of
            .get(stored)
            .is_some_and(|p| desired_parent.get(&i) == Some(p));
        if !still_supported {
            plan.stale_links.push(variant.id.clone());
        }
    }

    tracing::info!(
        containers = plan.parents_marked.len(),
        children = plan.children_linked.len(),
        writes = plan.writes.len(),
        ambiguous = plan.ambiguous.len(),
        stale = plan.stale_links.len(),
        "planned kit backfill"
    );
    plan
}

/// Apply one planned write to its variant.
pub fn apply_kit_write(variant: &mut Variant, write: &KitWrite, mode: WriteMode) -> Result<FieldWrite, EngineError> {
    match write {
        KitWrite::MarkContainer { child_types, .. } => {
            if variant.kit.is_kit_container && &variant.kit.kit_child_types == child_types {
                return Ok(FieldWrite::Unchanged);
            }
            variant.kit.is_kit_container = true;
            variant.kit.kit_child_types = child_types.clone();
            Ok(FieldWrite::Written)
        }
        KitWrite::LinkChild {
            parent_id, label, ..
        } => {
            if variant.kit.parent_id.as_ref() == Some(parent_id)
                && variant.kit.kit_child_label == Some(*label)
            {
                return Ok(FieldWrite::Unchanged);
            }
            variant.kit.parent_id = Some(parent_id.clone());
            variant.kit.kit_child_label = Some(*label);
            Ok(FieldWrite::Written)
        }
        KitWrite::SetPartPackType { value, .. } => variant.check_and_set(
            Field::PartPackType,
            Some(FieldValue::text(value.as_str())),
            mode,
        ),
    }
}

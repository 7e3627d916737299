//! The patch language and its validator.
//!
//! A patch is an ordered list of operations. Validation walks the operations
//! against a working copy of the base specification, so each operation sees
//! the state left behind by the ones before it. The first failing operation
//! stops validation. Once every operation has passed, the result must not
//! leave a required input unset that was set before.

use serde::{Deserialize, Serialize};

use specsmith_core::traits::BlockCatalog;
use specsmith_core::types::{ConfigMap, Link, Node, Specification};

use crate::applier::apply_operation;
use crate::model::{link_issue, missing_required_inputs, undeclared_config_fields, ViolationKind};

/// A single edit step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", deny_unknown_fields)]
pub enum Operation {
    AddNode { node: Node },
    RemoveNode { node_id: String },
    /// Shallow merge of `changes` into the node's config.
    ModifyNode { node_id: String, changes: ConfigMap },
    AddLink { link: Link },
    RemoveLink { link: Link },
}

impl Operation {
    /// Grammar name of this operation.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddNode { .. } => "add_node",
            Self::RemoveNode { .. } => "remove_node",
            Self::ModifyNode { .. } => "modify_node",
            Self::AddLink { .. } => "add_link",
            Self::RemoveLink { .. } => "remove_link",
        }
    }
}

/// An ordered list of operations. Order matters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub operations: Vec<Operation>,
}

impl Patch {
    pub fn new(operations: Vec<Operation>) -> Self {
        Self { operations }
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }
}

/// What the oracle says it meant to do. Informational only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatchIntent {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub affected_node_ids: Vec<String>,
}

/// A patch as it arrives from the oracle: operations plus an optional intent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<PatchIntent>,
    pub operations: Vec<Operation>,
}

impl RawPatch {
    pub fn into_patch(self) -> Patch {
        Patch::new(self.operations)
    }
}

/// The first operation of a patch that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("operation {index} ({op}) rejected: {kind}: {reason}")]
pub struct PatchViolation {
    /// Zero-based position of the failing operation.
    pub index: usize,
    pub op: &'static str,
    pub kind: ViolationKind,
    pub reason: String,
}

pub type PatchValidationResult = std::result::Result<(), PatchViolation>;

/// Validate `patch` against `base`, operation by operation, stopping at the
/// first violation. `base` is not modified.
pub fn validate_patch(
    base: &Specification,
    patch: &Patch,
    catalog: &dyn BlockCatalog,
) -> PatchValidationResult {
    let mut working = base.clone();

    for (index, op) in patch.operations.iter().enumerate() {
        if let Some((kind, reason)) = check_operation(&working, op, catalog) {
            return Err(PatchViolation {
                index,
                op: op.name(),
                kind: kind.in_patch(),
                reason,
            });
        }
        apply_operation(&mut working, op);
    }

    let already_missing = missing_required_inputs(base, catalog);
    for (node_id, field) in missing_required_inputs(&working, catalog) {
        if already_missing.contains(&(node_id.clone(), field.clone())) {
            continue;
        }
        // Blame the last operation that touched the node
        let index = patch
            .operations
            .iter()
            .rposition(|op| touches_node(op, &node_id))
            .unwrap_or(patch.len().saturating_sub(1));
        return Err(PatchViolation {
            index,
            op: patch.operations.get(index).map_or("patch", Operation::name),
            kind: ViolationKind::MissingRequiredInput.in_patch(),
            reason: format!(
                "node '{}' is left without required input '{}'; configure it or link it",
                node_id, field
            ),
        });
    }

    Ok(())
}

fn touches_node(op: &Operation, node_id: &str) -> bool {
    match op {
        Operation::AddNode { node } => node.id == node_id,
        Operation::RemoveNode { node_id: id } | Operation::ModifyNode { node_id: id, .. } => {
            id == node_id
        }
        Operation::AddLink { link } | Operation::RemoveLink { link } => link.sink_id == node_id,
    }
}

fn check_operation(
    spec: &Specification,
    op: &Operation,
    catalog: &dyn BlockCatalog,
) -> Option<(ViolationKind, String)> {
    match op {
        Operation::AddNode { node } => check_add_node(spec, node, catalog),
        Operation::RemoveNode { node_id } => {
            if spec.contains_node(node_id) {
                None
            } else {
                Some(unknown_node(node_id))
            }
        }
        Operation::ModifyNode { node_id, changes } => {
            check_modify_node(spec, node_id, changes, catalog)
        }
        Operation::AddLink { link } => check_add_link(spec, link, catalog),
        Operation::RemoveLink { link } => {
            if !spec.contains_node(&link.source_id) {
                Some(unknown_node(&link.source_id))
            } else if !spec.contains_node(&link.sink_id) {
                Some(unknown_node(&link.sink_id))
            } else if !spec.contains_link(link) {
                Some((
                    ViolationKind::MalformedOperation,
                    format!("link {} does not exist", link),
                ))
            } else {
                None
            }
        }
    }
}

fn unknown_node(id: &str) -> (ViolationKind, String) {
    (
        ViolationKind::UnknownNode,
        format!("node '{}' does not exist", id),
    )
}

fn check_add_node(
    spec: &Specification,
    node: &Node,
    catalog: &dyn BlockCatalog,
) -> Option<(ViolationKind, String)> {
    if node.id.trim().is_empty() {
        return Some((
            ViolationKind::MalformedOperation,
            "node id must not be empty".to_string(),
        ));
    }
    if node.block_type.trim().is_empty() {
        return Some((
            ViolationKind::MalformedOperation,
            "block type must not be empty".to_string(),
        ));
    }
    if spec.contains_node(&node.id) {
        return Some((
            ViolationKind::DuplicateNodeId,
            format!("node '{}' already exists", node.id),
        ));
    }
    let Some(block) = catalog.lookup(&node.block_type) else {
        return Some((
            ViolationKind::UnknownBlockType,
            format!("block type '{}' is not in the catalog", node.block_type),
        ));
    };
    undeclared_config_fields(block, &node.config)
        .first()
        .map(|field| {
            (
                ViolationKind::UnknownConfigField,
                format!("block '{}' declares no configuration field '{}'", block.id, field),
            )
        })
}

fn check_modify_node(
    spec: &Specification,
    node_id: &str,
    changes: &ConfigMap,
    catalog: &dyn BlockCatalog,
) -> Option<(ViolationKind, String)> {
    let Some(node) = spec.node(node_id) else {
        return Some(unknown_node(node_id));
    };
    if changes.is_empty() {
        return Some((
            ViolationKind::MalformedOperation,
            "modify_node needs at least one change".to_string(),
        ));
    }
    let Some(block) = catalog.lookup(&node.block_type) else {
        return Some((
            ViolationKind::UnknownBlockType,
            format!("block type '{}' is not in the catalog", node.block_type),
        ));
    };
    undeclared_config_fields(block, changes)
        .first()
        .map(|field| {
            (
                ViolationKind::UnknownConfigField,
                format!("block '{}' declares no configuration field '{}'", block.id, field),
            )
        })
}

fn check_add_link(
    spec: &Specification,
    link: &Link,
    catalog: &dyn BlockCatalog,
) -> Option<(ViolationKind, String)> {
    if link.source_port.trim().is_empty() || link.sink_port.trim().is_empty() {
        return Some((
            ViolationKind::MalformedOperation,
            "link ports must not be empty".to_string(),
        ));
    }
    if let Some(issue) = link_issue(spec, catalog, link) {
        return Some(issue);
    }
    if spec.contains_link(link) {
        return Some((
            ViolationKind::DuplicateLink,
            format!("link {} already exists", link),
        ));
    }

    // link_issue has already resolved the sink's block and port
    let multi = spec
        .node(&link.sink_id)
        .and_then(|n| catalog.lookup(&n.block_type))
        .and_then(|b| b.input(&link.sink_port))
        .map(|p| p.multi_input)
        .unwrap_or(false);
    if !multi {
        if let Some(existing) = spec.incoming(&link.sink_id, &link.sink_port).next() {
            return Some((
                ViolationKind::FanInViolation,
                format!(
                    "input port {}.{} already fed by {}",
                    link.sink_id, link.sink_port, existing
                ),
            ));
        }
    }
    None
}

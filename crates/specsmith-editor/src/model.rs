//! Whole-document validation of a [`Specification`] against a block catalog.

use std::collections::HashSet;

use serde::Serialize;

use specsmith_core::catalog::BlockSchema;
use specsmith_core::traits::BlockCatalog;
use specsmith_core::types::{ConfigMap, Link, Specification};

/// What kind of structural rule was broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    UnknownBlockType,
    UnknownNode,
    DuplicateNodeId,
    IncompatiblePort,
    FanInViolation,
    MalformedOperation,
    /// Document-level only. Inside a patch this surfaces as `MalformedOperation`.
    UnknownConfigField,
    /// Document-level only. Inside a patch this surfaces as `MalformedOperation`.
    DuplicateLink,
    /// A required field is neither configured nor fed by a link. Inside a
    /// patch this surfaces as `MalformedOperation`.
    MissingRequiredInput,
}

impl ViolationKind {
    /// The kind reported when the same problem is found in a patch operation.
    pub fn in_patch(self) -> Self {
        match self {
            Self::UnknownConfigField | Self::DuplicateLink | Self::MissingRequiredInput => {
                Self::MalformedOperation
            }
            other => other,
        }
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::UnknownBlockType => "UnknownBlockType",
            Self::UnknownNode => "UnknownNode",
            Self::DuplicateNodeId => "DuplicateNodeId",
            Self::IncompatiblePort => "IncompatiblePort",
            Self::FanInViolation => "FanInViolation",
            Self::MalformedOperation => "MalformedOperation",
            Self::UnknownConfigField => "UnknownConfigField",
            Self::DuplicateLink => "DuplicateLink",
            Self::MissingRequiredInput => "MissingRequiredInput",
        };
        f.write_str(s)
    }
}

/// Where in the document a violation was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "at", rename_all = "snake_case")]
pub enum Location {
    Node { node_id: String },
    Config { node_id: String, field: String },
    Link { link: Link },
    InputPort { node_id: String, port: String },
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Node { node_id } => write!(f, "node '{}'", node_id),
            Self::Config { node_id, field } => write!(f, "node '{}' config '{}'", node_id, field),
            Self::Link { link } => write!(f, "link {}", link),
            Self::InputPort { node_id, port } => write!(f, "input port {}.{}", node_id, port),
        }
    }
}

/// One broken rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub location: Location,
    pub kind: ViolationKind,
    pub reason: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}: {}", self.kind, self.location, self.reason)
    }
}

/// Result of validating a whole specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    Invalid { violations: Vec<Violation> },
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    pub fn violations(&self) -> &[Violation] {
        match self {
            Self::Valid => &[],
            Self::Invalid { violations } => violations,
        }
    }
}

/// Check every structural invariant of `spec` and report all violations.
///
/// Link checks that need a block schema are skipped for endpoints whose node
/// or block type is already reported as missing.
pub fn validate(spec: &Specification, catalog: &dyn BlockCatalog) -> ValidationResult {
    let mut violations = Vec::new();

    // Nodes: unique ids, known block types, declared config fields
    let mut seen_ids = HashSet::new();
    for node in &spec.nodes {
        if !seen_ids.insert(node.id.as_str()) {
            violations.push(Violation {
                location: Location::Node {
                    node_id: node.id.clone(),
                },
                kind: ViolationKind::DuplicateNodeId,
                reason: format!("node id '{}' appears more than once", node.id),
            });
            continue;
        }

        match catalog.lookup(&node.block_type) {
            None => violations.push(Violation {
                location: Location::Node {
                    node_id: node.id.clone(),
                },
                kind: ViolationKind::UnknownBlockType,
                reason: format!("block type '{}' is not in the catalog", node.block_type),
            }),
            Some(block) => {
                for field in undeclared_config_fields(block, &node.config) {
                    violations.push(Violation {
                        location: Location::Config {
                            node_id: node.id.clone(),
                            field: field.to_string(),
                        },
                        kind: ViolationKind::UnknownConfigField,
                        reason: format!(
                            "block '{}' declares no configuration field '{}'",
                            block.id, field
                        ),
                    });
                }
            }
        }
    }

    for (node_id, field) in missing_required_inputs(spec, catalog) {
        let reason = format!("required input '{}' is neither configured nor linked", field);
        violations.push(Violation {
            location: Location::Config { node_id, field },
            kind: ViolationKind::MissingRequiredInput,
            reason,
        });
    }

    // Links: endpoints, ports, duplicates
    let mut seen_links = HashSet::new();
    for link in &spec.links {
        if !seen_links.insert(link) {
            violations.push(Violation {
                location: Location::Link { link: link.clone() },
                kind: ViolationKind::DuplicateLink,
                reason: "link appears more than once".to_string(),
            });
            continue;
        }
        if let Some((kind, reason)) = link_issue(spec, catalog, link) {
            violations.push(Violation {
                location: Location::Link { link: link.clone() },
                kind,
                reason,
            });
        }
    }

    // Fan-in: one report per overloaded input port
    let mut checked_ports = HashSet::new();
    for link in &spec.links {
        let key = (link.sink_id.as_str(), link.sink_port.as_str());
        if !checked_ports.insert(key) {
            continue;
        }
        let Some(port) = spec
            .node(&link.sink_id)
            .and_then(|n| catalog.lookup(&n.block_type))
            .and_then(|b| b.input(&link.sink_port))
        else {
            continue;
        };
        let distinct: HashSet<&Link> = spec.incoming(&link.sink_id, &link.sink_port).collect();
        if !port.multi_input && distinct.len() > 1 {
            violations.push(Violation {
                location: Location::InputPort {
                    node_id: link.sink_id.clone(),
                    port: link.sink_port.clone(),
                },
                kind: ViolationKind::FanInViolation,
                reason: format!(
                    "input port accepts one link but has {}",
                    distinct.len()
                ),
            });
        }
    }

    if violations.is_empty() {
        ValidationResult::Valid
    } else {
        ValidationResult::Invalid { violations }
    }
}

/// Config fields of a node that its block does not declare, in key order.
pub(crate) fn undeclared_config_fields<'a>(
    block: &BlockSchema,
    config: &'a ConfigMap,
) -> Vec<&'a str> {
    config
        .keys()
        .filter(|k| !block.has_config_field(k))
        .map(String::as_str)
        .collect()
}

/// Supplied by the platform at run time, never part of a specification.
const PLATFORM_SUPPLIED_INPUT: &str = "credentials";

/// `(node_id, field)` for every required config field that is neither set in
/// the node's config nor fed by an incoming link on a port of the same name.
/// Nodes with unknown block types and repeated ids are skipped.
pub(crate) fn missing_required_inputs(
    spec: &Specification,
    catalog: &dyn BlockCatalog,
) -> Vec<(String, String)> {
    let mut missing = Vec::new();
    let mut seen = HashSet::new();
    for node in &spec.nodes {
        if !seen.insert(node.id.as_str()) {
            continue;
        }
        let Some(block) = catalog.lookup(&node.block_type) else {
            continue;
        };
        for field in block.config_fields.iter().filter(|f| f.required) {
            if field.name == PLATFORM_SUPPLIED_INPUT
                || node.config.contains_key(&field.name)
                || spec.incoming(&node.id, &field.name).next().is_some()
            {
                continue;
            }
            missing.push((node.id.clone(), field.name.clone()));
        }
    }
    missing
}

/// Endpoint, block-type and port compatibility check for one link against
/// the given graph state. Fan-in is checked separately.
pub(crate) fn link_issue(
    spec: &Specification,
    catalog: &dyn BlockCatalog,
    link: &Link,
) -> Option<(ViolationKind, String)> {
    let Some(source) = spec.node(&link.source_id) else {
        return Some((
            ViolationKind::UnknownNode,
            format!("source node '{}' does not exist", link.source_id),
        ));
    };
    let Some(sink) = spec.node(&link.sink_id) else {
        return Some((
            ViolationKind::UnknownNode,
            format!("sink node '{}' does not exist", link.sink_id),
        ));
    };

    let Some(source_block) = catalog.lookup(&source.block_type) else {
        return Some((
            ViolationKind::UnknownBlockType,
            format!("block type '{}' is not in the catalog", source.block_type),
        ));
    };
    let Some(sink_block) = catalog.lookup(&sink.block_type) else {
        return Some((
            ViolationKind::UnknownBlockType,
            format!("block type '{}' is not in the catalog", sink.block_type),
        ));
    };

    port_issue(link, source_block, sink_block).map(|r| (ViolationKind::IncompatiblePort, r))
}

/// Port-name and data-type compatibility of a link between two blocks.
fn port_issue(link: &Link, source: &BlockSchema, sink: &BlockSchema) -> Option<String> {
    let Some(out) = source.output(&link.source_port) else {
        return Some(format!(
            "block '{}' has no output port '{}'",
            source.id, link.source_port
        ));
    };
    let Some(input) = sink.input(&link.sink_port) else {
        return Some(format!(
            "block '{}' has no input port '{}'",
            sink.id, link.sink_port
        ));
    };
    if !out.feeds(input) {
        return Some(format!(
            "output '{}' ({}) cannot feed input '{}' ({})",
            out.name,
            out.data_type.as_deref().unwrap_or("untyped"),
            input.name,
            input.data_type.as_deref().unwrap_or("untyped"),
        ));
    }
    None
}

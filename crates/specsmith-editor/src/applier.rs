//! Applying validated patches and describing what changed.

use std::collections::HashSet;

use serde::Serialize;

use specsmith_core::types::{Link, Node, Specification};

use crate::patch::{Operation, Patch};

/// A node that exists on both sides but is not identical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeChange {
    pub node_id: String,
    /// Config fields whose value differs, in sorted order.
    pub fields: Vec<String>,
    /// `block_type` differs.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub retyped: bool,
    /// `position` differs.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub moved: bool,
}

/// Structural difference between a base specification and its patched result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffReport {
    pub added_nodes: Vec<String>,
    pub removed_nodes: Vec<String>,
    pub modified_nodes: Vec<NodeChange>,
    pub added_links: Vec<Link>,
    pub removed_links: Vec<Link>,
}

impl DiffReport {
    /// Compare two specifications by node id and link identity.
    pub fn between(before: &Specification, after: &Specification) -> Self {
        let mut report = Self::default();

        for node in &after.nodes {
            match before.node(&node.id) {
                None => report.added_nodes.push(node.id.clone()),
                Some(old) if old != node => report.modified_nodes.push(NodeChange {
                    node_id: node.id.clone(),
                    fields: changed_fields(old, node),
                    retyped: old.block_type != node.block_type,
                    moved: old.position != node.position,
                }),
                Some(_) => {}
            }
        }
        for node in &before.nodes {
            if !after.contains_node(&node.id) {
                report.removed_nodes.push(node.id.clone());
            }
        }

        let old_links: HashSet<&Link> = before.links.iter().collect();
        let new_links: HashSet<&Link> = after.links.iter().collect();
        report.added_links = after
            .links
            .iter()
            .filter(|l| !old_links.contains(l))
            .cloned()
            .collect();
        report.removed_links = before
            .links
            .iter()
            .filter(|l| !new_links.contains(l))
            .cloned()
            .collect();

        report
    }

    pub fn is_empty(&self) -> bool {
        self.added_nodes.is_empty()
            && self.removed_nodes.is_empty()
            && self.modified_nodes.is_empty()
            && self.added_links.is_empty()
            && self.removed_links.is_empty()
    }

    /// One-line human summary, e.g. `+1 node, ~2 nodes, -1 link`.
    pub fn summary(&self) -> String {
        fn part(out: &mut Vec<String>, sign: char, n: usize, what: &str) {
            if n > 0 {
                let plural = if n == 1 { "" } else { "s" };
                out.push(format!("{}{} {}{}", sign, n, what, plural));
            }
        }

        let mut parts = Vec::new();
        part(&mut parts, '+', self.added_nodes.len(), "node");
        part(&mut parts, '-', self.removed_nodes.len(), "node");
        part(&mut parts, '~', self.modified_nodes.len(), "node");
        part(&mut parts, '+', self.added_links.len(), "link");
        part(&mut parts, '-', self.removed_links.len(), "link");

        if parts.is_empty() {
            "no changes".to_string()
        } else {
            parts.join(", ")
        }
    }
}

fn changed_fields(old: &Node, new: &Node) -> Vec<String> {
    let mut fields: Vec<String> = old
        .config
        .keys()
        .chain(new.config.keys())
        .filter(|k| old.config.get(*k) != new.config.get(*k))
        .cloned()
        .collect();
    fields.sort();
    fields.dedup();
    fields
}

/// A patched specification together with its diff against the base.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub spec: Specification,
    pub report: DiffReport,
}

/// Apply one operation in place. The caller is responsible for having
/// validated it against `spec`.
pub(crate) fn apply_operation(spec: &mut Specification, op: &Operation) {
    match op {
        Operation::AddNode { node } => spec.nodes.push(node.clone()),
        Operation::RemoveNode { node_id } => {
            spec.nodes.retain(|n| &n.id != node_id);
            spec.links.retain(|l| !l.touches(node_id));
        }
        Operation::ModifyNode { node_id, changes } => {
            if let Some(node) = spec.nodes.iter_mut().find(|n| &n.id == node_id) {
                for (field, value) in changes {
                    node.config.insert(field.clone(), value.clone());
                }
            }
        }
        Operation::AddLink { link } => spec.links.push(link.clone()),
        Operation::RemoveLink { link } => spec.links.retain(|l| l != link),
    }
}

/// Apply a validated patch to `base`, producing a new specification.
///
/// `base` is never modified. Operations run in order; everything the patch
/// does not mention is carried over unchanged, including metadata and the
/// relative order of surviving nodes and links.
pub fn apply(base: &Specification, patch: &Patch) -> Applied {
    let mut spec = base.clone();
    for op in &patch.operations {
        apply_operation(&mut spec, op);
    }
    let report = DiffReport::between(base, &spec);
    Applied { spec, report }
}

/// Check that `after` differs from `before` only where `patch` says it may.
///
/// Untouched nodes must be identical and keep their relative order, metadata
/// must be unchanged, and links outside the patch must survive unless a
/// removed node took them along. Returns a description of the first breach.
pub fn verify_preservation(
    before: &Specification,
    after: &Specification,
    patch: &Patch,
) -> Result<(), String> {
    if before.metadata != after.metadata {
        return Err("metadata changed".to_string());
    }
    if before.extra != after.extra {
        return Err("document keys outside nodes and links changed".to_string());
    }

    let mut touched_nodes: HashSet<&str> = HashSet::new();
    let mut removed_nodes: HashSet<&str> = HashSet::new();
    let mut touched_links: HashSet<&Link> = HashSet::new();
    for op in &patch.operations {
        match op {
            Operation::AddNode { node } => {
                touched_nodes.insert(&node.id);
            }
            Operation::RemoveNode { node_id } => {
                touched_nodes.insert(node_id);
                removed_nodes.insert(node_id);
            }
            Operation::ModifyNode { node_id, .. } => {
                touched_nodes.insert(node_id);
            }
            Operation::AddLink { link } | Operation::RemoveLink { link } => {
                touched_links.insert(link);
            }
        }
    }

    for node in &after.nodes {
        if !touched_nodes.contains(node.id.as_str()) && !before.contains_node(&node.id) {
            return Err(format!("node '{}' appeared without an operation", node.id));
        }
    }

    let untouched = |spec: &Specification| -> Vec<Node> {
        spec.nodes
            .iter()
            .filter(|n| !touched_nodes.contains(n.id.as_str()))
            .cloned()
            .collect()
    };
    if untouched(before) != untouched(after) {
        return Err("a node outside the patch was changed, dropped or reordered".to_string());
    }

    let kept = |l: &&Link| {
        !touched_links.contains(*l)
            && !removed_nodes.contains(l.source_id.as_str())
            && !removed_nodes.contains(l.sink_id.as_str())
    };
    let before_links: Vec<&Link> = before.links.iter().filter(kept).collect();
    let after_links: Vec<&Link> = after.links.iter().filter(kept).collect();
    if before_links != after_links {
        return Err("a link outside the patch was changed, dropped or reordered".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use specsmith_core::types::ConfigMap;
    use specsmith_test_utils::sample_spec;

    fn changes(pairs: &[(&str, serde_json::Value)]) -> ConfigMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_empty_patch_is_identity() {
        let base = sample_spec();
        let applied = apply(&base, &Patch::default());
        assert_eq!(applied.spec, base);
        assert!(applied.report.is_empty());
        assert_eq!(applied.report.summary(), "no changes");
    }

    #[test]
    fn test_add_node_appends() {
        let base = sample_spec();
        let patch = Patch::new(vec![Operation::AddNode {
            node: Node::new("extra", "TextInput"),
        }]);
        let applied = apply(&base, &patch);
        assert_eq!(applied.spec.nodes.last().unwrap().id, "extra");
        assert_eq!(applied.report.added_nodes, vec!["extra".to_string()]);
        assert_eq!(applied.report.summary(), "+1 node");
    }

    #[test]
    fn test_remove_node_drops_its_links() {
        let base = sample_spec();
        let patch = Patch::new(vec![Operation::RemoveNode {
            node_id: "summarize".into(),
        }]);
        let applied = apply(&base, &patch);
        assert!(!applied.spec.contains_node("summarize"));
        assert!(applied.spec.links.iter().all(|l| !l.touches("summarize")));
        assert_eq!(applied.report.removed_nodes, vec!["summarize".to_string()]);
        assert_eq!(applied.report.removed_links.len(), base.links.len());
        assert!(verify_preservation(&base, &applied.spec, &patch).is_ok());
    }

    #[test]
    fn test_modify_node_merges_changes() {
        let base = sample_spec();
        let patch = Patch::new(vec![Operation::ModifyNode {
            node_id: "summarize".into(),
            changes: changes(&[("max_words", json!(50))]),
        }]);
        let applied = apply(&base, &patch);
        let node = applied.spec.node("summarize").unwrap();
        assert_eq!(node.config.get("max_words"), Some(&json!(50)));
        // Fields not named in the change are left alone
        assert_eq!(
            node.config.get("style"),
            base.node("summarize").unwrap().config.get("style")
        );
        assert_eq!(
            applied.report.modified_nodes,
            vec![NodeChange {
                node_id: "summarize".into(),
                fields: vec!["max_words".into()],
                retyped: false,
                moved: false,
            }]
        );
    }

    #[test]
    fn test_readded_node_with_new_position_is_modified() {
        let base = sample_spec();
        let old = base.node("output").unwrap().clone();
        let patch = Patch::new(vec![
            Operation::RemoveNode {
                node_id: "output".into(),
            },
            Operation::AddNode {
                node: Node {
                    position: Some(json!({"x": 900, "y": 50})),
                    ..old
                },
            },
        ]);
        let applied = apply(&base, &patch);
        assert_eq!(
            applied.report.modified_nodes,
            vec![NodeChange {
                node_id: "output".into(),
                fields: vec![],
                retyped: false,
                moved: true,
            }]
        );
        assert_eq!(applied.report.summary(), "~1 node, -1 link");

        let retyped = Patch::new(vec![
            Operation::RemoveNode {
                node_id: "output".into(),
            },
            Operation::AddNode {
                node: Node::new("output", "Counter").with_position(400, 0),
            },
        ]);
        let change = &apply(&base, &retyped).report.modified_nodes[0];
        assert!(change.retyped);
        assert!(!change.moved);
    }

    #[test]
    fn test_base_is_not_mutated() {
        let base = sample_spec();
        let snapshot = base.clone();
        let patch = Patch::new(vec![
            Operation::RemoveNode {
                node_id: "input".into(),
            },
            Operation::AddNode {
                node: Node::new("input", "TextInput"),
            },
        ]);
        let _ = apply(&base, &patch);
        assert_eq!(base, snapshot);
    }

    #[test]
    fn test_operations_apply_in_order() {
        let base = sample_spec();
        let link = Link::new("input", "result", "summarize", "text");
        let patch = Patch::new(vec![
            Operation::RemoveLink { link: link.clone() },
            Operation::AddLink { link: link.clone() },
        ]);
        let applied = apply(&base, &patch);
        assert!(applied.spec.contains_link(&link));
        // Re-added at the end; the set of links is unchanged
        assert!(applied.report.added_links.is_empty());
        assert!(applied.report.removed_links.is_empty());
    }

    #[test]
    fn test_preservation_detects_stray_change() {
        let base = sample_spec();
        let patch = Patch::new(vec![Operation::ModifyNode {
            node_id: "summarize".into(),
            changes: changes(&[("max_words", json!(10))]),
        }]);
        let mut tampered = apply(&base, &patch).spec;
        tampered.nodes[0].config.insert("value".into(), json!("tampered"));
        let err = verify_preservation(&base, &tampered, &patch).unwrap_err();
        assert!(err.contains("node outside the patch"));

        let mut renamed = apply(&base, &patch).spec;
        renamed.metadata.name = "other".into();
        assert_eq!(
            verify_preservation(&base, &renamed, &patch).unwrap_err(),
            "metadata changed"
        );
    }

    #[test]
    fn test_preservation_detects_document_key_change() {
        let mut base = sample_spec();
        base.extra.insert("id".into(), json!("graph-1"));
        let mut after = base.clone();
        after.extra.remove("id");
        assert_eq!(
            verify_preservation(&base, &after, &Patch::default()).unwrap_err(),
            "document keys outside nodes and links changed"
        );
    }

    #[test]
    fn test_preservation_detects_lost_link() {
        let base = sample_spec();
        let patch = Patch::default();
        let mut after = base.clone();
        after.links.pop();
        assert!(verify_preservation(&base, &after, &patch).is_err());
    }

    #[test]
    fn test_preservation_detects_phantom_node() {
        let base = sample_spec();
        let after = base.clone().with_node(Node::new("phantom", "TextInput"));
        let err = verify_preservation(&base, &after, &Patch::default()).unwrap_err();
        assert!(err.contains("phantom"));
    }

    #[test]
    fn test_summary_pluralizes() {
        let report = DiffReport {
            added_nodes: vec!["a".into(), "b".into()],
            removed_links: vec![Link::new("a", "o", "b", "i")],
            ..Default::default()
        };
        assert_eq!(report.summary(), "+2 nodes, -1 link");
    }
}

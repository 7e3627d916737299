use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Free-form configuration / property bag. Keys are kept in a stable order.
pub type ConfigMap = serde_json::Map<String, serde_json::Value>;

/// An agent specification: a directed graph of typed nodes plus opaque metadata.
///
/// Specifications are values. Editing never mutates one in place; every
/// applied patch yields a fresh `Specification`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Specification {
    #[serde(default)]
    pub metadata: SpecMetadata,
    /// Nodes in document order. Ids are expected to be unique; duplicates are
    /// representable so that validation can report them.
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Links, treated as a set keyed by link identity.
    #[serde(default)]
    pub links: Vec<Link>,
    /// Any other top-level keys of the document, carried through untouched.
    #[serde(flatten)]
    pub extra: ConfigMap,
}

/// Specification metadata. Opaque to the editor and preserved verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub properties: ConfigMap,
    /// Keys other than the ones above, kept as written.
    #[serde(flatten)]
    pub extra: ConfigMap,
}

/// A single processing node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Node {
    pub id: String,
    /// Block type identifier, resolved against the block catalog.
    pub block_type: String,
    /// Static configuration: field name -> value.
    #[serde(default)]
    pub config: ConfigMap,
    /// Canvas position. Opaque, never validated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<serde_json::Value>,
}

impl Node {
    pub fn new(id: impl Into<String>, block_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            block_type: block_type.into(),
            config: ConfigMap::new(),
            position: None,
        }
    }

    /// Set one configuration field.
    pub fn with_config(mut self, field: impl Into<String>, value: serde_json::Value) -> Self {
        self.config.insert(field.into(), value);
        self
    }

    /// Set the canvas position.
    pub fn with_position(mut self, x: i64, y: i64) -> Self {
        self.position = Some(serde_json::json!({ "x": x, "y": y }));
        self
    }
}

/// A directed link from an output port to an input port.
///
/// The four fields together are the link's identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Link {
    pub source_id: String,
    pub source_port: String,
    pub sink_id: String,
    pub sink_port: String,
}

impl Link {
    pub fn new(
        source_id: impl Into<String>,
        source_port: impl Into<String>,
        sink_id: impl Into<String>,
        sink_port: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            source_port: source_port.into(),
            sink_id: sink_id.into(),
            sink_port: sink_port.into(),
        }
    }

    /// Whether either endpoint is the given node.
    pub fn touches(&self, node_id: &str) -> bool {
        self.source_id == node_id || self.sink_id == node_id
    }
}

impl std::fmt::Display for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{} -> {}.{}",
            self.source_id, self.source_port, self.sink_id, self.sink_port
        )
    }
}

impl Specification {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            metadata: SpecMetadata {
                name: name.into(),
                description: description.into(),
                properties: ConfigMap::new(),
                extra: ConfigMap::new(),
            },
            nodes: vec![],
            links: vec![],
            extra: ConfigMap::new(),
        }
    }

    /// Append a node (builder style).
    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Append a link (builder style).
    pub fn with_link(mut self, link: Link) -> Self {
        self.links.push(link);
        self
    }

    /// Look up a node by id (first match).
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }

    pub fn contains_link(&self, link: &Link) -> bool {
        self.links.iter().any(|l| l == link)
    }

    /// Links ending at the given input port.
    pub fn incoming<'a>(&'a self, sink_id: &'a str, sink_port: &'a str) -> impl Iterator<Item = &'a Link> {
        self.links
            .iter()
            .filter(move |l| l.sink_id == sink_id && l.sink_port == sink_port)
    }

    /// Distinct block types used by this specification, in first-use order.
    pub fn block_types(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for node in &self.nodes {
            if !seen.contains(&node.block_type.as_str()) {
                seen.push(node.block_type.as_str());
            }
        }
        seen
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

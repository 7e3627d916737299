use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpecsmithError};
use crate::traits::BlockCatalog;

/// Schema of one block type: its ports and configuration fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSchema {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub inputs: Vec<PortSchema>,
    #[serde(default)]
    pub outputs: Vec<PortSchema>,
    #[serde(default)]
    pub config_fields: Vec<ConfigField>,
}

/// An input or output port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortSchema {
    pub name: String,
    /// JSON-schema style type name (`string`, `integer`, ...). `None` = untyped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    /// Input ports only: accepts more than one incoming link.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub multi_input: bool,
}

/// A static configuration field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigField {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl PortSchema {
    pub fn new(name: impl Into<String>, data_type: Option<&str>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.map(str::to_string),
            multi_input: false,
        }
    }

    /// Mark this input port as accepting multiple links.
    pub fn multi(mut self) -> Self {
        self.multi_input = true;
        self
    }

    /// Whether data flowing out of `self` may flow into `sink`.
    ///
    /// Untyped or `any` ports accept everything; `integer` and `number` are
    /// interchangeable; otherwise the type names must match.
    pub fn feeds(&self, sink: &PortSchema) -> bool {
        match (self.data_type.as_deref(), sink.data_type.as_deref()) {
            (None, _) | (_, None) => true,
            (Some("any"), _) | (_, Some("any")) => true,
            (Some(a), Some(b)) if is_numeric(a) && is_numeric(b) => true,
            (Some(a), Some(b)) => a == b,
        }
    }
}

fn is_numeric(t: &str) -> bool {
    t == "integer" || t == "number"
}

impl ConfigField {
    pub fn new(name: impl Into<String>, data_type: Option<&str>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.map(str::to_string),
            required: false,
            description: String::new(),
        }
    }

    /// Mark this field as one every node of the block must configure or link.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

impl BlockSchema {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            inputs: vec![],
            outputs: vec![],
            config_fields: vec![],
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_input(mut self, port: PortSchema) -> Self {
        self.inputs.push(port);
        self
    }

    pub fn with_output(mut self, port: PortSchema) -> Self {
        self.outputs.push(port);
        self
    }

    pub fn with_config_field(mut self, field: ConfigField) -> Self {
        self.config_fields.push(field);
        self
    }

    pub fn input(&self, name: &str) -> Option<&PortSchema> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&PortSchema> {
        self.outputs.iter().find(|p| p.name == name)
    }

    pub fn has_config_field(&self, name: &str) -> bool {
        self.config_fields.iter().any(|f| f.name == name)
    }
}

/// In-memory block catalog. Immutable once built; refreshing means building a
/// new one and swapping it in.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    blocks: Vec<BlockSchema>,
    index: HashMap<String, usize>,
}

impl StaticCatalog {
    /// Build a catalog. Later duplicates of a block id replace earlier ones.
    pub fn new(blocks: Vec<BlockSchema>) -> Self {
        let mut catalog = Self::default();
        for block in blocks {
            match catalog.index.get(&block.id) {
                Some(&i) => catalog.blocks[i] = block,
                None => {
                    catalog.index.insert(block.id.clone(), catalog.blocks.len());
                    catalog.blocks.push(block);
                }
            }
        }
        catalog
    }

    /// Parse a JSON array of block schemas.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let blocks: Vec<BlockSchema> = serde_json::from_str(s)
            .map_err(|e| SpecsmithError::Catalog(format!("invalid catalog JSON: {}", e)))?;
        Ok(Self::new(blocks))
    }

    /// Load a JSON catalog file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SpecsmithError::Catalog(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> &[BlockSchema] {
        &self.blocks
    }
}

impl BlockCatalog for StaticCatalog {
    fn lookup(&self, block_type: &str) -> Option<&BlockSchema> {
        self.index.get(block_type).map(|&i| &self.blocks[i])
    }

    fn all(&self) -> Vec<&BlockSchema> {
        self.blocks.iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_compatibility() {
        let s = PortSchema::new("o", Some("string"));
        let i = PortSchema::new("o", Some("integer"));
        let n = PortSchema::new("o", Some("number"));
        let untyped = PortSchema::new("o", None);
        let any = PortSchema::new("o", Some("any"));

        assert!(s.feeds(&s));
        assert!(!s.feeds(&i));
        assert!(i.feeds(&n));
        assert!(n.feeds(&i));
        assert!(untyped.feeds(&i));
        assert!(s.feeds(&untyped));
        assert!(any.feeds(&i));
    }

    #[test]
    fn test_catalog_lookup_and_order() {
        let catalog = StaticCatalog::new(vec![
            BlockSchema::new("B"),
            BlockSchema::new("A"),
        ]);
        assert_eq!(catalog.len(), 2);
        assert!(catalog.lookup("A").is_some());
        assert!(catalog.lookup("C").is_none());
        let ids: Vec<_> = catalog.all().iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["B", "A"]);
    }

    #[test]
    fn test_catalog_duplicate_replaces() {
        let catalog = StaticCatalog::new(vec![
            BlockSchema::new("A").with_description("old"),
            BlockSchema::new("A").with_description("new"),
        ]);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.lookup("A").unwrap().description, "new");
    }

    #[test]
    fn test_catalog_from_json() {
        let json = r#"[{
            "id": "Join",
            "inputs": [{"name": "parts", "data_type": "string", "multi_input": true}],
            "outputs": [{"name": "joined", "data_type": "string"}],
            "config_fields": [{"name": "separator", "data_type": "string"}]
        }]"#;
        let catalog = StaticCatalog::from_json_str(json).unwrap();
        let join = catalog.lookup("Join").unwrap();
        assert!(join.input("parts").unwrap().multi_input);
        assert!(join.output("joined").is_some());
        assert!(join.has_config_field("separator"));
        assert!(!join.config_fields[0].required);
    }

    #[test]
    fn test_catalog_from_invalid_json() {
        let err = StaticCatalog::from_json_str("{not a list}").unwrap_err();
        assert!(matches!(err, SpecsmithError::Catalog(_)));
    }
}

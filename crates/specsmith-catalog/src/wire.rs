use serde_json::Value;

use specsmith_core::catalog::{BlockSchema, ConfigField, PortSchema};
use specsmith_core::error::{Result, SpecsmithError};

/// Decode a catalog document: a JSON array of blocks, each either in the
/// native schema format or in the platform's JSON-schema format
/// (`inputSchema` / `outputSchema`).
pub fn parse_blocks(value: &Value) -> Result<Vec<BlockSchema>> {
    let entries = value
        .as_array()
        .ok_or_else(|| SpecsmithError::Catalog("catalog document must be a JSON array".into()))?;

    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            if entry.get("inputSchema").is_some() || entry.get("outputSchema").is_some() {
                from_platform(entry)
            } else {
                serde_json::from_value(entry.clone())
                    .map_err(|e| SpecsmithError::Catalog(format!("block #{}: {}", i, e)))
            }
        })
        .collect()
}

/// Convert one platform block. Every input property becomes both an input
/// port and a config field; every output property becomes an output port.
fn from_platform(entry: &Value) -> Result<BlockSchema> {
    let id = entry
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| SpecsmithError::Catalog("platform block without an id".into()))?;

    let mut block = BlockSchema::new(id);
    if let Some(name) = entry.get("name").and_then(Value::as_str) {
        block.name = name.to_string();
    }
    if let Some(description) = entry.get("description").and_then(Value::as_str) {
        block.description = description.to_string();
    }

    if let Some(schema) = entry.get("inputSchema") {
        let required: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        for (name, prop) in properties(schema) {
            let data_type = property_type(prop);
            block.inputs.push(PortSchema::new(name, data_type));
            block.config_fields.push(ConfigField {
                name: name.to_string(),
                data_type: data_type.map(str::to_string),
                required: required.contains(&name.as_str()),
                description: prop
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            });
        }
    }

    if let Some(schema) = entry.get("outputSchema") {
        for (name, prop) in properties(schema) {
            block.outputs.push(PortSchema::new(name, property_type(prop)));
        }
    }

    Ok(block)
}

fn properties(schema: &Value) -> impl Iterator<Item = (&String, &Value)> {
    schema
        .get("properties")
        .and_then(Value::as_object)
        .into_iter()
        .flatten()
}

/// `type`, or the first non-null type of an `anyOf` union.
fn property_type(prop: &Value) -> Option<&str> {
    if let Some(t) = prop.get("type").and_then(Value::as_str) {
        return Some(t);
    }
    prop.get("anyOf")
        .and_then(Value::as_array)?
        .iter()
        .filter_map(|v| v.get("type").and_then(Value::as_str))
        .find(|t| *t != "null")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_platform_block() {
        let doc = json!([{
            "id": "a1b2",
            "name": "StoreValueBlock",
            "description": "Stores a value",
            "inputSchema": {
                "properties": {
                    "input": {"type": "string", "description": "Value to store"},
                    "data": {"anyOf": [{"type": "null"}, {"type": "object"}]},
                    "anything": {}
                },
                "required": ["input"]
            },
            "outputSchema": {
                "properties": {"output": {"type": "string"}}
            },
            "staticOutput": true
        }]);
        let blocks = parse_blocks(&doc).unwrap();
        let block = &blocks[0];

        assert_eq!(block.id, "a1b2");
        assert_eq!(block.name, "StoreValueBlock");
        assert_eq!(block.input("input").unwrap().data_type.as_deref(), Some("string"));
        assert_eq!(block.input("data").unwrap().data_type.as_deref(), Some("object"));
        assert!(block.input("anything").unwrap().data_type.is_none());
        assert_eq!(block.output("output").unwrap().data_type.as_deref(), Some("string"));

        let input_field = block.config_fields.iter().find(|f| f.name == "input").unwrap();
        assert!(input_field.required);
        assert_eq!(input_field.description, "Value to store");
        assert!(!block.config_fields.iter().find(|f| f.name == "data").unwrap().required);
    }

    #[test]
    fn test_native_and_platform_mixed() {
        let doc = json!([
            {"id": "Native", "outputs": [{"name": "o", "data_type": "string"}]},
            {"id": "Remote", "outputSchema": {"properties": {"o": {"type": "integer"}}}}
        ]);
        let blocks = parse_blocks(&doc).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].name, "");
        assert_eq!(blocks[1].name, "Remote");
        assert!(blocks[1].inputs.is_empty());
    }

    #[test]
    fn test_rejects_bad_documents() {
        assert!(parse_blocks(&json!({"blocks": []})).is_err());
        assert!(parse_blocks(&json!([{"inputSchema": {}}])).is_err());
        assert!(parse_blocks(&json!([{"name": "no id"}])).is_err());
    }
}

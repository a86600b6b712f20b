//! Translation of collection JSON schemas into Elasticsearch index mappings.

use materialize_config::shared::FieldOverride;
use serde_json::{Map, Value, json};
use thiserror::Error;

const MULTIPLE_OR_UNSPECIFIED_TYPES: &str =
    "multiple non-trivial data types or unspecified data types";
const NOT_OBJECT_OR_ARRAY: &str = "data types other than objects or arrays of objects";
const ADDITIONAL_PROPERTIES: &str = "additional properties on an object";
const TUPLE: &str = "Tuple is not supported";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("unsupported schema, details: {0}")]
    Unsupported(&'static str),
}

/// Types of a schema node, in `type` keyword order. Empty when unspecified.
fn types_of(schema: &Value) -> Vec<&str> {
    match schema.get("type") {
        Some(Value::String(ty)) => vec![ty.as_str()],
        Some(Value::Array(types)) => types.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

/// Builds the index mapping of documents matching `schema`, then applies
/// `field_overrides`.
pub fn build_mapping(schema: &Value, field_overrides: &[FieldOverride]) -> Result<Value, SchemaError> {
    let mut mapping = build_document(schema)?;
    for field_override in field_overrides {
        apply_override(&mut mapping, field_override);
    }

    Ok(mapping)
}

fn build_document(schema: &Value) -> Result<Value, SchemaError> {
    let types = types_of(schema);
    let non_null = types.iter().filter(|ty| **ty != "null").count();
    if types.is_empty() || types.len() > 2 || non_null != 1 {
        return Err(SchemaError::Unsupported(MULTIPLE_OR_UNSPECIFIED_TYPES));
    }

    if types.contains(&"object") {
        build_object(schema)
    } else if types.contains(&"array") {
        build_array(schema)
    } else {
        Err(SchemaError::Unsupported(NOT_OBJECT_OR_ARRAY))
    }
}

fn build_object(schema: &Value) -> Result<Value, SchemaError> {
    match schema.get("additionalProperties") {
        None | Some(Value::Bool(false)) => {}
        Some(_) => return Err(SchemaError::Unsupported(ADDITIONAL_PROPERTIES)),
    }

    let mut properties = Map::new();
    if let Some(Value::Object(fields)) = schema.get("properties") {
        for (name, field) in fields {
            if let Some(mapping) = build_field(field)? {
                properties.insert(name.clone(), mapping);
            }
        }
    }

    Ok(json!({ "properties": properties }))
}

/// Arrays are mapped as their items.
fn build_array(schema: &Value) -> Result<Value, SchemaError> {
    match schema.get("items") {
        Some(Value::Array(_)) => Err(SchemaError::Unsupported(TUPLE)),
        Some(items @ Value::Object(_)) => build_document(items),
        _ => Err(SchemaError::Unsupported(MULTIPLE_OR_UNSPECIFIED_TYPES)),
    }
}

/// Maps a property. Properties that can only be `null` have no mapping.
fn build_field(schema: &Value) -> Result<Option<Value>, SchemaError> {
    let types = types_of(schema);
    if types.is_empty() {
        return Err(SchemaError::Unsupported(MULTIPLE_OR_UNSPECIFIED_TYPES));
    }

    let mut mappings = Vec::new();
    if types.contains(&"object") {
        mappings.push(build_object(schema)?);
    }
    if types.contains(&"array") {
        mappings.push(build_array(schema)?);
    }
    if types.contains(&"boolean") {
        mappings.push(json!({"type": "boolean"}));
    }
    if types.contains(&"number") {
        mappings.push(json!({"type": "double"}));
    } else if types.contains(&"integer") {
        mappings.push(json!({"type": "long"}));
    }
    if types.contains(&"string") {
        mappings.push(json!({"type": "keyword"}));
    }

    match mappings.len() {
        0 => Ok(None),
        1 => Ok(mappings.pop()),
        _ => Err(SchemaError::Unsupported(MULTIPLE_OR_UNSPECIFIED_TYPES)),
    }
}

/// Sets `{"type": es_type}` at the override's pointer, creating intermediate objects.
fn apply_override(mapping: &mut Value, field_override: &FieldOverride) {
    let mut node = mapping;
    for token in field_override.pointer.split('/').skip(1) {
        let name = token.replace("~1", "/").replace("~0", "~");
        let Some(object) = node.as_object_mut() else {
            return;
        };
        let properties = object
            .entry("properties")
            .or_insert_with(|| Value::Object(Map::new()));
        let Some(properties) = properties.as_object_mut() else {
            return;
        };
        node = properties
            .entry(name)
            .or_insert_with(|| Value::Object(Map::new()));
    }

    *node = json!({ "type": field_override.es_type });
}

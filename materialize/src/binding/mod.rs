//! Bindings of source collections to destination resources.

mod validation;

use materialize_config::shared::{BindingConfig, FieldOverride, JsonType, ProjectionSpec};
use url::Url;

use crate::bail;
use crate::error::{ErrorKind, MaterializeResult};

pub use validation::*;

/// Column type of a projected field in a relational destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Boolean,
    Integer,
    Number,
    String,
    /// Objects, arrays and fields that may hold several JSON types.
    Json,
}

impl ColumnType {
    fn of(projection: &ProjectionSpec) -> ColumnType {
        match projection.scalar_type() {
            Some(JsonType::Boolean) => ColumnType::Boolean,
            Some(JsonType::Integer) => ColumnType::Integer,
            Some(JsonType::Number) => ColumnType::Number,
            Some(JsonType::String) => ColumnType::String,
            _ => ColumnType::Json,
        }
    }
}

/// A materialized field: its name, location in the document and column type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub pointer: String,
    pub column_type: ColumnType,
    pub nullable: bool,
}

impl Field {
    fn from_projection(projection: &ProjectionSpec) -> Field {
        Field {
            name: projection.field.clone(),
            pointer: projection.ptr.clone(),
            column_type: ColumnType::of(projection),
            nullable: projection.is_nullable(),
        }
    }
}

/// Destination identity of a binding, resolved during validation.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    Table {
        table: String,
    },
    Index {
        index: String,
        field_overrides: Vec<FieldOverride>,
    },
    Webhook {
        url: Url,
    },
}

/// Immutable mapping of one source collection onto one destination resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    /// Position of the binding in the materialization.
    pub index: usize,
    pub collection: String,
    pub resource: Resource,
    pub resource_path: Vec<String>,
    pub keys: Vec<Field>,
    pub values: Vec<Field>,
    pub document: Field,
    /// When set, Load is skipped and every Store is an append.
    pub delta_updates: bool,
    /// JSON schema of the source collection.
    pub schema: serde_json::Value,
}

impl Binding {
    /// Builds the binding at `index` from its configuration and validation outcome.
    ///
    /// Value fields default to every projection that is neither a key nor the root
    /// document and that the destination does not forbid.
    pub fn build(
        index: usize,
        config: &BindingConfig,
        validated: ValidatedBinding,
    ) -> MaterializeResult<Binding> {
        let collection = &config.collection;

        let mut keys = Vec::with_capacity(collection.key.len());
        for (pointer, projection) in collection.key.iter().zip(collection.key_projections()) {
            let Some(projection) = projection else {
                bail!(
                    ErrorKind::ConfigError,
                    "Collection key has no primary key projection",
                    pointer
                );
            };
            keys.push(Field::from_projection(projection));
        }

        let Some(root) = collection.root_document() else {
            bail!(
                ErrorKind::ConfigError,
                "Collection has no root document projection",
                collection.name
            );
        };

        let selectable = |projection: &&ProjectionSpec| {
            !projection.is_root_document()
                && !keys.iter().any(|key| key.name == projection.field)
        };

        let values = match &config.values {
            Some(fields) => {
                let mut values = Vec::with_capacity(fields.len());
                for field in fields {
                    let Some(projection) = collection.projection(field).filter(selectable) else {
                        bail!(
                            ErrorKind::ConfigError,
                            "Value field is not a non-key projection of the collection",
                            field
                        );
                    };
                    if validated.constraint(field).map(|c| c.kind) == Some(ConstraintKind::Forbidden)
                    {
                        bail!(
                            ErrorKind::ConfigError,
                            "Value field is forbidden by the destination",
                            field
                        );
                    }
                    values.push(Field::from_projection(projection));
                }
                values
            }
            None => collection
                .projections
                .iter()
                .filter(selectable)
                .filter(|projection| {
                    validated.constraint(&projection.field).map(|c| c.kind)
                        != Some(ConstraintKind::Forbidden)
                })
                .map(Field::from_projection)
                .collect(),
        };

        Ok(Binding {
            index,
            collection: collection.name.clone(),
            resource: validated.resource,
            resource_path: validated.resource_path,
            keys,
            values,
            document: Field::from_projection(root),
            delta_updates: validated.delta_updates,
            schema: collection.schema.clone(),
        })
    }

    /// JSON pointers of the key fields, in key order.
    pub fn key_pointers(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|key| key.pointer.as_str())
    }

    /// Reads every value field out of `document`, using `null` for absent locations.
    pub fn extract_values(&self, document: &serde_json::Value) -> Vec<serde_json::Value> {
        self.values
            .iter()
            .map(|field| {
                document
                    .pointer(&field.pointer)
                    .cloned()
                    .unwrap_or(serde_json::Value::Null)
            })
            .collect()
    }

    /// Dotted rendering of the resource path, used in logs.
    pub fn target(&self) -> String {
        self.resource_path.join(".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{orders_binding_config, postgres_endpoint};
    use serde_json::json;

    #[test]
    fn build_selects_keys_values_and_document() {
        let config = orders_binding_config(json!({"table": "orders"}));
        let validated = validate(&postgres_endpoint(), &config).unwrap();
        let binding = Binding::build(0, &config, validated).unwrap();

        let keys: Vec<_> = binding.keys.iter().map(|f| f.name.as_str()).collect();
        let values: Vec<_> = binding.values.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(keys, vec!["k1", "k2"]);
        assert_eq!(values, vec!["boolean", "integer", "number", "string"]);
        assert_eq!(binding.document.name, "flow_document");
        assert_eq!(binding.keys[0].column_type, ColumnType::Integer);
        assert_eq!(binding.values[2].column_type, ColumnType::Number);
        assert_eq!(binding.resource_path, vec!["orders".to_owned()]);
        assert!(!binding.delta_updates);
    }

    #[test]
    fn explicit_values_must_be_projections() {
        let mut config = orders_binding_config(json!({"table": "orders"}));
        config.values = Some(vec!["string".to_owned(), "k1".to_owned()]);
        let validated = validate(&postgres_endpoint(), &config).unwrap();

        let err = Binding::build(0, &config, validated).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }

    #[test]
    fn extracts_values_and_key_pointers() {
        let config = orders_binding_config(json!({"table": "orders"}));
        let validated = validate(&postgres_endpoint(), &config).unwrap();
        let binding = Binding::build(0, &config, validated).unwrap();

        let document = json!({"k1": 1, "k2": true, "boolean": false, "string": "s"});
        assert_eq!(
            binding.extract_values(&document),
            vec![json!(false), json!(null), json!(null), json!("s")]
        );
        assert_eq!(binding.key_pointers().collect::<Vec<_>>(), vec!["/k1", "/k2"]);
    }
}

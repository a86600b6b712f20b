use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Resource of a relational binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct TableResource {
    pub table: String,
    /// Accepted for parity with the other resources; relational bindings always upsert.
    #[serde(default)]
    pub delta_updates: bool,
}

impl TableResource {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.table.is_empty() {
            return Err(ValidationError::MissingProperty("table"));
        }
        if self.delta_updates {
            return Err(ValidationError::InvalidConfig(
                "relational bindings do not support delta updates".to_owned(),
            ));
        }

        Ok(())
    }
}

/// Replaces the generated index mapping at a location of the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct FieldOverride {
    /// JSON pointer into the document, e.g. `/user/name`.
    pub pointer: String,
    /// Elasticsearch field type used at that location, e.g. `text`.
    pub es_type: String,
}

/// Resource of a search-index binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct IndexResource {
    pub index: String,
    #[serde(default)]
    pub delta_updates: bool,
    #[serde(default)]
    pub field_overrides: Vec<FieldOverride>,
}

impl IndexResource {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.index.is_empty() {
            return Err(ValidationError::MissingProperty("index"));
        }
        for field_override in &self.field_overrides {
            if !field_override.pointer.starts_with('/') {
                return Err(ValidationError::InvalidConfig(format!(
                    "field override pointer `{}` must start with '/'",
                    field_override.pointer
                )));
            }
        }

        Ok(())
    }
}

/// Resource of a webhook binding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookResource {
    /// Path joined onto the endpoint address.
    #[serde(
        rename = "relativePath",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub relative_path: Option<String>,
}

use serde::{Deserialize, Serialize};

use crate::load::Config;
use crate::shared::{CollectionSpec, EndpointConfig, LoadBatchConfig, ValidationError};

/// One configured binding: a source collection and its raw destination resource.
///
/// The resource is kept as JSON and parsed by the destination kind during validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BindingConfig {
    pub resource: serde_json::Value,
    pub collection: CollectionSpec,
    /// Value fields to materialize. Defaults to every permitted non-key field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
}

/// Configuration of the materialization driver binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DriverConfig {
    /// Name of the materialization, used as the fence identity.
    pub materialization: String,
    #[serde(default)]
    pub key_begin: u32,
    #[serde(default = "default_key_end")]
    pub key_end: u32,
    pub endpoint: EndpointConfig,
    pub bindings: Vec<BindingConfig>,
    #[serde(default)]
    pub load_batch: LoadBatchConfig,
}

fn default_key_end() -> u32 {
    u32::MAX
}

impl DriverConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.materialization.is_empty() {
            return Err(ValidationError::MissingProperty("materialization"));
        }
        if self.key_begin > self.key_end {
            return Err(ValidationError::InvalidKeyRange {
                key_begin: self.key_begin,
                key_end: self.key_end,
            });
        }
        if self.bindings.is_empty() {
            return Err(ValidationError::NoBindings);
        }

        self.endpoint.validate()?;
        self.load_batch.validate()
    }
}

impl Config for DriverConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

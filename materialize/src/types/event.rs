use serde::Deserialize;

use crate::binding::Binding;
use crate::error::MaterializeResult;
use crate::types::{Checkpoint, Key};

/// Decoded upstream change, grouped into transactions by [`ChangeEvent::Commit`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Document {
        binding: usize,
        key: Key,
        values: Vec<serde_json::Value>,
        document: serde_json::Value,
    },
    Commit {
        checkpoint: Checkpoint,
    },
}

impl ChangeEvent {
    /// Builds a document event, projecting key and values out of `document`.
    pub fn from_document(binding: &Binding, document: serde_json::Value) -> MaterializeResult<Self> {
        let key = Key::from_document(&document, binding.key_pointers())?;
        let values = binding.extract_values(&document);

        Ok(ChangeEvent::Document {
            binding: binding.index,
            key,
            values,
            document,
        })
    }
}

/// Line of the newline-delimited JSON change feed read by the driver.
///
/// `{"binding": 0, "document": {...}}` carries a document and
/// `{"checkpoint": "<base64>"}` closes a transaction.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ChangeLine {
    Document {
        binding: usize,
        document: serde_json::Value,
    },
    Commit {
        checkpoint: Checkpoint,
    },
}

impl ChangeLine {
    /// Converts the line into a [`ChangeEvent`] using the configured bindings.
    pub fn into_event(self, bindings: &[Binding]) -> MaterializeResult<ChangeEvent> {
        match self {
            ChangeLine::Commit { checkpoint } => Ok(ChangeEvent::Commit { checkpoint }),
            ChangeLine::Document { binding, document } => {
                let Some(binding) = bindings.get(binding) else {
                    crate::bail!(
                        crate::error::ErrorKind::InvariantViolation,
                        "Change references an unknown binding",
                        binding
                    );
                };
                ChangeEvent::from_document(binding, document)
            }
        }
    }
}

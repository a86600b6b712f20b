use serde::{Deserialize, Serialize};

/// JSON type a projected location may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonType {
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Object,
    Array,
}

/// A named field of a collection, located by a JSON pointer into its documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProjectionSpec {
    pub field: String,
    /// JSON pointer of the field. The empty pointer projects the whole document.
    #[serde(default)]
    pub ptr: String,
    pub types: Vec<JsonType>,
    #[serde(default)]
    pub is_primary_key: bool,
}

impl ProjectionSpec {
    pub fn is_root_document(&self) -> bool {
        self.ptr.is_empty()
    }

    pub fn is_nullable(&self) -> bool {
        self.types.contains(&JsonType::Null)
    }

    /// Returns the single non-null type of the projection, if it has exactly one.
    pub fn scalar_type(&self) -> Option<JsonType> {
        let mut non_null = self.types.iter().filter(|t| **t != JsonType::Null);
        match (non_null.next(), non_null.next()) {
            (Some(t), None) => Some(*t),
            _ => None,
        }
    }
}

/// Source collection of a binding as seen by validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CollectionSpec {
    pub name: String,
    /// JSON pointers of the collection key, in key order.
    pub key: Vec<String>,
    pub projections: Vec<ProjectionSpec>,
    /// JSON schema of the collection's documents.
    #[serde(default)]
    pub schema: serde_json::Value,
}

impl CollectionSpec {
    pub fn projection(&self, field: &str) -> Option<&ProjectionSpec> {
        self.projections.iter().find(|p| p.field == field)
    }

    pub fn root_document(&self) -> Option<&ProjectionSpec> {
        self.projections.iter().find(|p| p.is_root_document())
    }

    /// Returns the projection of each key pointer, in key order.
    pub fn key_projections(&self) -> Vec<Option<&ProjectionSpec>> {
        self.key
            .iter()
            .map(|ptr| {
                self.projections
                    .iter()
                    .find(|p| &p.ptr == ptr && p.is_primary_key)
            })
            .collect()
    }
}

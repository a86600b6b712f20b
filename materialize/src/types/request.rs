use crate::types::Key;

/// Key whose current document should be looked up before storing.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub binding: usize,
    pub key: Key,
}

/// Document found by a Load, returned without its key.
#[derive(Debug, Clone, PartialEq)]
pub struct Loaded {
    pub binding: usize,
    pub document: serde_json::Value,
}

/// Row mutation buffered by Store and applied at Commit.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreRequest {
    pub binding: usize,
    pub key: Key,
    pub values: Vec<serde_json::Value>,
    pub document: serde_json::Value,
    /// Whether Load found a previous version of this key.
    pub exists: bool,
}

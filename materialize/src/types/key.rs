use std::fmt;

use crate::bail;
use crate::error::{ErrorKind, MaterializeError, MaterializeResult};

/// Scalar component of a composite key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyValue {
    Null,
    Bool(bool),
    Integer(i64),
    String(String),
}

impl TryFrom<&serde_json::Value> for KeyValue {
    type Error = MaterializeError;

    fn try_from(value: &serde_json::Value) -> Result<Self, Self::Error> {
        match value {
            serde_json::Value::Null => Ok(KeyValue::Null),
            serde_json::Value::Bool(b) => Ok(KeyValue::Bool(*b)),
            serde_json::Value::String(s) => Ok(KeyValue::String(s.clone())),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(KeyValue::Integer(i)),
                None if n.is_u64() => bail!(
                    ErrorKind::KeyEncodingError,
                    "Key integer is outside of the signed 64-bit range",
                    n
                ),
                None => bail!(
                    ErrorKind::KeyEncodingError,
                    "Fractional numbers cannot be used in keys",
                    n
                ),
            },
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => bail!(
                ErrorKind::KeyEncodingError,
                "Arrays and objects cannot be used in keys",
                value
            ),
        }
    }
}

impl From<KeyValue> for serde_json::Value {
    fn from(value: KeyValue) -> Self {
        match value {
            KeyValue::Null => serde_json::Value::Null,
            KeyValue::Bool(b) => serde_json::Value::Bool(b),
            KeyValue::Integer(i) => serde_json::Value::from(i),
            KeyValue::String(s) => serde_json::Value::String(s),
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Null => f.write_str("null"),
            KeyValue::Bool(b) => write!(f, "{b}"),
            KeyValue::Integer(i) => write!(f, "{i}"),
            KeyValue::String(s) => write!(f, "{s:?}"),
        }
    }
}

/// Ordered tuple of key components, unique within a binding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Key(Vec<KeyValue>);

impl Key {
    pub fn new(values: Vec<KeyValue>) -> Self {
        Self(values)
    }

    /// Builds a key from JSON components, rejecting values that cannot be encoded.
    pub fn from_json(values: &[serde_json::Value]) -> MaterializeResult<Self> {
        values
            .iter()
            .map(KeyValue::try_from)
            .collect::<MaterializeResult<Vec<_>>>()
            .map(Self)
    }

    /// Extracts the key of `document` at each of `pointers`, in order.
    pub fn from_document<I, S>(document: &serde_json::Value, pointers: I) -> MaterializeResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut values = Vec::new();
        for pointer in pointers {
            let pointer = pointer.as_ref();
            let Some(value) = document.pointer(pointer) else {
                bail!(
                    ErrorKind::KeyEncodingError,
                    "Document has no value at a key location",
                    pointer
                );
            };
            values.push(KeyValue::try_from(value)?);
        }

        Ok(Self(values))
    }

    pub fn values(&self) -> &[KeyValue] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            value.fmt(f)?;
        }
        f.write_str(")")
    }
}

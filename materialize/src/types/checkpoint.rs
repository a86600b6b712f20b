use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Opaque upstream replay position committed with a transaction.
///
/// Serialized as standard base64.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Checkpoint(Bytes);

impl Checkpoint {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Checkpoint {
    fn from(value: Vec<u8>) -> Self {
        Self(Bytes::from(value))
    }
}

impl From<&'static [u8]> for Checkpoint {
    fn from(value: &'static [u8]) -> Self {
        Self(Bytes::from_static(value))
    }
}

impl Serialize for Checkpoint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Checkpoint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Checkpoint::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_is_base64_in_json() {
        let checkpoint = Checkpoint::from(b"C1".as_slice());
        let encoded = serde_json::to_string(&checkpoint).unwrap();
        assert_eq!(encoded, "\"QzE=\"");

        let decoded: Checkpoint = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.as_bytes(), b"C1");
        assert!(serde_json::from_str::<Checkpoint>("\"***\"").is_err());
    }
}

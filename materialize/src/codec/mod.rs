//! Canonical identifiers for composite keys.
//!
//! Keys are packed with the ordered tuple layout of [`tuple`] and rendered as
//! unpadded standard base64. The identifier is deterministic and distinct keys
//! always produce distinct identifiers; it is not meant to be decoded.

mod tuple;

use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;

use crate::types::Key;

pub use tuple::pack;

/// Returns the document identifier of `key`.
pub fn encode(key: &Key) -> String {
    STANDARD_NO_PAD.encode(pack(key))
}

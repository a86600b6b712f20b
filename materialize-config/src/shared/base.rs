use thiserror::Error;

/// Errors raised while validating endpoint and resource configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A required property is missing or empty.
    #[error("missing '{0}'")]
    MissingProperty(&'static str),

    /// A URL-typed property could not be parsed.
    #[error("invalid URL for '{property}': {reason}")]
    InvalidUrl {
        property: &'static str,
        reason: String,
    },

    /// A batch or sizing option is out of range.
    #[error("`{0}` must be greater than zero")]
    NotPositive(&'static str),

    /// The key range of the materialization is inverted.
    #[error("key range is invalid: key_begin {key_begin} is greater than key_end {key_end}")]
    InvalidKeyRange { key_begin: u32, key_end: u32 },

    /// No bindings were configured for the materialization.
    #[error("at least one binding must be configured")]
    NoBindings,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

//! Shorthands for building and returning [`crate::error::MaterializeError`]s.

/// Creates a [`crate::error::MaterializeError`] from a kind, a description and an
/// optional detail.
#[macro_export]
macro_rules! materialize_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::MaterializeError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::MaterializeError::from(($kind, $desc, $detail.to_string()))
    };
}

/// Returns early with a [`crate::error::MaterializeError`].
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return Err($crate::materialize_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return Err($crate::materialize_error!($kind, $desc, $detail))
    };
}

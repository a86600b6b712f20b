//! Cooperative cancellation of in-flight transactions.

pub mod shutdown;

//! Configuration management for materialization services.
//!
//! Provides environment detection, configuration loading from YAML files,
//! secret handling, and the endpoint and resource configuration types
//! consumed by the destination adapters.

mod environment;
mod load;
mod secret;
pub mod shared;

pub use environment::*;
pub use load::*;
pub use secret::*;

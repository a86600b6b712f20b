//! Materialization of keyed document collections into external destinations.
//!
//! A [`pipeline::MaterializationPipeline`] reads change events grouped into
//! checkpointed transactions and drives a [`transactor::Transactor`] through the
//! load, prepare, store, commit and acknowledge protocol against one
//! [`destination::Destination`].

pub mod binding;
pub mod codec;
pub mod concurrency;
pub mod destination;
pub mod error;
pub mod fence;
mod macros;
pub mod pipeline;
#[cfg(test)]
mod test_utils;
pub mod transactor;
pub mod types;

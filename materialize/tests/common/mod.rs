//! Shared helpers for the destination integration tests.
//!
//! Provides throwaway Postgres databases and the `acme/orders` fixtures the
//! tests materialize.

#![allow(dead_code)]

pub mod collection;
pub mod database;

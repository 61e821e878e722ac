//! Domain models for Plinth.
//!
//! These are the core types shared across all crates.

pub mod tenant;
pub mod user;

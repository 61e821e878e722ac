//! Plinth Core — domain models, repository traits and the shared error
//! taxonomy for the multi-tenant data plane.

pub mod error;
pub mod models;
pub mod repository;

pub use error::{PlinthError, PlinthResult};

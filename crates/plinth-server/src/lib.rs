//! Plinth Server — HTTP entry point of the multi-tenant CMS core.

pub mod api;
pub mod config;
pub mod error;

pub use api::{AppState, router};
pub use config::ServerConfig;
pub use error::{ApiError, ServerError};

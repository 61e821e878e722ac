//! Plinth Database — SurrealDB plumbing for the multi-tenant data plane.
//!
//! This crate provides:
//! - Connection management ([`DbManager`], [`DbConfig`]) and the
//!   [`DatabaseServer`] seam with remote and in-memory implementations
//! - Directory migrations ([`run_migrations`]) and the idempotent
//!   tenant schema initializer ([`ensure_tenant_schema`])
//! - The per-tenant [`ConnectionRegistry`]
//! - Repository implementations for the tenant directory and
//!   tenant-scoped users
//! - Error types ([`DbError`])

mod connection;
mod error;
mod registry;
pub mod repository;
mod schema;

pub use connection::{
    DatabaseServer, DbConfig, DbManager, MemoryServer, RemoteServer, validate_database_name,
};
pub use error::DbError;
pub use registry::{ConnectionRegistry, RegistryConfig, TenantConnection, TenantSession};
pub use schema::{ensure_tenant_schema, run_migrations};

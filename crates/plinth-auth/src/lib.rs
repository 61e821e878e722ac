//! Plinth Auth — credential hashing (Argon2id) and one-time temporary
//! password generation for provisioned accounts.

pub mod config;
pub mod error;
pub mod password;

pub use config::AuthConfig;
pub use error::AuthError;
pub use password::{generate_temporary_password, hash_password, verify_password};

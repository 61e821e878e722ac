//! Repository trait definitions for data access abstraction.
//!
//! All repository operations are async. The tenant directory is a
//! single shared store; user repositories are bound to one tenant's
//! own database.

use uuid::Uuid;

use crate::error::PlinthResult;
use crate::models::{
    tenant::{CreateTenant, Tenant, TenantStatus, UpdateTenant},
    user::{CreateUser, User},
};

/// Pagination parameters for list queries.
#[derive(Debug, Clone)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// A paginated result set.
#[derive(Debug, Clone)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

// ---------------------------------------------------------------------------
// Tenant directory (global scope)
// ---------------------------------------------------------------------------

pub trait TenantRepository: Send + Sync {
    /// Insert a tenant in `provisioning` status.
    ///
    /// Fails with `DomainExists` when the domain or subdomain is taken.
    fn create(&self, input: CreateTenant) -> impl Future<Output = PlinthResult<Tenant>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = PlinthResult<Tenant>> + Send;
    fn find_by_domain(
        &self,
        domain: &str,
    ) -> impl Future<Output = PlinthResult<Option<Tenant>>> + Send;
    fn find_by_subdomain(
        &self,
        subdomain: &str,
    ) -> impl Future<Output = PlinthResult<Option<Tenant>>> + Send;
    /// Whether `domain` or `subdomain` is already held by a tenant other
    /// than `except`.
    fn domain_taken(
        &self,
        domain: &str,
        subdomain: Option<&str>,
        except: Option<Uuid>,
    ) -> impl Future<Output = PlinthResult<bool>> + Send;
    fn update(
        &self,
        id: Uuid,
        input: UpdateTenant,
    ) -> impl Future<Output = PlinthResult<Tenant>> + Send;
    fn set_status(
        &self,
        id: Uuid,
        status: TenantStatus,
    ) -> impl Future<Output = PlinthResult<Tenant>> + Send;
    fn set_domain(&self, id: Uuid, domain: &str)
    -> impl Future<Output = PlinthResult<Tenant>> + Send;
    fn touch_last_activity(&self, id: Uuid) -> impl Future<Output = PlinthResult<()>> + Send;
    fn delete(&self, id: Uuid) -> impl Future<Output = PlinthResult<()>> + Send;
    fn list(
        &self,
        pagination: Pagination,
    ) -> impl Future<Output = PlinthResult<PaginatedResult<Tenant>>> + Send;
}

// ---------------------------------------------------------------------------
// Tenant-scoped repositories
// ---------------------------------------------------------------------------

pub trait UserRepository: Send + Sync {
    fn create(&self, input: CreateUser) -> impl Future<Output = PlinthResult<User>> + Send;
    fn get_by_username(
        &self,
        tenant_id: Uuid,
        username: &str,
    ) -> impl Future<Output = PlinthResult<User>> + Send;
    fn count(&self, tenant_id: Uuid) -> impl Future<Output = PlinthResult<u64>> + Send;
}

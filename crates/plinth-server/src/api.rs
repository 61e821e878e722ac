//! HTTP surface: tenant-resolving middleware, tenant-scoped routes and
//! the tenant administration API.

use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::header::{AUTHORIZATION, HOST};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Extension, Json, Router};
use dashmap::DashMap;
use plinth_core::error::PlinthError;
use plinth_core::models::tenant::{CreateTenant, Tenant, TenantContext};
use plinth_core::repository::{Pagination, TenantRepository};
use plinth_db::DatabaseServer;
use plinth_tenancy::{
    DeprovisionReport, MigrationReport, ProvisionOutcome, Provisioner, TenantResolver,
    TenantStatusReport,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ApiError;

/// Progress of a provisioning request accepted on the async endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Job {
    Running,
    Succeeded { outcome: ProvisionOutcome },
    Failed { error: String },
}

pub struct AppState<R, S: DatabaseServer> {
    pub resolver: TenantResolver<R>,
    pub provisioner: Provisioner<R, S>,
    pub admin_token: Option<Arc<str>>,
    pub jobs: Arc<DashMap<Uuid, Job>>,
}

impl<R, S: DatabaseServer> Clone for AppState<R, S> {
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
            provisioner: self.provisioner.clone(),
            admin_token: self.admin_token.clone(),
            jobs: Arc::clone(&self.jobs),
        }
    }
}

impl<R: TenantRepository + 'static, S: DatabaseServer> AppState<R, S> {
    pub fn new(provisioner: Provisioner<R, S>, admin_token: Option<String>) -> Self {
        Self {
            resolver: TenantResolver::new(Arc::clone(provisioner.tenants())),
            provisioner,
            admin_token: admin_token.filter(|t| !t.is_empty()).map(Arc::from),
            jobs: Arc::new(DashMap::new()),
        }
    }
}

/// Tenant context for routes that also serve platform-level requests.
#[derive(Debug, Clone)]
pub struct SoftTenant(pub Option<TenantContext>);

pub fn router<R, S>(state: AppState<R, S>) -> Router
where
    R: TenantRepository + 'static,
    S: DatabaseServer,
{
    let tenant_routes = Router::new()
        .route("/api/tenant", get(current_tenant))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_tenant::<R, S>,
        ));

    let platform_routes = Router::new()
        .route("/api/platform", get(platform_info))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            optional_tenant::<R, S>,
        ));

    let admin_routes = Router::new()
        .route(
            "/admin/tenants",
            post(create_tenant::<R, S>).get(list_tenants::<R, S>),
        )
        .route("/admin/tenants/async", post(create_tenant_async::<R, S>))
        .route("/admin/jobs/{id}", get(job_status::<R, S>))
        .route("/admin/tenants/{id}", delete(delete_tenant::<R, S>))
        .route("/admin/tenants/{id}/status", get(tenant_status::<R, S>))
        .route("/admin/tenants/{id}/domain", put(migrate_domain::<R, S>))
        .route("/admin/tenants/{id}/suspend", post(suspend_tenant::<R, S>))
        .route(
            "/admin/tenants/{id}/reactivate",
            post(reactivate_tenant::<R, S>),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_admin::<R, S>,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(tenant_routes)
        .merge(platform_routes)
        .merge(admin_routes)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

/// Host the client addressed, from the `Host` header or the request URI.
fn request_host(req: &Request) -> String {
    req.headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().host().map(str::to_string))
        .unwrap_or_default()
}

async fn require_tenant<R, S>(
    State(state): State<AppState<R, S>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError>
where
    R: TenantRepository + 'static,
    S: DatabaseServer,
{
    let host = request_host(&req);
    let ctx = state.resolver.resolve(&host).await?;
    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

async fn optional_tenant<R, S>(
    State(state): State<AppState<R, S>>,
    mut req: Request,
    next: Next,
) -> Response
where
    R: TenantRepository + 'static,
    S: DatabaseServer,
{
    let host = request_host(&req);
    let ctx = state.resolver.resolve_soft(&host).await;
    req.extensions_mut().insert(SoftTenant(ctx));
    next.run(req).await
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
}

/// Byte comparison whose duration does not depend on where inputs differ.
fn tokens_match(given: &str, expected: &str) -> bool {
    let (a, b) = (given.as_bytes(), expected.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

async fn require_admin<R, S>(
    State(state): State<AppState<R, S>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError>
where
    R: TenantRepository + 'static,
    S: DatabaseServer,
{
    let Some(expected) = state.admin_token.as_deref() else {
        return Err(ApiError::Unauthorized);
    };
    match bearer_token(req.headers()) {
        Some(given) if tokens_match(given, expected) => Ok(next.run(req).await),
        _ => Err(ApiError::Unauthorized),
    }
}

// ---------------------------------------------------------------------------
// Public routes
// ---------------------------------------------------------------------------

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn current_tenant(Extension(ctx): Extension<TenantContext>) -> Json<TenantContext> {
    Json(ctx)
}

async fn platform_info(Extension(SoftTenant(ctx)): Extension<SoftTenant>) -> Json<Value> {
    Json(json!({
        "service": "plinth",
        "tenant": ctx,
    }))
}

// ---------------------------------------------------------------------------
// Administration
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub offset: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_limit() -> u64 {
    Pagination::default().limit
}

#[derive(Debug, Serialize)]
pub struct TenantPage {
    pub items: Vec<Tenant>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

#[derive(Debug, Deserialize)]
pub struct MigrateDomain {
    pub domain: String,
}

async fn create_tenant<R, S>(
    State(state): State<AppState<R, S>>,
    Json(input): Json<CreateTenant>,
) -> Result<(StatusCode, Json<ProvisionOutcome>), ApiError>
where
    R: TenantRepository + 'static,
    S: DatabaseServer,
{
    let outcome = state.provisioner.provision(input).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn create_tenant_async<R, S>(
    State(state): State<AppState<R, S>>,
    Json(input): Json<CreateTenant>,
) -> impl IntoResponse
where
    R: TenantRepository + 'static,
    S: DatabaseServer,
{
    let job_id = Uuid::new_v4();
    state.jobs.insert(job_id, Job::Running);

    let handle = state.provisioner.spawn_provision(input);
    let jobs = Arc::clone(&state.jobs);
    tokio::spawn(async move {
        let job = match handle.await {
            Ok(Ok(outcome)) => Job::Succeeded { outcome },
            Ok(Err(e)) => Job::Failed {
                error: e.to_string(),
            },
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Provisioning task aborted");
                Job::Failed {
                    error: format!("provisioning task aborted: {e}"),
                }
            }
        };
        jobs.insert(job_id, job);
    });

    info!(job_id = %job_id, "Provisioning job accepted");
    (StatusCode::ACCEPTED, Json(json!({ "job_id": job_id })))
}

async fn job_status<R, S>(
    State(state): State<AppState<R, S>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Job>, ApiError>
where
    R: TenantRepository + 'static,
    S: DatabaseServer,
{
    state
        .jobs
        .get(&id)
        .map(|job| Json(job.value().clone()))
        .ok_or_else(|| {
            ApiError::Plinth(PlinthError::NotFound {
                entity: "job".into(),
                id: id.to_string(),
            })
        })
}

async fn list_tenants<R, S>(
    State(state): State<AppState<R, S>>,
    Query(params): Query<ListParams>,
) -> Result<Json<TenantPage>, ApiError>
where
    R: TenantRepository + 'static,
    S: DatabaseServer,
{
    let page = state
        .provisioner
        .tenants()
        .list(Pagination {
            offset: params.offset,
            limit: params.limit,
        })
        .await?;
    Ok(Json(TenantPage {
        items: page.items,
        total: page.total,
        offset: page.offset,
        limit: page.limit,
    }))
}

async fn tenant_status<R, S>(
    State(state): State<AppState<R, S>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TenantStatusReport>, ApiError>
where
    R: TenantRepository + 'static,
    S: DatabaseServer,
{
    Ok(Json(state.provisioner.status(id).await?))
}

async fn delete_tenant<R, S>(
    State(state): State<AppState<R, S>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeprovisionReport>, ApiError>
where
    R: TenantRepository + 'static,
    S: DatabaseServer,
{
    Ok(Json(state.provisioner.deprovision(id).await?))
}

async fn migrate_domain<R, S>(
    State(state): State<AppState<R, S>>,
    Path(id): Path<Uuid>,
    Json(body): Json<MigrateDomain>,
) -> Result<Json<MigrationReport>, ApiError>
where
    R: TenantRepository + 'static,
    S: DatabaseServer,
{
    Ok(Json(state.provisioner.migrate_domain(id, &body.domain).await?))
}

async fn suspend_tenant<R, S>(
    State(state): State<AppState<R, S>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Tenant>, ApiError>
where
    R: TenantRepository + 'static,
    S: DatabaseServer,
{
    Ok(Json(state.provisioner.suspend(id).await?))
}

async fn reactivate_tenant<R, S>(
    State(state): State<AppState<R, S>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Tenant>, ApiError>
where
    R: TenantRepository + 'static,
    S: DatabaseServer,
{
    Ok(Json(state.provisioner.reactivate(id).await?))
}

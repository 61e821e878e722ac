//! Integration tests for the per-tenant user repository.

use plinth_core::error::PlinthError;
use plinth_core::models::user::{CreateUser, UserRole};
use plinth_core::repository::UserRepository;
use plinth_db::repository::SurrealUserRepository;
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use uuid::Uuid;

async fn setup() -> SurrealUserRepository<Db> {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("tenant").await.unwrap();
    plinth_db::ensure_tenant_schema(&db).await.unwrap();
    SurrealUserRepository::new(db)
}

fn admin(tenant_id: Uuid, username: &str) -> CreateUser {
    CreateUser {
        tenant_id,
        username: username.into(),
        email: format!("{username}@acme.example.com"),
        password_hash: "$argon2id$placeholder".into(),
        role: UserRole::Admin,
        must_change_password: true,
    }
}

#[tokio::test]
async fn create_and_get_user() {
    let repo = setup().await;
    let tenant_id = Uuid::new_v4();

    let user = repo.create(admin(tenant_id, "admin")).await.unwrap();
    assert_eq!(user.username, "admin");
    assert_eq!(user.role, UserRole::Admin);
    assert!(user.must_change_password);

    let fetched = repo.get_by_username(tenant_id, "admin").await.unwrap();
    assert_eq!(fetched.id, user.id);
    assert_eq!(fetched.email, "admin@acme.example.com");
}

#[tokio::test]
async fn duplicate_username_is_rejected() {
    let repo = setup().await;
    let tenant_id = Uuid::new_v4();

    repo.create(admin(tenant_id, "admin")).await.unwrap();
    let result = repo.create(admin(tenant_id, "admin")).await;

    assert!(
        matches!(result, Err(PlinthError::Validation { .. })),
        "expected Validation, got {result:?}"
    );
}

#[tokio::test]
async fn unknown_username_is_not_found() {
    let repo = setup().await;

    let result = repo.get_by_username(Uuid::new_v4(), "ghost").await;
    assert!(matches!(result, Err(PlinthError::NotFound { .. })));
}

#[tokio::test]
async fn count_users() {
    let repo = setup().await;
    let tenant_id = Uuid::new_v4();

    assert_eq!(repo.count(tenant_id).await.unwrap(), 0);

    repo.create(admin(tenant_id, "admin")).await.unwrap();
    let mut editor = admin(tenant_id, "editor");
    editor.role = UserRole::Editor;
    editor.must_change_password = false;
    repo.create(editor).await.unwrap();

    assert_eq!(repo.count(tenant_id).await.unwrap(), 2);
}

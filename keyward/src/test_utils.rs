//! Test utilities for integration testing (available with `test-utils` feature).

use crate::auth::password;
use crate::config::Config;
use crate::db::handlers::{Repository, Users};
use crate::db::models::users::UserCreateDBRequest;
use axum_test::TestServer;
use sqlx::PgPool;
use uuid::Uuid;

/// Headers a well-behaved test client sends on every request. The
/// fingerprint is derived from these, so they must stay constant across
/// the login and the authenticated calls of one test.
pub const TEST_CLIENT_HEADERS: &[(&str, &str)] = &[("user-agent", "test-agent"), ("x-forwarded-for", "198.51.100.7")];

pub const TEST_ADMIN_PASSWORD: &str = "admin-test-password";

const TEST_MEMBER_PASSWORD: &str = "member-test-password";

pub async fn create_test_app(pool: PgPool) -> TestServer {
    let config = create_test_config();
    let state = crate::AppState::builder().db(pool).config(config).build();
    let router = crate::build_router(&state).expect("Failed to build router");

    TestServer::new(router).expect("Failed to create test server")
}

pub fn create_test_config() -> Config {
    let mut config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        database_url: None,
        admin_email: "admin@test.com".to_string(),
        admin_password: None,
        secret_key: Some("test-secret-key-for-testing-only".to_string()),
        ..Default::default()
    };

    // Cheap argon2 so the hashing in tests doesn't dominate the runtime
    config.auth.password.argon2_memory_kib = 1024;
    config.auth.password.argon2_iterations = 1;
    config.auth.password.argon2_parallelism = 1;

    config
}

fn fast_hash(password: &str) -> String {
    let params = create_test_config().auth.password.argon2_params();
    password::hash_password_with_params(password, Some(params)).expect("Failed to hash test password")
}

async fn insert_test_user(pool: &PgPool, role_name: &str, password: &str, label: &str) -> crate::db::models::users::UserDBResponse {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    let mut users_repo = Users::new(&mut conn);

    let suffix = Uuid::new_v4().simple().to_string();
    let role_id = users_repo.role_id_by_name(role_name).await.expect("Seed role should exist");

    users_repo
        .create(&UserCreateDBRequest {
            email: format!("{label}_{suffix}@example.com"),
            password_hash: fast_hash(password),
            display_name: Some(format!("Test {label}")),
            role_id,
        })
        .await
        .expect("Failed to create test user")
}

pub async fn create_test_user(pool: &PgPool, role_name: &str) -> crate::db::models::users::UserDBResponse {
    insert_test_user(pool, role_name, TEST_MEMBER_PASSWORD, "testuser").await
}

pub async fn create_test_admin(pool: &PgPool) -> crate::db::models::users::UserDBResponse {
    insert_test_user(pool, "admin", TEST_ADMIN_PASSWORD, "testadmin").await
}

pub async fn create_test_user_with_password(pool: &PgPool, password: &str) -> crate::db::models::users::UserDBResponse {
    insert_test_user(pool, "member", password, "testuser").await
}

/// Client headers plus the bearer token, for authenticated test requests.
pub fn authed_headers(access_token: &str) -> Vec<(&'static str, String)> {
    let mut headers = vec![("authorization", format!("Bearer {access_token}"))];
    for &(name, value) in TEST_CLIENT_HEADERS {
        headers.push((name, value.to_string()));
    }
    headers
}

/// Token pair returned by [`login_for_tokens`].
pub struct TestTokens {
    pub access_token: String,
    pub refresh_token: String,
}

/// Log in through the API and return the issued token pair.
pub async fn login_for_tokens(server: &TestServer, email: &str, password: &str) -> TestTokens {
    let mut request = server.post("/auth/login").json(&serde_json::json!({
        "email": email,
        "password": password,
    }));
    for (name, value) in TEST_CLIENT_HEADERS {
        request = request.add_header(*name, *value);
    }
    let response = request.await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    TestTokens {
        access_token: body["access_token"].as_str().expect("access_token should be a string").to_string(),
        refresh_token: body["refresh_token"].as_str().expect("refresh_token should be a string").to_string(),
    }
}

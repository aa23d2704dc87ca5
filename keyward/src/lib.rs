//! # keyward: Authentication and Permission Resolution Service
//!
//! `keyward` is a standalone authentication and authorization engine. It issues short-lived
//! signed access tokens bound to a client fingerprint, manages refresh sessions with
//! replay-resistant token rotation, and resolves effective permissions from role defaults
//! combined with per-user overrides.
//!
//! ## Overview
//!
//! Clients authenticate with email and password at `POST /auth/login` and receive a token
//! pair: an access token for request authentication and a single-use refresh secret. Access
//! tokens are HS256-signed JWTs carrying the session id and a fingerprint digest derived from
//! the client's user agent and forwarded address, so a stolen token is useless from another
//! client. Refresh secrets are stored only as digests and are rotated on every use; presenting
//! a retired secret is treated as theft evidence and revokes the whole session chain.
//!
//! Authorization is resolved per request from the database: a user's role contributes a
//! default permission set, per-user overrides add or remove individual permissions, and a
//! `manage` permission on a resource type implies all other actions on it. There are no
//! role-name special cases; administrative power comes entirely from permission rows.
//!
//! ## Architecture
//!
//! The service is built on [Axum](https://github.com/tokio-rs/axum) with PostgreSQL for all
//! persistence. The **API layer** ([`api`]) exposes authentication routes under `/auth/*`,
//! profile and account administration under `/users/*`, and override administration under
//! `/admin/user-permissions/*`. The **authentication layer** ([`auth`]) owns password hashing,
//! token minting and validation, fingerprinting, and permission resolution. The **database
//! layer** ([`db`]) uses the repository pattern; each entity has a repository handling its
//! queries and mutations.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use keyward::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = keyward::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     keyward::telemetry::init_telemetry()?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Database Setup
//!
//! The application requires PostgreSQL and runs migrations on startup:
//!
//! ```no_run
//! # use sqlx::PgPool;
//! # async fn example(pool: PgPool) -> Result<(), sqlx::Error> {
//! keyward::migrator().run(&pool).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
mod openapi;
pub mod telemetry;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use crate::{
    auth::password,
    db::handlers::{Repository, Users},
    db::models::users::{UserCreateDBRequest, UserUpdateDBRequest},
    openapi::ApiDoc,
};
use axum::{
    Router, http,
    http::HeaderValue,
    routing::{get, post},
};
use bon::Builder;
pub use config::Config;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

pub use types::{PermissionId, RoleId, SessionId, UserId};

/// Application state shared across all request handlers.
#[derive(Clone, Builder)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
}

/// Get the keyward database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Create the initial admin user if it doesn't exist.
///
/// Idempotent: creates the admin account on first startup, or updates its
/// password when one is supplied and the account already exists.
#[instrument(skip_all)]
pub async fn create_initial_admin_user(email: &str, admin_password: Option<&str>, db: &PgPool) -> anyhow::Result<UserId> {
    let password_hash = match admin_password {
        Some(pwd) => Some(password::hash_password(pwd).map_err(|e| anyhow::anyhow!("Failed to hash admin password: {e}"))?),
        None => None,
    };

    let mut tx = db.begin().await?;
    let mut user_repo = Users::new(&mut tx);

    if let Some(existing) = user_repo.get_by_email(email).await? {
        if let Some(password_hash) = password_hash {
            user_repo
                .update(
                    existing.id,
                    &UserUpdateDBRequest {
                        password_hash: Some(password_hash),
                        ..Default::default()
                    },
                )
                .await?;
        }
        tx.commit().await?;
        return Ok(existing.id);
    }

    // First boot: the account is usable only when a password was configured,
    // but the row must exist either way so overrides can target it
    let role_id = user_repo.role_id_by_name("admin").await?;
    let created = user_repo
        .create(&UserCreateDBRequest {
            email: email.to_string(),
            password_hash: password_hash.unwrap_or_else(|| password::DUMMY_HASH.to_string()),
            display_name: Some("Administrator".to_string()),
            role_id,
        })
        .await?;

    tx.commit().await?;
    info!(email, "Created initial admin user");
    Ok(created.id)
}

/// Connect to the database, run migrations, and ensure the admin user exists
async fn setup_database(config: &Config) -> anyhow::Result<PgPool> {
    let database_url = config
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("database_url is not configured; set DATABASE_URL"))?;

    let pool = PgPool::connect(database_url).await?;
    migrator().run(&pool).await?;

    create_initial_admin_user(&config.admin_email, config.admin_password.as_deref(), &pool).await?;

    Ok(pool)
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let mut origins = Vec::new();
    for origin in &config.auth.cors.allowed_origins {
        origins.push(origin.parse::<HeaderValue>()?);
    }

    let mut cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(config.auth.cors.allow_credentials)
        .expose_headers(vec![http::header::LOCATION]);

    if let Some(max_age) = config.auth.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router with all endpoints and middleware.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let auth_routes = Router::new()
        .route("/auth/register", post(api::handlers::auth::register))
        .route("/auth/login", post(api::handlers::auth::login))
        .route("/auth/refresh", post(api::handlers::auth::refresh))
        .route("/auth/logout", post(api::handlers::auth::logout))
        .route("/auth/password-change", post(api::handlers::auth::change_password))
        .with_state(state.clone());

    let user_routes = Router::new()
        .route("/users/me", get(api::handlers::users::me).patch(api::handlers::users::update_me))
        .route("/users", get(api::handlers::users::list_users))
        .route(
            "/users/{user_id}",
            get(api::handlers::users::get_user).delete(api::handlers::users::deactivate_user),
        )
        .route(
            "/admin/user-permissions/{user_id}",
            get(api::handlers::permissions::get_user_permissions).put(api::handlers::permissions::set_user_permission),
        )
        .with_state(state.clone());

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .merge(auth_routes)
        .merge(user_routes)
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()));

    let cors_layer = create_cors_layer(&state.config)?;

    let router = router.layer(cors_layer).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Main application struct that owns all resources and lifecycle.
///
/// 1. **Create**: [`Application::new`] connects to the database, runs migrations
///    and ensures the initial admin user exists
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and handles requests
///    until the shutdown future resolves
pub struct Application {
    router: Router,
    config: Config,
    pool: PgPool,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting keyward with configuration: {:#?}", config);

        config.validate()?;
        let pool = setup_database(&config).await?;

        let app_state = AppState::builder().db(pool.clone()).config(config.clone()).build();
        let router = build_router(&app_state)?;

        Ok(Self { router, config, pool })
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("Keyward listening on http://{}", bind_addr);

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Closing database connections...");
        self.pool.close().await;

        Ok(())
    }
}

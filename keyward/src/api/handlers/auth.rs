//! Authentication endpoints: register, login, refresh, logout, password change.

use axum::{extract::State, http::StatusCode, Json};

use crate::{
    api::models::{
        auth::{ChangePasswordRequest, LoginRequest, LogoutResponse, RefreshRequest, RegisterRequest, TokenPairResponse},
        users::{CurrentUser, UserResponse},
    },
    auth::{current_user::Fingerprint, engine, password},
    db::{
        handlers::{Repository, Sessions, Users},
        models::users::{UserCreateDBRequest, UserUpdateDBRequest},
    },
    errors::{AuthFailure, Error},
    AppState,
};

fn validate_password_length(state: &AppState, password: &str) -> Result<(), Error> {
    let rules = &state.config.auth.password;
    if password.len() < rules.min_length {
        return Err(Error::BadRequest {
            message: format!("Password must be at least {} characters", rules.min_length),
        });
    }
    if password.len() > rules.max_length {
        return Err(Error::BadRequest {
            message: format!("Password must be no more than {} characters", rules.max_length),
        });
    }
    Ok(())
}

async fn hash_on_blocking_thread(state: &AppState, password: String) -> Result<String, Error> {
    let params = state.config.auth.password.argon2_params();
    tokio::task::spawn_blocking(move || password::hash_password_with_params(&password, Some(params)))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password hashing task: {e}"),
        })?
}

fn token_pair(state: &AppState, issued: engine::IssuedTokens) -> TokenPairResponse {
    TokenPairResponse {
        access_token: issued.access_token,
        refresh_token: issued.refresh_secret,
        token_type: "bearer".to_string(),
        expires_in: state.config.auth.tokens.access_ttl.as_secs(),
    }
}

/// Register a new user account
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    tag = "authentication",
    responses(
        (status = 201, description = "User registered successfully", body = UserResponse),
        (status = 400, description = "Invalid input"),
        (status = 409, description = "User already exists"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), Error> {
    validate_password_length(&state, &request.password)?;

    let password_hash = hash_on_blocking_thread(&state, request.password).await?;

    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let mut user_repo = Users::new(&mut conn);

    // New accounts get the default role; the unique index on email turns a
    // duplicate registration into a 409
    let role_id = user_repo.role_id_by_name("member").await?;
    let created = user_repo
        .create(&UserCreateDBRequest {
            email: request.email,
            password_hash,
            display_name: request.display_name,
            role_id,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(UserResponse::from(created))))
}

/// Authenticate and open a session
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "Authenticated", body = TokenPairResponse),
        (status = 401, description = "Unauthorized"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    fingerprint: Fingerprint,
    Json(request): Json<LoginRequest>,
) -> Result<Json<TokenPairResponse>, Error> {
    let issued = engine::login(
        &state.db,
        &state.config,
        &request.email,
        &request.password,
        &fingerprint.0,
        request.remember_me,
    )
    .await?;

    Ok(Json(token_pair(&state, issued)))
}

/// Exchange a refresh token for a new token pair
#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "Tokens rotated", body = TokenPairResponse),
        (status = 401, description = "Unauthorized"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn refresh(
    State(state): State<AppState>,
    fingerprint: Fingerprint,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<TokenPairResponse>, Error> {
    let issued = engine::refresh(&state.db, &state.config, &request.refresh_token, &fingerprint.0).await?;

    Ok(Json(token_pair(&state, issued)))
}

/// Revoke the caller's session
#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "authentication",
    security(("BearerAuth" = [])),
    responses(
        (status = 200, description = "Session revoked", body = LogoutResponse),
        (status = 401, description = "Unauthorized"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn logout(State(state): State<AppState>, user: CurrentUser) -> Result<Json<LogoutResponse>, Error> {
    engine::logout(&state.db, user.session_id).await?;

    Ok(Json(LogoutResponse {
        message: "Logged out".to_string(),
    }))
}

/// Change the caller's password
#[utoipa::path(
    post,
    path = "/auth/password-change",
    request_body = ChangePasswordRequest,
    tag = "authentication",
    security(("BearerAuth" = [])),
    responses(
        (status = 200, description = "Password changed", body = LogoutResponse),
        (status = 401, description = "Unauthorized"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn change_password(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<Json<LogoutResponse>, Error> {
    validate_password_length(&state, &request.new_password)?;

    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;

    let stored = Users::new(&mut conn)
        .get_by_id(user.id)
        .await?
        .ok_or(Error::unauthorized(AuthFailure::InvalidCredentials))?;

    let current = request.current_password;
    let stored_hash = stored.password_hash;
    let verified = tokio::task::spawn_blocking(move || password::verify_password(&current, &stored_hash))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("join password verification task: {e}"),
        })??;
    if !verified {
        return Err(Error::unauthorized(AuthFailure::InvalidCredentials));
    }

    let new_hash = hash_on_blocking_thread(&state, request.new_password).await?;
    Users::new(&mut conn)
        .update(
            user.id,
            &UserUpdateDBRequest {
                password_hash: Some(new_hash),
                ..Default::default()
            },
        )
        .await?;

    // Every open session dies with the old password
    Sessions::new(&mut conn).revoke_all_for_user(user.id).await?;

    Ok(Json(LogoutResponse {
        message: "Password changed; all sessions revoked".to_string(),
    }))
}

//! User endpoints: profile, listing and administration.

use axum::{
    extract::{Path, Query, State},
    Json,
};

use crate::{
    api::handlers::require_permission,
    api::models::users::{CurrentUser, UserListQuery, UserResponse, UserUpdateRequest},
    db::{
        handlers::{users::UserFilter, Repository, Sessions, Users},
        models::users::UserUpdateDBRequest,
    },
    errors::Error,
    types::{Action, UserId},
    AppState,
};

/// Get the authenticated user's profile
#[utoipa::path(
    get,
    path = "/users/me",
    tag = "users",
    security(("BearerAuth" = [])),
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Unauthorized"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn me(State(state): State<AppState>, user: CurrentUser) -> Result<Json<UserResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;

    let full = Users::new(&mut conn).get_by_id(user.id).await?.ok_or(Error::NotFound {
        resource: "User".to_string(),
        id: user.id.to_string(),
    })?;

    Ok(Json(UserResponse::from(full)))
}

/// Update the authenticated user's profile
#[utoipa::path(
    patch,
    path = "/users/me",
    request_body = UserUpdateRequest,
    tag = "users",
    security(("BearerAuth" = [])),
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 401, description = "Unauthorized"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn update_me(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<UserUpdateRequest>,
) -> Result<Json<UserResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;

    let updated = Users::new(&mut conn)
        .update(
            user.id,
            &UserUpdateDBRequest {
                display_name: request.display_name,
                ..Default::default()
            },
        )
        .await?;

    Ok(Json(UserResponse::from(updated)))
}

/// List user accounts
#[utoipa::path(
    get,
    path = "/users",
    tag = "users",
    security(("BearerAuth" = [])),
    responses(
        (status = 200, description = "Users", body = Vec<UserResponse>),
        (status = 403, description = "Insufficient permissions"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_users(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<UserListQuery>,
) -> Result<Json<Vec<UserResponse>>, Error> {
    require_permission(&state, &user, "user", Action::Read).await?;

    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let users = Users::new(&mut conn)
        .list(&UserFilter::new(query.skip, query.limit.clamp(1, 1000)))
        .await?;

    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

/// Get a user account by id
#[utoipa::path(
    get,
    path = "/users/{user_id}",
    tag = "users",
    security(("BearerAuth" = [])),
    params(("user_id" = uuid::Uuid, Path, description = "User to fetch")),
    responses(
        (status = 200, description = "User", body = UserResponse),
        (status = 404, description = "Not found"),
    )
)]
#[tracing::instrument(skip_all, fields(user_id = %user_id))]
pub async fn get_user(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(user_id): Path<UserId>,
) -> Result<Json<UserResponse>, Error> {
    require_permission(&state, &user, "user", Action::Read).await?;

    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let found = Users::new(&mut conn).get_by_id(user_id).await?.ok_or(Error::NotFound {
        resource: "User".to_string(),
        id: user_id.to_string(),
    })?;

    Ok(Json(UserResponse::from(found)))
}

/// Deactivate a user account
///
/// Soft delete: the row stays for history, the account can no longer log in
/// and resolves to no permissions. Open sessions are revoked immediately.
#[utoipa::path(
    delete,
    path = "/users/{user_id}",
    tag = "users",
    security(("BearerAuth" = [])),
    params(("user_id" = uuid::Uuid, Path, description = "User to deactivate")),
    responses(
        (status = 200, description = "Deactivated user", body = UserResponse),
        (status = 403, description = "Insufficient permissions"),
        (status = 404, description = "Not found"),
    )
)]
#[tracing::instrument(skip_all, fields(user_id = %user_id))]
pub async fn deactivate_user(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(user_id): Path<UserId>,
) -> Result<Json<UserResponse>, Error> {
    require_permission(&state, &user, "user", Action::Delete).await?;

    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let mut user_repo = Users::new(&mut conn);

    if user_repo.get_by_id(user_id).await?.is_none() {
        return Err(Error::NotFound {
            resource: "User".to_string(),
            id: user_id.to_string(),
        });
    }

    user_repo.delete(user_id).await?;
    Sessions::new(&mut conn).revoke_all_for_user(user_id).await?;

    let deactivated = Users::new(&mut conn).get_by_id(user_id).await?.ok_or(Error::NotFound {
        resource: "User".to_string(),
        id: user_id.to_string(),
    })?;

    Ok(Json(UserResponse::from(deactivated)))
}

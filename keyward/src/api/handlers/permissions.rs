//! Administration of per-user permission overrides.

use axum::{
    extract::{Path, State},
    Json,
};

use crate::{
    api::handlers::require_permission,
    api::models::{
        permissions::{OverrideResponse, SetPermissionRequest, UserPermissionsResponse},
        users::CurrentUser,
    },
    auth::permissions::effective_permissions,
    db::handlers::{Permissions, Repository, Users},
    errors::Error,
    types::{Action, UserId},
    AppState,
};

async fn permission_state(state: &AppState, user_id: UserId) -> Result<UserPermissionsResponse, Error> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;

    if Users::new(&mut conn).get_by_id(user_id).await?.is_none() {
        return Err(Error::NotFound {
            resource: "User".to_string(),
            id: user_id.to_string(),
        });
    }

    let overrides = Permissions::new(&mut conn)
        .overrides_for_user(user_id)
        .await?
        .into_iter()
        .map(|o| OverrideResponse {
            permission: o.permission_name,
            granted: o.granted,
            granted_by: o.granted_by,
        })
        .collect();

    let effective = effective_permissions(&mut conn, user_id).await?;

    Ok(UserPermissionsResponse {
        user_id,
        overrides,
        effective: effective.names().map(String::from).collect(),
    })
}

/// Get a user's permission overrides and effective permission set
#[utoipa::path(
    get,
    path = "/admin/user-permissions/{user_id}",
    tag = "permissions",
    security(("BearerAuth" = [])),
    params(("user_id" = uuid::Uuid, Path, description = "User to inspect")),
    responses(
        (status = 200, description = "Permission state", body = UserPermissionsResponse),
        (status = 403, description = "Insufficient permissions"),
        (status = 404, description = "Not found"),
    )
)]
#[tracing::instrument(skip_all, fields(user_id = %user_id))]
pub async fn get_user_permissions(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(user_id): Path<UserId>,
) -> Result<Json<UserPermissionsResponse>, Error> {
    require_permission(&state, &user, "user", Action::Read).await?;

    Ok(Json(permission_state(&state, user_id).await?))
}

/// Set a permission override for a user
///
/// `granted: true` extends the user's role defaults, `granted: false`
/// carves a permission out of them. Upserting the same permission
/// replaces the previous override.
#[utoipa::path(
    put,
    path = "/admin/user-permissions/{user_id}",
    request_body = SetPermissionRequest,
    tag = "permissions",
    security(("BearerAuth" = [])),
    params(("user_id" = uuid::Uuid, Path, description = "User to modify")),
    responses(
        (status = 200, description = "Updated permission state", body = UserPermissionsResponse),
        (status = 403, description = "Insufficient permissions"),
        (status = 404, description = "Not found"),
    )
)]
#[tracing::instrument(skip_all, fields(user_id = %user_id, permission = %request.permission))]
pub async fn set_user_permission(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(user_id): Path<UserId>,
    Json(request): Json<SetPermissionRequest>,
) -> Result<Json<UserPermissionsResponse>, Error> {
    require_permission(&state, &user, "user", Action::Update).await?;

    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;

    if Users::new(&mut conn).get_by_id(user_id).await?.is_none() {
        return Err(Error::NotFound {
            resource: "User".to_string(),
            id: user_id.to_string(),
        });
    }

    let mut permissions = Permissions::new(&mut conn);
    let permission = permissions.get_by_name(&request.permission).await?;
    permissions
        .set_override(&crate::db::models::permissions::UserPermissionUpsertDBRequest {
            user_id,
            permission_id: permission.id,
            granted: request.granted,
            granted_by: user.id,
        })
        .await?;
    drop(conn);

    tracing::info!(
        target_user = %user_id,
        permission = %request.permission,
        granted = request.granted,
        "Permission override set"
    );

    Ok(Json(permission_state(&state, user_id).await?))
}

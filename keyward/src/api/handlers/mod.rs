//! Axum route handlers.

pub mod auth;
pub mod permissions;
pub mod users;

use crate::{
    api::models::users::CurrentUser,
    auth::permissions::has_permission,
    errors::{Error, Result},
    types::Action,
    AppState,
};

/// Gate a handler on the caller holding `resource:action`.
///
/// Every protected route goes through this one check; handlers never
/// inspect roles directly.
pub async fn require_permission(state: &AppState, user: &CurrentUser, resource: &str, action: Action) -> Result<()> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;

    if has_permission(&mut conn, user.id, resource, action).await? {
        Ok(())
    } else {
        Err(Error::InsufficientPermissions {
            resource: resource.to_string(),
            action,
        })
    }
}

//! Database models for access-control reference data.

use crate::types::{Action, PermissionId, ResourceTypeId, UserId};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Database response for a permission definition
#[derive(Debug, Clone, FromRow)]
pub struct PermissionDBResponse {
    pub id: PermissionId,
    pub name: String,
    pub description: Option<String>,
    pub resource_type_id: ResourceTypeId,
    pub action: Action,
    #[sqlx(default)]
    pub resource_type: String,
}

/// A per-user override row
#[derive(Debug, Clone, FromRow)]
pub struct UserPermissionDBResponse {
    pub user_id: UserId,
    pub permission_id: PermissionId,
    pub granted: bool,
    pub granted_by: Option<UserId>,
    pub updated_at: DateTime<Utc>,
}

/// Database request for upserting an override
#[derive(Debug, Clone)]
pub struct UserPermissionUpsertDBRequest {
    pub user_id: UserId,
    pub permission_id: PermissionId,
    pub granted: bool,
    pub granted_by: UserId,
}

/// One override joined with its permission name, for the admin read surface
#[derive(Debug, Clone, FromRow)]
pub struct UserPermissionDetail {
    pub permission_name: String,
    pub resource_type: String,
    pub action: Action,
    pub granted: bool,
    pub granted_by: Option<UserId>,
}

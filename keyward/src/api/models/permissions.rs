//! Request/response models for permission administration.

use crate::types::UserId;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One override as exposed to administrators
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OverrideResponse {
    pub permission: String,
    pub granted: bool,
    #[schema(value_type = Option<uuid::Uuid>)]
    pub granted_by: Option<UserId>,
}

/// A user's permission state: overrides plus the resolved effective set
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserPermissionsResponse {
    #[schema(value_type = uuid::Uuid)]
    pub user_id: UserId,
    pub overrides: Vec<OverrideResponse>,
    /// Effective permission names after merging role defaults and overrides
    pub effective: Vec<String>,
}

/// Upsert an override for a user
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SetPermissionRequest {
    /// Permission name, e.g. `product:read`
    pub permission: String,
    pub granted: bool,
}

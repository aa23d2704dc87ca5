//! Database repository for access-control reference data and overrides.

use crate::db::{
    errors::{DbError, Result},
    models::permissions::{
        PermissionDBResponse, UserPermissionDBResponse, UserPermissionDetail, UserPermissionUpsertDBRequest,
    },
};
use crate::types::{abbrev_uuid, UserId};
use sqlx::PgConnection;
use tracing::instrument;

pub struct Permissions<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Permissions<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Permission names granted to a user through its role.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn role_permissions_for_user(&mut self, user_id: UserId) -> Result<Vec<PermissionDBResponse>> {
        let permissions = sqlx::query_as::<_, PermissionDBResponse>(
            r#"
            SELECT p.*, rt.name AS resource_type
            FROM users u
            JOIN role_permissions rp ON rp.role_id = u.role_id
            JOIN permissions p ON p.id = rp.permission_id
            JOIN resource_types rt ON rt.id = p.resource_type_id
            WHERE u.id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(permissions)
    }

    /// Per-user override rows joined with their permission definitions.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn overrides_for_user(&mut self, user_id: UserId) -> Result<Vec<UserPermissionDetail>> {
        let overrides = sqlx::query_as::<_, UserPermissionDetail>(
            r#"
            SELECT p.name AS permission_name, rt.name AS resource_type, p.action, up.granted, up.granted_by
            FROM user_permissions up
            JOIN permissions p ON p.id = up.permission_id
            JOIN resource_types rt ON rt.id = p.resource_type_id
            WHERE up.user_id = $1
            ORDER BY p.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(overrides)
    }

    /// Look a permission up by its unique name, e.g. `product:read`.
    #[instrument(skip(self), err)]
    pub async fn get_by_name(&mut self, name: &str) -> Result<PermissionDBResponse> {
        let permission = sqlx::query_as::<_, PermissionDBResponse>(
            r#"
            SELECT p.*, rt.name AS resource_type
            FROM permissions p
            JOIN resource_types rt ON rt.id = p.resource_type_id
            WHERE p.name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&mut *self.db)
        .await?;

        permission.ok_or(DbError::NotFound)
    }

    /// Upsert an override. The composite primary key guarantees at most one
    /// row per (user, permission); a second write replaces the first.
    #[instrument(
        skip(self, request),
        fields(user_id = %abbrev_uuid(&request.user_id), permission_id = request.permission_id, granted = request.granted),
        err
    )]
    pub async fn set_override(&mut self, request: &UserPermissionUpsertDBRequest) -> Result<UserPermissionDBResponse> {
        let row = sqlx::query_as::<_, UserPermissionDBResponse>(
            r#"
            INSERT INTO user_permissions (user_id, permission_id, granted, granted_by)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, permission_id)
            DO UPDATE SET granted = EXCLUDED.granted, granted_by = EXCLUDED.granted_by, updated_at = NOW()
            RETURNING user_id, permission_id, granted, granted_by, updated_at
            "#,
        )
        .bind(request.user_id)
        .bind(request.permission_id)
        .bind(request.granted)
        .bind(request.granted_by)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(row)
    }

    /// Remove an override, restoring the role default for that permission.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn clear_override(&mut self, user_id: UserId, permission_id: i32) -> Result<bool> {
        let result = sqlx::query("DELETE FROM user_permissions WHERE user_id = $1 AND permission_id = $2")
            .bind(user_id)
            .bind(permission_id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_admin, create_test_user};
    use crate::types::Action;
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_role_permissions_follow_seed(pool: PgPool) {
        let member = create_test_user(&pool, "member").await;
        let admin = create_test_admin(&pool).await;

        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Permissions::new(&mut conn);

        let member_perms = repo.role_permissions_for_user(member.id).await.unwrap();
        assert_eq!(member_perms.len(), 1);
        assert_eq!(member_perms[0].name, "product:read");

        let admin_perms = repo.role_permissions_for_user(admin.id).await.unwrap();
        assert!(admin_perms.iter().all(|p| p.action == Action::Manage));
        assert!(admin_perms.iter().any(|p| p.resource_type == "user"));
        assert!(admin_perms.iter().any(|p| p.resource_type == "product"));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_set_override_upserts(pool: PgPool) {
        let member = create_test_user(&pool, "member").await;
        let admin = create_test_admin(&pool).await;

        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Permissions::new(&mut conn);

        let permission = repo.get_by_name("product:update").await.unwrap();

        let request = UserPermissionUpsertDBRequest {
            user_id: member.id,
            permission_id: permission.id,
            granted: true,
            granted_by: admin.id,
        };
        let row = repo.set_override(&request).await.unwrap();
        assert!(row.granted);

        // Second write replaces, it does not duplicate
        let request = UserPermissionUpsertDBRequest {
            granted: false,
            ..request
        };
        let row = repo.set_override(&request).await.unwrap();
        assert!(!row.granted);

        let overrides = repo.overrides_for_user(member.id).await.unwrap();
        assert_eq!(overrides.len(), 1);
        assert!(!overrides[0].granted);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_clear_override_restores_default(pool: PgPool) {
        let member = create_test_user(&pool, "member").await;
        let admin = create_test_admin(&pool).await;

        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Permissions::new(&mut conn);

        let permission = repo.get_by_name("product:read").await.unwrap();
        repo.set_override(&UserPermissionUpsertDBRequest {
            user_id: member.id,
            permission_id: permission.id,
            granted: false,
            granted_by: admin.id,
        })
        .await
        .unwrap();

        assert!(repo.clear_override(member.id, permission.id).await.unwrap());
        assert!(!repo.clear_override(member.id, permission.id).await.unwrap());
        assert!(repo.overrides_for_user(member.id).await.unwrap().is_empty());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_unknown_permission_name(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Permissions::new(&mut conn);

        let err = repo.get_by_name("spaceship:launch").await.unwrap_err();
        assert!(matches!(err, DbError::NotFound));
    }
}

//! Database repository for sessions and refresh-token rotation.
//!
//! A session owns a chain of refresh tokens of which at most one is usable
//! at any time. Rotation retires the presented token and issues its
//! successor inside a single transaction; the atomic claim UPDATE is what
//! serialises two concurrent rotations of the same secret. Presenting a
//! secret whose row is already revoked is treated as replay and kills the
//! whole session.

use crate::db::{
    errors::Result,
    models::sessions::{NewSession, RefreshTokenDBResponse, RotatedSession, SessionDBResponse},
};
use crate::errors::AuthFailure;
use crate::types::{abbrev_uuid, SessionId, UserId};
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, Utc};
use rand::prelude::RngExt;
use rand::rng;
use sha2::{Digest, Sha256};
use sqlx::{Connection, PgConnection};
use tracing::instrument;
use uuid::Uuid;

/// Generate an opaque refresh secret: 32 random bytes, base64url without padding.
pub fn generate_refresh_secret() -> String {
    let mut secret_bytes = [0u8; 32];
    rng().fill(&mut secret_bytes);

    general_purpose::URL_SAFE_NO_PAD.encode(secret_bytes)
}

/// Hex SHA-256 digest of a refresh secret. The digest is the only form that
/// is ever persisted or compared.
pub fn refresh_secret_hash(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    format!("{digest:x}")
}

/// Outcome of a rotation attempt.
#[derive(Debug)]
pub enum RotateOutcome {
    Rotated(RotatedSession),
    /// The presented secret cannot be used: unknown, expired, or attached to
    /// a dead session. The failure kind distinguishes replay from the rest.
    Rejected(AuthFailure),
}

pub struct Sessions<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Sessions<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Create a session and its first refresh token.
    ///
    /// Returns the raw secret exactly once; only its digest is stored.
    #[instrument(skip(self, now, ttl), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn create(&mut self, user_id: UserId, now: DateTime<Utc>, ttl: Duration) -> Result<NewSession> {
        let secret = generate_refresh_secret();
        let expires_at = now + ttl;

        let mut tx = self.db.begin().await?;

        let session = sqlx::query_as::<_, SessionDBResponse>(
            r#"
            INSERT INTO user_sessions (id, user_id, expires_at)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(expires_at)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, session_id, token_hash, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(session.id)
        .bind(refresh_secret_hash(&secret))
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(NewSession {
            session,
            refresh_secret: secret,
        })
    }

    /// Rotate a refresh token: retire the presented secret and issue its
    /// successor atomically.
    ///
    /// The claim UPDATE only matches a non-revoked, non-expired token on a
    /// live session, so of two concurrent calls with the same secret exactly
    /// one claims the row. The loser, and any later replay of a retired
    /// secret, finds the row already revoked; that revokes the entire
    /// session and every token in it.
    #[instrument(skip_all, err)]
    pub async fn rotate(&mut self, raw_secret: &str, now: DateTime<Utc>) -> Result<RotateOutcome> {
        let hash = refresh_secret_hash(raw_secret);

        let mut tx = self.db.begin().await?;

        let claimed: Option<(SessionId, UserId, DateTime<Utc>)> = sqlx::query_as(
            r#"
            UPDATE refresh_tokens rt
            SET revoked = TRUE
            FROM user_sessions s
            WHERE rt.token_hash = $1
              AND rt.session_id = s.id
              AND NOT rt.revoked
              AND rt.expires_at > $2
              AND NOT s.revoked
              AND s.expires_at > $2
            RETURNING s.id, s.user_id, s.expires_at
            "#,
        )
        .bind(&hash)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((session_id, user_id, session_expires_at)) = claimed else {
            // Classify the failure; an already-revoked row on a live session
            // means the secret was replayed
            let existing = sqlx::query_as::<_, RefreshTokenDBResponse>(
                "SELECT * FROM refresh_tokens WHERE token_hash = $1",
            )
            .bind(&hash)
            .fetch_optional(&mut *tx)
            .await?;

            let failure = match existing {
                Some(token) if token.revoked => {
                    Self::revoke_in_tx(&mut tx, token.session_id).await?;
                    tracing::warn!(
                        session_id = %abbrev_uuid(&token.session_id),
                        "Refresh secret reuse detected, session revoked"
                    );
                    AuthFailure::SessionRevoked
                }
                Some(_) => AuthFailure::InvalidRefresh,
                None => AuthFailure::InvalidRefresh,
            };

            tx.commit().await?;
            return Ok(RotateOutcome::Rejected(failure));
        };

        let secret = generate_refresh_secret();
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, session_id, token_hash, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(session_id)
        .bind(refresh_secret_hash(&secret))
        .bind(session_expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(RotateOutcome::Rotated(RotatedSession {
            session_id,
            user_id,
            refresh_secret: secret,
        }))
    }

    /// Revoke a session and every refresh token attached to it. Idempotent.
    #[instrument(skip(self), fields(session_id = %abbrev_uuid(&session_id)), err)]
    pub async fn revoke(&mut self, session_id: SessionId) -> Result<()> {
        let mut tx = self.db.begin().await?;
        Self::revoke_in_tx(&mut tx, session_id).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn revoke_in_tx(tx: &mut sqlx::PgTransaction<'_>, session_id: SessionId) -> Result<()> {
        sqlx::query("UPDATE user_sessions SET revoked = TRUE WHERE id = $1")
            .bind(session_id)
            .execute(&mut **tx)
            .await?;

        sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE session_id = $1")
            .bind(session_id)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }

    /// Revoke every session belonging to a user, e.g. after a password change.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn revoke_all_for_user(&mut self, user_id: UserId) -> Result<u64> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            UPDATE refresh_tokens SET revoked = TRUE
            WHERE session_id IN (SELECT id FROM user_sessions WHERE user_id = $1)
            "#,
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query("UPDATE user_sessions SET revoked = TRUE WHERE user_id = $1 AND NOT revoked")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(result.rows_affected())
    }

    /// Fetch a session row, live or not.
    #[instrument(skip(self), fields(session_id = %abbrev_uuid(&session_id)), err)]
    pub async fn get_by_id(&mut self, session_id: SessionId) -> Result<Option<SessionDBResponse>> {
        let session = sqlx::query_as::<_, SessionDBResponse>("SELECT * FROM user_sessions WHERE id = $1")
            .bind(session_id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(session)
    }

    /// True if the session exists, is not revoked, and has not expired.
    pub async fn is_live(&mut self, session_id: SessionId, now: DateTime<Utc>) -> Result<bool> {
        let session = self.get_by_id(session_id).await?;
        Ok(matches!(session, Some(s) if !s.revoked && s.expires_at > now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_user;
    use sqlx::PgPool;

    async fn new_session(pool: &PgPool, user_id: UserId) -> NewSession {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Sessions::new(&mut conn);
        repo.create(user_id, Utc::now(), Duration::days(1)).await.unwrap()
    }

    #[test]
    fn test_refresh_secret_shape() {
        let s1 = generate_refresh_secret();
        let s2 = generate_refresh_secret();

        assert_ne!(s1, s2);
        // base64url of 32 bytes, no padding
        assert_eq!(s1.len(), 43);
        assert!(s1.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_secret_hash_is_deterministic_hex() {
        let secret = "some-refresh-secret";
        let h1 = refresh_secret_hash(secret);
        let h2 = refresh_secret_hash(secret);

        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert_ne!(h1, refresh_secret_hash("other-secret"));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_create_stores_only_digest(pool: PgPool) {
        let user = create_test_user(&pool, "member").await;
        let new = new_session(&pool, user.id).await;

        let row: (String,) = sqlx::query_as("SELECT token_hash FROM refresh_tokens WHERE session_id = $1")
            .bind(new.session.id)
            .fetch_one(&pool)
            .await
            .unwrap();

        assert_ne!(row.0, new.refresh_secret);
        assert_eq!(row.0, refresh_secret_hash(&new.refresh_secret));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_rotate_issues_successor_and_retires_old(pool: PgPool) {
        let user = create_test_user(&pool, "member").await;
        let new = new_session(&pool, user.id).await;

        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Sessions::new(&mut conn);

        let outcome = repo.rotate(&new.refresh_secret, Utc::now()).await.unwrap();
        let rotated = match outcome {
            RotateOutcome::Rotated(r) => r,
            RotateOutcome::Rejected(kind) => panic!("rotation rejected: {kind}"),
        };
        assert_eq!(rotated.session_id, new.session.id);
        assert_eq!(rotated.user_id, user.id);
        assert_ne!(rotated.refresh_secret, new.refresh_secret);

        // Exactly one usable token remains on the session
        let (live,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM refresh_tokens WHERE session_id = $1 AND NOT revoked")
                .bind(new.session.id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(live, 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_replayed_secret_revokes_whole_session(pool: PgPool) {
        let user = create_test_user(&pool, "member").await;
        let new = new_session(&pool, user.id).await;

        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Sessions::new(&mut conn);

        let rotated = match repo.rotate(&new.refresh_secret, Utc::now()).await.unwrap() {
            RotateOutcome::Rotated(r) => r,
            RotateOutcome::Rejected(kind) => panic!("rotation rejected: {kind}"),
        };

        // Replay of the retired secret
        let outcome = repo.rotate(&new.refresh_secret, Utc::now()).await.unwrap();
        assert!(matches!(outcome, RotateOutcome::Rejected(AuthFailure::SessionRevoked)));

        // The cascade killed the freshly issued secret as well
        let outcome = repo.rotate(&rotated.refresh_secret, Utc::now()).await.unwrap();
        assert!(matches!(outcome, RotateOutcome::Rejected(_)));

        let session = repo.get_by_id(new.session.id).await.unwrap().unwrap();
        assert!(session.revoked);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_unknown_secret_is_invalid_refresh(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Sessions::new(&mut conn);

        let outcome = repo.rotate("never-issued", Utc::now()).await.unwrap();
        assert!(matches!(outcome, RotateOutcome::Rejected(AuthFailure::InvalidRefresh)));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_expired_secret_is_invalid_refresh(pool: PgPool) {
        let user = create_test_user(&pool, "member").await;
        let new = new_session(&pool, user.id).await;

        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Sessions::new(&mut conn);

        // Evaluate rotation as if the TTL had elapsed
        let later = Utc::now() + Duration::days(2);
        let outcome = repo.rotate(&new.refresh_secret, later).await.unwrap();
        assert!(matches!(outcome, RotateOutcome::Rejected(AuthFailure::InvalidRefresh)));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_concurrent_rotation_single_winner(pool: PgPool) {
        let user = create_test_user(&pool, "member").await;
        let new = new_session(&pool, user.id).await;

        let now = Utc::now();
        let secret_a = new.refresh_secret.clone();
        let secret_b = new.refresh_secret.clone();
        let pool_a = pool.clone();
        let pool_b = pool.clone();

        let (a, b) = tokio::join!(
            tokio::spawn(async move {
                let mut conn = pool_a.acquire().await.unwrap();
                Sessions::new(&mut conn).rotate(&secret_a, now).await.unwrap()
            }),
            tokio::spawn(async move {
                let mut conn = pool_b.acquire().await.unwrap();
                Sessions::new(&mut conn).rotate(&secret_b, now).await.unwrap()
            }),
        );

        let outcomes = [a.unwrap(), b.unwrap()];
        let wins = outcomes.iter().filter(|o| matches!(o, RotateOutcome::Rotated(_))).count();
        let losses = outcomes.iter().filter(|o| matches!(o, RotateOutcome::Rejected(_))).count();

        assert_eq!(wins, 1);
        assert_eq!(losses, 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_revoke_is_idempotent(pool: PgPool) {
        let user = create_test_user(&pool, "member").await;
        let new = new_session(&pool, user.id).await;

        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Sessions::new(&mut conn);

        repo.revoke(new.session.id).await.unwrap();
        repo.revoke(new.session.id).await.unwrap();

        let session = repo.get_by_id(new.session.id).await.unwrap().unwrap();
        assert!(session.revoked);

        let outcome = repo.rotate(&new.refresh_secret, Utc::now()).await.unwrap();
        assert!(matches!(outcome, RotateOutcome::Rejected(AuthFailure::SessionRevoked)));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_revoke_all_for_user(pool: PgPool) {
        let user = create_test_user(&pool, "member").await;
        let s1 = new_session(&pool, user.id).await;
        let s2 = new_session(&pool, user.id).await;

        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Sessions::new(&mut conn);

        let revoked = repo.revoke_all_for_user(user.id).await.unwrap();
        assert_eq!(revoked, 2);

        for secret in [&s1.refresh_secret, &s2.refresh_secret] {
            let outcome = repo.rotate(secret, Utc::now()).await.unwrap();
            assert!(matches!(outcome, RotateOutcome::Rejected(_)));
        }
    }
}

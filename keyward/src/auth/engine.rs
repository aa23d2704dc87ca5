//! Login, refresh and logout orchestration.
//!
//! The engine is the only component that writes session state. It wires the
//! credential verifier, the session store and the token codec together and
//! translates every failure into an [`AuthFailure`] kind before it reaches
//! the HTTP layer.

use chrono::Utc;
use sqlx::PgPool;
use tracing::instrument;

use crate::{
    auth::password::{self, DUMMY_HASH},
    auth::tokens,
    config::Config,
    db::handlers::sessions::{RotateOutcome, Sessions},
    db::handlers::Users,
    errors::{AuthFailure, Error, Result},
    types::SessionId,
};

/// Credentials handed back to a client after login or refresh.
#[derive(Debug)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_secret: String,
    pub session_id: SessionId,
}

/// Authenticate an email/password pair and open a session.
///
/// The password check runs even when the email is unknown, against a fixed
/// dummy hash, so the unknown-email path takes as long as a wrong-password
/// one. The activity check happens only after the credential check for the
/// same reason.
#[instrument(skip_all, fields(email = %email), err)]
pub async fn login(
    pool: &PgPool,
    config: &Config,
    email: &str,
    password: &str,
    fingerprint: &str,
    remember_me: bool,
) -> Result<IssuedTokens> {
    let mut conn = pool.acquire().await.map_err(crate::db::errors::DbError::from)?;

    let user = Users::new(&mut conn).get_by_email(email).await?;

    let stored_hash = user.as_ref().map(|u| u.password_hash.clone()).unwrap_or_else(|| DUMMY_HASH.to_string());

    // Argon2 is CPU-bound; keep it off the async workers
    let submitted = password.to_string();
    let verified = tokio::task::spawn_blocking(move || password::verify_password(&submitted, &stored_hash))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("join password verification task: {e}"),
        })??;

    let Some(user) = user else {
        return Err(Error::unauthorized(AuthFailure::InvalidCredentials));
    };
    if !verified {
        return Err(Error::unauthorized(AuthFailure::InvalidCredentials));
    }
    if !user.is_active {
        return Err(Error::unauthorized(AuthFailure::AccountInactive));
    }

    let ttl = if remember_me {
        config.auth.tokens.remember_me_refresh_ttl
    } else {
        config.auth.tokens.refresh_ttl
    };
    let now = Utc::now();
    let session_ttl = chrono::Duration::from_std(ttl).map_err(|e| Error::Internal {
        operation: format!("convert session ttl: {e}"),
    })?;

    let new_session = Sessions::new(&mut conn).create(user.id, now, session_ttl).await?;

    let access_token = tokens::mint_access_token(
        user.id,
        new_session.session.id,
        fingerprint,
        now,
        config.auth.tokens.access_ttl,
        config.secret_key()?,
    )?;

    tracing::info!(session_id = %crate::types::abbrev_uuid(&new_session.session.id), "Login succeeded");

    Ok(IssuedTokens {
        access_token,
        refresh_secret: new_session.refresh_secret,
        session_id: new_session.session.id,
    })
}

/// Exchange a refresh secret for a fresh token pair.
///
/// The access token is minted only after the rotation has committed; a
/// rejected rotation never issues anything.
#[instrument(skip_all, err)]
pub async fn refresh(pool: &PgPool, config: &Config, raw_secret: &str, fingerprint: &str) -> Result<IssuedTokens> {
    let mut conn = pool.acquire().await.map_err(crate::db::errors::DbError::from)?;

    let now = Utc::now();
    let rotated = match Sessions::new(&mut conn).rotate(raw_secret, now).await? {
        RotateOutcome::Rotated(rotated) => rotated,
        RotateOutcome::Rejected(kind) => return Err(Error::unauthorized(kind)),
    };

    let access_token = tokens::mint_access_token(
        rotated.user_id,
        rotated.session_id,
        fingerprint,
        now,
        config.auth.tokens.access_ttl,
        config.secret_key()?,
    )?;

    Ok(IssuedTokens {
        access_token,
        refresh_secret: rotated.refresh_secret,
        session_id: rotated.session_id,
    })
}

/// Revoke a session. Revoking an already-revoked session is not an error.
#[instrument(skip(pool), fields(session_id = %crate::types::abbrev_uuid(&session_id)), err)]
pub async fn logout(pool: &PgPool, session_id: SessionId) -> Result<()> {
    let mut conn = pool.acquire().await.map_err(crate::db::errors::DbError::from)?;
    Sessions::new(&mut conn).revoke(session_id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_config, create_test_user_with_password};
    use sqlx::PgPool;

    const PASSWORD: &str = "correct horse battery staple";
    const FP: &str = "fingerprint-digest";

    #[sqlx::test]
    #[test_log::test]
    async fn test_login_issues_usable_tokens(pool: PgPool) {
        let config = create_test_config();
        let user = create_test_user_with_password(&pool, PASSWORD).await;

        let issued = login(&pool, &config, &user.email, PASSWORD, FP, false).await.unwrap();

        let claims = tokens::decode_access_token(&issued.access_token, FP, config.secret_key().unwrap()).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.sid, issued.session_id);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_login_wrong_password(pool: PgPool) {
        let config = create_test_config();
        let user = create_test_user_with_password(&pool, PASSWORD).await;

        let err = login(&pool, &config, &user.email, "not the password", FP, false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Unauthorized {
                kind: AuthFailure::InvalidCredentials
            }
        ));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_login_unknown_email(pool: PgPool) {
        let config = create_test_config();

        let err = login(&pool, &config, "nobody@example.com", PASSWORD, FP, false)
            .await
            .unwrap_err();
        // Same failure kind as a wrong password, so responses cannot be
        // used to probe which emails exist
        assert!(matches!(
            err,
            Error::Unauthorized {
                kind: AuthFailure::InvalidCredentials
            }
        ));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_login_inactive_account(pool: PgPool) {
        let config = create_test_config();
        let user = create_test_user_with_password(&pool, PASSWORD).await;

        let mut conn = pool.acquire().await.unwrap();
        crate::db::handlers::Repository::delete(&mut Users::new(&mut conn), user.id)
            .await
            .unwrap();

        let err = login(&pool, &config, &user.email, PASSWORD, FP, false).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Unauthorized {
                kind: AuthFailure::AccountInactive
            }
        ));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_remember_me_extends_session(pool: PgPool) {
        let config = create_test_config();
        let user = create_test_user_with_password(&pool, PASSWORD).await;

        let issued = login(&pool, &config, &user.email, PASSWORD, FP, true).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let session = Sessions::new(&mut conn).get_by_id(issued.session_id).await.unwrap().unwrap();
        assert!(session.expires_at > Utc::now() + chrono::Duration::days(13));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_full_session_lifecycle(pool: PgPool) {
        let config = create_test_config();
        let user = create_test_user_with_password(&pool, PASSWORD).await;

        let issued = login(&pool, &config, &user.email, PASSWORD, FP, false).await.unwrap();

        // Rotate once
        let refreshed = refresh(&pool, &config, &issued.refresh_secret, FP).await.unwrap();
        assert_eq!(refreshed.session_id, issued.session_id);
        assert_ne!(refreshed.refresh_secret, issued.refresh_secret);

        // The retired secret is now a replay signal
        let err = refresh(&pool, &config, &issued.refresh_secret, FP).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Unauthorized {
                kind: AuthFailure::SessionRevoked
            }
        ));

        // The replay killed the session, taking the newest secret with it
        let err = refresh(&pool, &config, &refreshed.refresh_secret, FP).await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized { .. }));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_logout_kills_refresh_chain(pool: PgPool) {
        let config = create_test_config();
        let user = create_test_user_with_password(&pool, PASSWORD).await;

        let issued = login(&pool, &config, &user.email, PASSWORD, FP, false).await.unwrap();

        logout(&pool, issued.session_id).await.unwrap();
        // Idempotent
        logout(&pool, issued.session_id).await.unwrap();

        let err = refresh(&pool, &config, &issued.refresh_secret, FP).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Unauthorized {
                kind: AuthFailure::SessionRevoked
            }
        ));
    }
}

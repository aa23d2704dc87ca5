//! Request authentication: bearer-token extraction and fingerprinting.

use crate::{
    api::models::users::CurrentUser,
    auth::tokens,
    db::handlers::{Repository, Sessions, Users},
    errors::{AuthFailure, Error, Result},
    AppState,
};
use axum::{extract::FromRequestParts, http::request::Parts};
use chrono::Utc;
use tracing::instrument;

/// Client fingerprint for the current request.
///
/// Derived from attributes that are stable for one client: the user agent
/// and the forwarded client address (falling back to empty when a proxy
/// does not supply one). Only the digest leaves this function.
#[derive(Debug, Clone)]
pub struct Fingerprint(pub String);

fn header_str<'a>(parts: &'a Parts, name: &str) -> &'a str {
    parts.headers.get(name).and_then(|h| h.to_str().ok()).unwrap_or("")
}

pub fn request_fingerprint(parts: &Parts) -> Fingerprint {
    let user_agent = header_str(parts, "user-agent");
    let addr = header_str(parts, "x-forwarded-for");
    // Proxies append hops; only the original client address is stable
    let addr = addr.split(',').next().unwrap_or("").trim();

    Fingerprint(tokens::derive_fingerprint(user_agent, addr))
}

impl<S> FromRequestParts<S> for Fingerprint
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> std::result::Result<Self, Self::Rejection> {
        Ok(request_fingerprint(parts))
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let auth_header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .ok_or(Error::unauthorized(AuthFailure::InvalidCredentials))?;

        let auth_str = auth_header.to_str().map_err(|e| Error::BadRequest {
            message: format!("Invalid authorization header: {e}"),
        })?;

        let token = auth_str
            .strip_prefix("Bearer ")
            .ok_or(Error::unauthorized(AuthFailure::InvalidCredentials))?;

        let fingerprint = request_fingerprint(parts);
        let claims = tokens::decode_access_token(token, &fingerprint.0, state.config.secret_key()?)?;

        let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;

        // A revoked session invalidates its access tokens immediately, not
        // just at the next refresh
        if !Sessions::new(&mut conn).is_live(claims.sid, Utc::now()).await? {
            return Err(Error::unauthorized(AuthFailure::SessionRevoked));
        }

        let user = Users::new(&mut conn)
            .get_by_id(claims.sub)
            .await?
            .ok_or(Error::unauthorized(AuthFailure::InvalidCredentials))?;

        if !user.is_active {
            return Err(Error::unauthorized(AuthFailure::AccountInactive));
        }

        Ok(CurrentUser {
            id: user.id,
            email: user.email,
            display_name: user.display_name,
            role_name: user.role_name,
            session_id: claims.sid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::engine;
    use crate::test_utils::{create_test_config, create_test_user_with_password};
    use axum::extract::FromRequestParts as _;
    use sqlx::PgPool;

    const PASSWORD: &str = "correct horse battery staple";

    fn parts_with_headers(headers: &[(&str, &str)]) -> Parts {
        let mut builder = axum::http::Request::builder().uri("http://localhost/test");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (parts, _body) = builder.body(()).unwrap().into_parts();
        parts
    }

    fn client_headers<'a>(token: &'a str) -> Vec<(&'a str, &'a str)> {
        vec![
            ("authorization", token),
            ("user-agent", "test-agent"),
            ("x-forwarded-for", "198.51.100.7"),
        ]
    }

    fn test_state(pool: PgPool) -> AppState {
        AppState::builder().db(pool).config(create_test_config()).build()
    }

    #[test]
    fn test_fingerprint_ignores_proxy_hops() {
        let direct = parts_with_headers(&[("user-agent", "a"), ("x-forwarded-for", "198.51.100.7")]);
        let hopped = parts_with_headers(&[("user-agent", "a"), ("x-forwarded-for", "198.51.100.7, 10.0.0.1")]);
        assert_eq!(request_fingerprint(&direct).0, request_fingerprint(&hopped).0);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_valid_bearer_token_extracts_user(pool: PgPool) {
        let state = test_state(pool.clone());
        let user = create_test_user_with_password(&pool, PASSWORD).await;

        let fp = request_fingerprint(&parts_with_headers(&client_headers("")));
        let issued = engine::login(&pool, &state.config, &user.email, PASSWORD, &fp.0, false)
            .await
            .unwrap();

        let bearer = format!("Bearer {}", issued.access_token);
        let mut parts = parts_with_headers(&client_headers(&bearer));

        let current = CurrentUser::from_request_parts(&mut parts, &state).await.unwrap();
        assert_eq!(current.id, user.id);
        assert_eq!(current.session_id, issued.session_id);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_token_from_other_client_rejected(pool: PgPool) {
        let state = test_state(pool.clone());
        let user = create_test_user_with_password(&pool, PASSWORD).await;

        let fp = request_fingerprint(&parts_with_headers(&client_headers("")));
        let issued = engine::login(&pool, &state.config, &user.email, PASSWORD, &fp.0, false)
            .await
            .unwrap();

        // Same token, different user agent
        let bearer = format!("Bearer {}", issued.access_token);
        let mut parts = parts_with_headers(&[
            ("authorization", &bearer),
            ("user-agent", "another-agent"),
            ("x-forwarded-for", "198.51.100.7"),
        ]);

        let err = CurrentUser::from_request_parts(&mut parts, &state).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Unauthorized {
                kind: AuthFailure::FingerprintMismatch
            }
        ));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_logout_invalidates_access_token(pool: PgPool) {
        let state = test_state(pool.clone());
        let user = create_test_user_with_password(&pool, PASSWORD).await;

        let fp = request_fingerprint(&parts_with_headers(&client_headers("")));
        let issued = engine::login(&pool, &state.config, &user.email, PASSWORD, &fp.0, false)
            .await
            .unwrap();

        engine::logout(&pool, issued.session_id).await.unwrap();

        let bearer = format!("Bearer {}", issued.access_token);
        let mut parts = parts_with_headers(&client_headers(&bearer));
        let err = CurrentUser::from_request_parts(&mut parts, &state).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Unauthorized {
                kind: AuthFailure::SessionRevoked
            }
        ));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_missing_header_rejected(pool: PgPool) {
        let state = test_state(pool);
        let mut parts = parts_with_headers(&[("user-agent", "test-agent")]);

        let err = CurrentUser::from_request_parts(&mut parts, &state).await.unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::UNAUTHORIZED);
    }
}

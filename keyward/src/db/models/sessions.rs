//! Database models for sessions and their refresh-token chains.

use crate::types::{RefreshTokenId, SessionId, UserId};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Database response for a session
#[derive(Debug, Clone, FromRow)]
pub struct SessionDBResponse {
    pub id: SessionId,
    pub user_id: UserId,
    pub revoked: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Database response for a refresh token row.
///
/// Only the SHA-256 digest of the secret ever touches the database.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshTokenDBResponse {
    pub id: RefreshTokenId,
    pub session_id: SessionId,
    pub token_hash: String,
    pub revoked: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A freshly created session together with the raw refresh secret.
///
/// The secret exists only in this value; it is handed to the client once and
/// cannot be recovered afterwards.
#[derive(Debug)]
pub struct NewSession {
    pub session: SessionDBResponse,
    pub refresh_secret: String,
}

/// Result of a successful refresh rotation.
#[derive(Debug)]
pub struct RotatedSession {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub refresh_secret: String,
}

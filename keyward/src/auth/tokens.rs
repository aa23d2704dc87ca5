//! Access-token minting and verification.
//!
//! Access tokens are short-lived HS256 JWTs bound to a client fingerprint.
//! The algorithm is pinned on both sides: the header of a presented token
//! must claim HS256 or the token is rejected outright, so a forged header
//! cannot steer verification onto a weaker scheme.

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    errors::{AuthFailure, Error},
    types::{SessionId, UserId},
};

/// Access-token claims
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: UserId,    // Subject (user ID)
    pub sid: SessionId, // Session the token belongs to
    pub jti: Uuid,      // Unique token id
    pub fp: String,     // Client fingerprint digest
    pub exp: i64,       // Expiration time
    pub iat: i64,       // Issued at
}

/// Derive a stable fingerprint digest from request attributes.
///
/// The inputs are whatever the HTTP layer considers stable for one client
/// (user agent plus a source-address salt); only the digest is embedded in
/// tokens or compared.
pub fn derive_fingerprint(user_agent: &str, addr_salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_agent.as_bytes());
    hasher.update(b"\x00");
    hasher.update(addr_salt.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Mint a signed access token bound to a session and fingerprint.
pub fn mint_access_token(
    user_id: UserId,
    session_id: SessionId,
    fingerprint: &str,
    now: DateTime<Utc>,
    ttl: std::time::Duration,
    secret_key: &str,
) -> Result<String, Error> {
    let claims = AccessClaims {
        sub: user_id,
        sid: session_id,
        jti: Uuid::new_v4(),
        fp: fingerprint.to_string(),
        exp: (now + ttl).timestamp(),
        iat: now.timestamp(),
    };

    let key = EncodingKey::from_secret(secret_key.as_bytes());
    encode(&Header::new(Algorithm::HS256), &claims, &key).map_err(|e| Error::Internal {
        operation: format!("create JWT: {e}"),
    })
}

/// Verify and decode an access token, checking signature, expiry and
/// fingerprint binding in that order.
pub fn decode_access_token(token: &str, current_fingerprint: &str, secret_key: &str) -> Result<AccessClaims, Error> {
    let key = DecodingKey::from_secret(secret_key.as_bytes());
    // Pinned to HS256; a token whose header names any other algorithm fails
    // validation before the signature is even checked
    let validation = Validation::new(Algorithm::HS256);

    let token_data = decode::<AccessClaims>(token, &key, &validation).map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => Error::unauthorized(AuthFailure::TokenExpired),

        // Client errors (401) - malformed tokens, invalid claims, wrong algorithm
        jsonwebtoken::errors::ErrorKind::InvalidToken
        | jsonwebtoken::errors::ErrorKind::InvalidSignature
        | jsonwebtoken::errors::ErrorKind::MissingRequiredClaim(_)
        | jsonwebtoken::errors::ErrorKind::InvalidIssuer
        | jsonwebtoken::errors::ErrorKind::InvalidAudience
        | jsonwebtoken::errors::ErrorKind::InvalidSubject
        | jsonwebtoken::errors::ErrorKind::ImmatureSignature
        | jsonwebtoken::errors::ErrorKind::Base64(_)
        | jsonwebtoken::errors::ErrorKind::InvalidAlgorithm => Error::unauthorized(AuthFailure::BadSignature),

        // Server errors (500) - key issues, internal failures
        jsonwebtoken::errors::ErrorKind::InvalidEcdsaKey
        | jsonwebtoken::errors::ErrorKind::InvalidRsaKey(_)
        | jsonwebtoken::errors::ErrorKind::RsaFailedSigning
        | jsonwebtoken::errors::ErrorKind::InvalidAlgorithmName
        | jsonwebtoken::errors::ErrorKind::InvalidKeyFormat
        | jsonwebtoken::errors::ErrorKind::MissingAlgorithm
        | jsonwebtoken::errors::ErrorKind::Json(_)
        | jsonwebtoken::errors::ErrorKind::Utf8(_)
        | jsonwebtoken::errors::ErrorKind::Crypto(_) => Error::Internal {
            operation: format!("JWT verification: {e}"),
        },

        // Catch-all for any future error variants (default to server error for safety)
        _ => Error::Internal {
            operation: format!("JWT verification (unknown error): {e}"),
        },
    })?;

    // Fingerprint binding is checked last: a token with a valid signature
    // presented by a different client is still rejected
    if token_data.claims.fp != current_fingerprint {
        return Err(Error::unauthorized(AuthFailure::FingerprintMismatch));
    }

    Ok(token_data.claims)
}

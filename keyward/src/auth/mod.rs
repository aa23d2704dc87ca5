//! Authentication and authorization.
//!
//! - [`password`]: Argon2id credential hashing and verification
//! - [`tokens`]: signed, fingerprint-bound access tokens
//! - [`engine`]: login / refresh / logout orchestration
//! - [`permissions`]: role + override resolution and the permission check
//! - [`current_user`]: request extraction for protected routes

pub mod current_user;
pub mod engine;
pub mod password;
pub mod permissions;
pub mod tokens;

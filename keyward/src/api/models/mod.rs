//! Request/response data structures for API communication.

pub mod auth;
pub mod permissions;
pub mod users;

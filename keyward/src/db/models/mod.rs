//! Database entity models.

pub mod permissions;
pub mod sessions;
pub mod users;

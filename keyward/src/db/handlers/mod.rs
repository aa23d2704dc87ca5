//! Database repositories.

pub mod permissions;
pub mod repository;
pub mod sessions;
pub mod users;

pub use permissions::Permissions;
pub use repository::Repository;
pub use sessions::Sessions;
pub use users::Users;

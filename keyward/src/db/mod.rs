//! Database layer: repositories, entity models and error classification.

pub mod errors;
pub mod handlers;
pub mod models;

//! Shared types for Chatwire: the error enum, the TOML configuration model,
//! and the backend-agnostic [`auth::AuthState`] blob.

pub mod auth;
pub mod config;
pub mod error;

pub use auth::AuthState;
pub use error::{Error, Result};

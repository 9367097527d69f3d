//! Avatar Service
//!
//! Gravatar-compatible avatar server. Avatars are resolved from the local
//! canonical store, then a chain of remote services, then local defaults.
//! New avatars are uploaded, staged and published after an email
//! confirmation.

pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;

// Public re-exports
pub use config::Config;
pub use error::{AppError, Result};

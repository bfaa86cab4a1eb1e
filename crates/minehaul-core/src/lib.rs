//! Core library for minehaul.
//!
//! Provides the pieces every minehaul front end shares:
//! - `api`: HTTP client for the logistics backend
//! - `auth`: access tokens, token persistence, the session store and route guard
//! - `models`: identities, login sessions, orders and schedules
//! - `config`: persisted client configuration
//! - `utils`: display helpers

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod utils;

pub use api::{ApiClient, ApiError};
pub use auth::{AccessToken, AuthError, AuthState, AuthStatus, SessionStore};
pub use config::Config;

//! REST API client module for the minehaul logistics backend.
//!
//! This module provides the `ApiClient` for authenticating planners,
//! managing their login sessions, and reading orders and schedules.
//!
//! The API uses JWT bearer token authentication obtained through
//! the `/auth/login` endpoint.

pub mod client;
pub mod error;

pub use client::{ApiClient, AuthBackend, LoginResponse};
pub use error::ApiError;

use thiserror::Error;

use crate::api::ApiError;

use super::token::TokenError;

/// Errors surfaced by session store operations.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Backend failure, passed through as returned by the API client.
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Invalid access token: {0}")]
    InvalidToken(#[from] TokenError),

    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("Not signed in")]
    NotAuthenticated,
}

impl AuthError {
    /// Message suitable for showing to a planner.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Api(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}

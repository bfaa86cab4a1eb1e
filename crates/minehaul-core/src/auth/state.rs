use crate::models::{Identity, SessionRecord};

use super::token::AccessToken;

/// Where the store is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthPhase {
    #[default]
    Uninitialized,
    Checking,
    Authenticated,
    Unauthenticated,
}

/// What a consumer may assert about the planner right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    /// Still initializing: show neither "signed in" nor "signed out".
    Unknown,
    Authenticated,
    Unauthenticated,
}

/// Snapshot of the authentication state published by `SessionStore`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthState {
    pub identity: Option<Identity>,
    pub token: Option<AccessToken>,
    /// Last successful `/auth/sessions` fetch, in server order.
    pub sessions: Vec<SessionRecord>,
    pub phase: AuthPhase,
}

impl AuthState {
    pub fn is_initializing(&self) -> bool {
        matches!(self.phase, AuthPhase::Uninitialized | AuthPhase::Checking)
    }

    /// Signed in means both an identity and a token are held.
    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some() && self.token.is_some()
    }

    pub fn status(&self) -> AuthStatus {
        if self.is_initializing() {
            AuthStatus::Unknown
        } else if self.is_authenticated() {
            AuthStatus::Authenticated
        } else {
            AuthStatus::Unauthenticated
        }
    }

    /// Resting logged-out state.
    pub(crate) fn signed_out() -> Self {
        Self {
            phase: AuthPhase::Unauthenticated,
            ..Self::default()
        }
    }
}

//! Authentication module for managing the planner's session.
//!
//! This module provides:
//! - `AccessToken`: JWT decoding for the local expiry check
//! - `TokenStore`: the persisted token slot (keychain, file, or memory)
//! - `SessionStore`: the reactive authentication state and its operations
//! - `guard`: route access decisions derived from that state

pub mod error;
pub mod guard;
pub mod state;
pub mod storage;
pub mod store;
pub mod token;

pub use error::AuthError;
pub use guard::{check_access, Access};
pub use state::{AuthPhase, AuthState, AuthStatus};
pub use storage::{FileTokenStore, KeyringTokenStore, MemoryTokenStore, TokenStore};
pub use store::SessionStore;
pub use token::{AccessToken, TokenError};

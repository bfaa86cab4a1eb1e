//! Route access decisions for authenticated-only screens and commands.

use crate::models::Role;

use super::state::AuthState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Initialization has not settled; defer the decision.
    Pending,
    RedirectToLogin,
    /// Signed in, but the role is not allowed here.
    Forbidden,
    Granted,
}

/// Decide whether the current state may enter a route restricted to `allowed_roles`.
/// An empty `allowed_roles` admits any signed-in planner.
pub fn check_access(state: &AuthState, allowed_roles: &[Role]) -> Access {
    if state.is_initializing() {
        return Access::Pending;
    }

    let identity = match (&state.identity, state.is_authenticated()) {
        (Some(identity), true) => identity,
        _ => return Access::RedirectToLogin,
    };

    if allowed_roles.is_empty() || allowed_roles.contains(&identity.role) {
        Access::Granted
    } else {
        Access::Forbidden
    }
}

//! Planner identity and credential models.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role claimed at login. Decides which parts of the client a planner may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    MinePlanner,
    ShippingPlanner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::MinePlanner => "mine_planner",
            Role::ShippingPlanner => "shipping_planner",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Role::MinePlanner => "Mine Planner",
            Role::ShippingPlanner => "Shipping Planner",
        }
    }

    /// The account kind that registers planners with this role.
    pub fn account_kind(&self) -> AccountKind {
        match self {
            Role::MinePlanner => AccountKind::Mine,
            Role::ShippingPlanner => AccountKind::Shipping,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    /// Accepts the wire names as well as the short `mine` / `shipping` forms.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mine_planner" | "mine" => Ok(Role::MinePlanner),
            "shipping_planner" | "shipping" => Ok(Role::ShippingPlanner),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// The two kinds of account the backend registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Mine,
    Shipping,
}

impl AccountKind {
    /// Path segment of the registration endpoint.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::Mine => "mine",
            AccountKind::Shipping => "shipping",
        }
    }

    pub fn role(&self) -> Role {
        match self {
            AccountKind::Mine => Role::MinePlanner,
            AccountKind::Shipping => Role::ShippingPlanner,
        }
    }
}

impl FromStr for AccountKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<Role>().map(|role| role.account_kind())
    }
}

/// The signed-in planner as returned by `/auth/me` and `/auth/login`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(rename = "nama")]
    pub display_name: String,
    pub email: String,
    pub role: Role,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<AccountKind>,
    #[serde(rename = "no_telp", default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(rename = "updatedAt", default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Identity {
    pub fn has_role(&self, role: Role) -> bool {
        self.role == role
    }
}

/// Body of `POST /auth/login`.
#[derive(Clone, Serialize)]
pub struct LoginCredentials {
    pub email: String,
    pub password: String,
    pub role: Role,
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("role", &self.role)
            .finish()
    }
}

/// Body of `POST /auth/register/{mine,shipping}`.
#[derive(Clone, Serialize)]
pub struct Registration {
    #[serde(rename = "nama")]
    pub display_name: String,
    pub email: String,
    pub password: String,
    #[serde(rename = "no_telp", skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("display_name", &self.display_name)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("phone", &self.phone)
            .finish()
    }
}

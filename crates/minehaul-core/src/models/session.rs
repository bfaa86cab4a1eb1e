use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A session counts as the one in use if it was touched this recently.
const CURRENT_SESSION_WINDOW_MINUTES: i64 = 5;

/// One login instance (device/browser) the server tracks for the current planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    #[serde(rename = "ip")]
    pub origin_ip: String,
    #[serde(rename = "userAgent")]
    pub user_agent: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "expiresAt")]
    pub expires_at: DateTime<Utc>,
    #[serde(rename = "lastUsedAt", default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revoked: bool,
    #[serde(rename = "replacedByTokenId", default, skip_serializing_if = "Option::is_none")]
    pub replaced_by_token_id: Option<String>,
}

impl SessionRecord {
    /// Whether this looks like the session making the request.
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.last_used_at
            .map(|used| now - used < Duration::minutes(CURRENT_SESSION_WINDOW_MINUTES))
            .unwrap_or(false)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Only live sessions other than the current one can be revoked.
    pub fn can_revoke(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired(now) && !self.is_current(now)
    }
}

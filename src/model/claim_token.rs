use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClaimToken {
    pub token: String, // base64url, 32 random bytes
    pub email: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub consumed: bool,
    #[serde(default)]
    pub consumed_by: Option<String>, // device_id
    #[serde(default)]
    pub consumed_at: Option<DateTime<Utc>>,
}

impl ClaimToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

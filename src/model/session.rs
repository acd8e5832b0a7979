use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSession {
    pub session_id: Uuid, // also the credential's jti
    pub device_id: String,
    pub hashed_device_id: String,
    pub email: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
}

impl DeviceSession {
    /// Liveness is derived from the last heartbeat, never stored.
    pub fn is_active(&self, now: DateTime<Utc>, liveness_window: Duration) -> bool {
        now - self.last_heartbeat_at <= liveness_window
    }

    pub fn credential_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

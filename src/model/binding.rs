use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Permanent device → email association. One per device, never overwritten.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserDeviceBinding {
    pub device_id: String,
    pub email: String,
    pub claimed_at: DateTime<Utc>,
}

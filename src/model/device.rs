use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_FIRMWARE_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    #[default]
    Registered,
    Claimed,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Registered => "registered",
            DeviceStatus::Claimed => "claimed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceRegistration {
    pub device_id: String,   // derived from (mac, hardware_id)
    pub mac_address: String, // normalized AA:BB:CC:DD:EE:FF
    pub hardware_id: String,
    pub firmware_version: String,
    #[serde(default)]
    pub status: DeviceStatus,
    pub registered_at: DateTime<Utc>,
}

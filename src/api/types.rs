use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::{ActiveDevice, UserDevice};
use crate::model::device::DEFAULT_FIRMWARE_VERSION;

fn default_firmware() -> String {
    DEFAULT_FIRMWARE_VERSION.to_string()
}

#[derive(Debug, Deserialize)]
pub struct ClaimTokenRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct ClaimTokenResponse {
    pub success: bool,
    pub claim_token: String,
    pub expires_at: DateTime<Utc>,
    pub expires_in_minutes: i64,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub mac_address: String,
    pub hardware_id: String,
    #[serde(default = "default_firmware")]
    pub firmware_version: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub device_id: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub device_id: String,
    pub mac_address: String,
    pub claim_token: String,
}

#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    pub success: bool,
    pub email: String,
    pub device_id: String,
    pub claimed_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct AuthenticateRequest {
    pub device_id: String,
    pub mac_address: String,
}

#[derive(Debug, Serialize)]
pub struct AuthenticateResponse {
    pub success: bool,
    pub jwt_token: String,
    pub expires_at: DateTime<Utc>,
    pub hashed_device_id: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub jwt_token: String,
    pub hashed_device_id: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub success: bool,
    pub device_id: String,
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub device_id: String,
    pub hashed_device_id: String,
}

#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    pub success: bool,
    pub last_heartbeat: DateTime<Utc>,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct ActiveDevicesResponse {
    pub success: bool,
    pub active_devices: Vec<ActiveDevice>,
    pub total_active: usize,
}

#[derive(Debug, Serialize)]
pub struct UserDevicesResponse {
    pub success: bool,
    pub email: String,
    pub devices: Vec<UserDevice>,
    pub total_devices: usize,
}

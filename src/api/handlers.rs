use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use crate::{
    api::{extract::ApiJson, types::*, AppState},
    auth::{DeviceCheck, PurgeReport},
    error::AuthError,
};

pub async fn health() -> Json<Value> {
    Json(json!({ "message": "Device authority is running", "status": "healthy" }))
}

// ------------------------------------------------------------
// COMPANION APP
// ------------------------------------------------------------
pub async fn generate_claim_token(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ClaimTokenRequest>,
) -> Result<Json<ClaimTokenResponse>, AuthError> {
    let claim = state.auth.tokens.issue(&req.email).await?;

    Ok(Json(ClaimTokenResponse {
        success: true,
        claim_token: claim.token,
        expires_at: claim.expires_at,
        expires_in_minutes: state.auth.tokens.ttl().num_minutes(),
    }))
}

pub async fn user_devices(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Result<Json<UserDevicesResponse>, AuthError> {
    let devices = state.auth.user_devices(&email).await?;

    Ok(Json(UserDevicesResponse {
        success: true,
        email: email.trim().to_lowercase(),
        total_devices: devices.len(),
        devices,
    }))
}

// ------------------------------------------------------------
// DEVICE
// ------------------------------------------------------------
pub async fn register_device(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<Json<RegisterResponse>, AuthError> {
    let device = state
        .auth
        .registry
        .register(&req.mac_address, &req.hardware_id, &req.firmware_version)
        .await?;

    Ok(Json(RegisterResponse {
        success: true,
        device_id: device.device_id,
        status: device.status.as_str().to_string(),
    }))
}

pub async fn claim_device(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ClaimRequest>,
) -> Result<Json<ClaimResponse>, AuthError> {
    let binding = state
        .auth
        .bindings
        .claim(&req.device_id, &req.mac_address, &req.claim_token)
        .await?;

    Ok(Json(ClaimResponse {
        success: true,
        email: binding.email,
        device_id: binding.device_id,
        claimed_at: binding.claimed_at,
    }))
}

pub async fn authenticate_device(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<AuthenticateRequest>,
) -> Result<Json<AuthenticateResponse>, AuthError> {
    let issued = state
        .auth
        .sessions
        .authenticate(&req.device_id, &req.mac_address)
        .await?;

    Ok(Json(AuthenticateResponse {
        success: true,
        jwt_token: issued.credential,
        expires_at: issued.expires_at,
        hashed_device_id: issued.hashed_device_id,
        email: issued.email,
    }))
}

pub async fn verify_device(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<VerifyRequest>,
) -> Result<Json<VerifyResponse>, AuthError> {
    let verified = state
        .auth
        .sessions
        .verify(&req.jwt_token, &req.hashed_device_id)?;

    Ok(Json(VerifyResponse {
        success: true,
        device_id: verified.device_id,
        email: verified.email,
        expires_at: verified.expires_at,
    }))
}

pub async fn heartbeat(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>, AuthError> {
    let beat = state
        .auth
        .sessions
        .heartbeat(&req.device_id, &req.hashed_device_id)
        .await?;

    Ok(Json(HeartbeatResponse {
        success: true,
        last_heartbeat: beat.last_heartbeat_at,
        status: beat.status.to_string(),
    }))
}

pub async fn check_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<DeviceCheck>, AuthError> {
    Ok(Json(state.auth.check_device(&device_id).await?))
}

pub async fn active_devices(
    State(state): State<AppState>,
) -> Result<Json<ActiveDevicesResponse>, AuthError> {
    let active_devices = state.auth.list_active_devices().await?;

    Ok(Json(ActiveDevicesResponse {
        success: true,
        total_active: active_devices.len(),
        active_devices,
    }))
}

// ------------------------------------------------------------
// ADMIN
// ------------------------------------------------------------
pub async fn deactivate_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<StatusCode, AuthError> {
    state.auth.deactivate(&device_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn purge(State(state): State<AppState>) -> Result<Json<PurgeReport>, AuthError> {
    Ok(Json(state.auth.purge().await?))
}

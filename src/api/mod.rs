use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use crate::{auth::AuthService, config::AdminCredentials};

pub mod admin;
pub mod extract;
pub mod handlers;
pub mod types;

use handlers::*;

#[derive(Clone)]
pub struct AppState {
    pub auth: AuthService,
    pub admin: Option<Arc<AdminCredentials>>,
}

/// Companion-app, device and admin routes.
pub fn router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route("/admin/device/{device_id}", delete(deactivate_device))
        .route("/admin/purge", post(purge))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admin::require_admin_auth,
        ));

    Router::new()
        .route("/", get(health))
        // Companion app
        .route("/api/auth/generate-claim-token", post(generate_claim_token))
        .route("/api/auth/user-devices/{email}", get(user_devices))
        // Device
        .route("/api/device/register", post(register_device))
        .route("/api/device/claim", post(claim_device))
        .route("/api/device/authenticate", post(authenticate_device))
        .route("/api/device/verify", post(verify_device))
        .route("/api/device/heartbeat", post(heartbeat))
        .route("/api/device/check/{device_id}", get(check_device))
        .route("/api/device/active", get(active_devices))
        .merge(admin_routes)
        .with_state(state)
}

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{error, warn};

use crate::{api::AppState, config::AdminCredentials};

/// HTTP Basic guard for administrative routes.
pub async fn require_admin_auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(admin) = state.admin.as_ref() else {
        error!("admin credentials are missing; set ADMIN_USERNAME and ADMIN_PASSWORD");
        return disabled_response();
    };

    match basic_credentials(&req) {
        Some((username, password)) if matches(admin, &username, &password) => next.run(req).await,
        Some((username, _)) => {
            warn!(%username, "rejected admin credentials");
            unauthorized_response()
        }
        None => unauthorized_response(),
    }
}

fn basic_credentials(req: &Request) -> Option<(String, String)> {
    let header_str = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = header_str.strip_prefix("Basic ")?;
    let decoded = String::from_utf8(BASE64.decode(encoded).ok()?).ok()?;

    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// Constant-time over fixed-size digests, so neither content nor length leaks.
fn matches(admin: &AdminCredentials, username: &str, password: &str) -> bool {
    let user_ok = Sha256::digest(username.as_bytes())
        .as_slice()
        .ct_eq(Sha256::digest(admin.username.as_bytes()).as_slice());
    let pass_ok = Sha256::digest(password.as_bytes())
        .as_slice()
        .ct_eq(Sha256::digest(admin.password.as_bytes()).as_slice());
    (user_ok & pass_ok).into()
}

fn unauthorized_response() -> Response {
    let mut res = Response::new(Body::from("unauthorized"));
    *res.status_mut() = StatusCode::UNAUTHORIZED;
    res.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static("Basic realm=\"Admin\""),
    );
    res
}

fn disabled_response() -> Response {
    let mut res = Response::new(Body::from("admin routes not configured"));
    *res.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
    res
}

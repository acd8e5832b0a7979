use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use once_cell::sync::Lazy;
use rand::{rngs::OsRng, RngCore};
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::error::AuthError;

pub const DEVICE_ID_PREFIX: &str = "esp32_";
const DEVICE_ID_HEX_LEN: usize = 24;
const HASHED_ID_HEX_LEN: usize = 16;
const CLAIM_TOKEN_BYTES: usize = 32;

static MAC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9A-F]{2}(?:[:-][0-9A-F]{2}){5}$").unwrap());
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

/// `aa-bb-cc-dd-ee-ff` → `AA:BB:CC:DD:EE:FF`. `None` if it is not a MAC.
pub fn normalize_mac(raw: &str) -> Option<String> {
    let upper = raw.trim().to_ascii_uppercase();
    let mixed = upper.contains(':') && upper.contains('-');
    if mixed || !MAC_RE.is_match(&upper) {
        return None;
    }
    Some(upper.replace('-', ":"))
}

pub fn normalize_email(raw: &str) -> Result<String, AuthError> {
    let email = raw.trim().to_lowercase();
    if !EMAIL_RE.is_match(&email) {
        return Err(AuthError::invalid("email", "expected local@domain.tld"));
    }
    Ok(email)
}

pub fn require_non_empty<'a>(field: &'static str, value: &'a str) -> Result<&'a str, AuthError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AuthError::invalid(field, "must not be empty"));
    }
    Ok(trimmed)
}

/// Stable id for a piece of hardware. `mac` must already be normalized.
pub fn derive_device_id(mac: &str, hardware_id: &str) -> String {
    let digest = Sha256::digest(format!("{mac}|{hardware_id}").as_bytes());
    let hex = hex::encode(digest);
    format!("{DEVICE_ID_PREFIX}{}", &hex[..DEVICE_ID_HEX_LEN])
}

/// Short, non-secret alias carried next to session credentials.
pub fn hash_device_id(device_id: &str) -> String {
    let hex = hex::encode(Sha256::digest(device_id.as_bytes()));
    hex[..HASHED_ID_HEX_LEN].to_string()
}

pub fn generate_claim_token() -> String {
    let mut bytes = [0u8; CLAIM_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

use std::{path::PathBuf, str::FromStr, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use tracing::warn;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_ROCKSDB_PATH: &str = "devicedb";

#[derive(Debug, Clone, PartialEq)]
pub enum StoreBackend {
    Memory,
    RocksDb(PathBuf),
}

/// Knobs the authority components are built with.
#[derive(Clone)]
pub struct AuthSettings {
    pub jwt_secret: String,
    pub claim_token_ttl: chrono::Duration,
    pub session_ttl: chrono::Duration,
    pub liveness_window: chrono::Duration,
}

impl AuthSettings {
    pub fn with_secret(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            claim_token_ttl: chrono::Duration::minutes(5),
            session_ttl: chrono::Duration::hours(24),
            liveness_window: chrono::Duration::minutes(10),
        }
    }
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("jwt_secret", &"<redacted>")
            .field("claim_token_ttl", &self.claim_token_ttl)
            .field("session_ttl", &self.session_ttl)
            .field("liveness_window", &self.liveness_window)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub store: StoreBackend,
    pub store_timeout: Duration,
    pub auth: AuthSettings,
    pub admin: Option<AdminCredentials>,
}

/// Longest accepted TTL or window: ten years.
const MAX_WINDOW_SECS: i64 = 10 * 365 * 24 * 3600;

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(|name| dotenvy::var(name).ok())
    }

    /// Builds the config from any variable source; `from_env` passes the
    /// process environment.
    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = var("JWT_SECRET").context("JWT_SECRET must be set")?;
        if jwt_secret.trim().is_empty() {
            bail!("JWT_SECRET must not be empty");
        }

        let store = match var("STORE_BACKEND")
            .unwrap_or_else(|| "rocksdb".to_string())
            .to_lowercase()
            .as_str()
        {
            "memory" => StoreBackend::Memory,
            "rocksdb" => StoreBackend::RocksDb(PathBuf::from(
                var("ROCKSDB_PATH").unwrap_or_else(|| DEFAULT_ROCKSDB_PATH.to_string()),
            )),
            other => bail!("unknown STORE_BACKEND {other:?} (expected rocksdb or memory)"),
        };

        let mut auth = AuthSettings::with_secret(jwt_secret);
        auth.claim_token_ttl = window_secs(&var, "CLAIM_TOKEN_TTL_SECS", 300)?;
        auth.session_ttl = window_secs(&var, "SESSION_TTL_SECS", 86_400)?;
        auth.liveness_window = window_secs(&var, "LIVENESS_WINDOW_SECS", 600)?;

        let store_timeout_ms: u64 = parse_or(&var, "STORE_TIMEOUT_MS", 5_000)?;
        if store_timeout_ms == 0 {
            bail!("STORE_TIMEOUT_MS must be positive");
        }

        let admin = match (var("ADMIN_USERNAME"), var("ADMIN_PASSWORD")) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Some(AdminCredentials { username, password })
            }
            _ => {
                warn!("ADMIN_USERNAME/ADMIN_PASSWORD not set; admin routes disabled");
                None
            }
        };

        Ok(Self {
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            store,
            store_timeout: Duration::from_millis(store_timeout_ms),
            auth,
            admin,
        })
    }
}

fn parse_or<T, F>(var: &F, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{name}={raw:?} is not valid: {e}")),
        None => Ok(default),
    }
}

/// A strictly positive number of seconds, capped at [`MAX_WINDOW_SECS`].
fn window_secs<F>(var: &F, name: &str, default: i64) -> Result<chrono::Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let secs: i64 = parse_or(var, name, default)?;
    if secs <= 0 || secs > MAX_WINDOW_SECS {
        bail!("{name}={secs} out of range (1..={MAX_WINDOW_SECS})");
    }
    chrono::Duration::try_seconds(secs).ok_or_else(|| anyhow!("{name}={secs} out of range"))
}

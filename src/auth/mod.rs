pub mod binding;
pub mod claim_token;
pub mod jwt;
pub mod registry;
pub mod session;
pub mod utils;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    clock::Clock,
    config::AuthSettings,
    db::{Store, StoreError},
    error::AuthError,
    model::{DeviceSession, DeviceStatus},
};

pub use binding::ClaimBindingAuthority;
pub use claim_token::ClaimTokenIssuer;
pub use jwt::CredentialKeys;
pub use registry::DeviceRegistry;
pub use session::{Heartbeat, IssuedSession, SessionAuthority, VerifiedCredential};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DeviceCheck {
    pub device_id: String,
    pub is_valid: bool,
    pub status: String,
    pub claimed_by: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ActiveDevice {
    pub device_id: String,
    pub email: String,
    pub last_heartbeat_at: DateTime<Utc>,
}

impl From<DeviceSession> for ActiveDevice {
    fn from(s: DeviceSession) -> Self {
        Self {
            device_id: s.device_id,
            email: s.email,
            last_heartbeat_at: s.last_heartbeat_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserDevice {
    pub device_id: String,
    pub hardware_id: String,
    pub status: DeviceStatus,
    pub claimed_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct PurgeReport {
    pub claim_tokens: usize,
    pub sessions: usize,
}

/// The four authorities wired over one store, one clock and one signing key.
#[derive(Clone)]
pub struct AuthService {
    pub tokens: ClaimTokenIssuer,
    pub registry: DeviceRegistry,
    pub bindings: ClaimBindingAuthority,
    pub sessions: SessionAuthority,
    store: Store,
}

impl AuthService {
    pub fn new(store: Store, clock: Arc<dyn Clock>, settings: &AuthSettings) -> Self {
        let tokens = ClaimTokenIssuer::new(store.clone(), clock.clone(), settings.claim_token_ttl);
        let registry = DeviceRegistry::new(store.clone(), clock.clone());
        let bindings = ClaimBindingAuthority::new(
            store.clone(),
            clock.clone(),
            tokens.clone(),
            registry.clone(),
        );
        let sessions = SessionAuthority::new(
            store.clone(),
            clock,
            CredentialKeys::from_secret(&settings.jwt_secret),
            registry.clone(),
            bindings.clone(),
            settings.session_ttl,
            settings.liveness_window,
        );

        Self {
            tokens,
            registry,
            bindings,
            sessions,
            store,
        }
    }

    pub async fn check_device(&self, device_id: &str) -> Result<DeviceCheck, AuthError> {
        let Some(registration) = self.registry.find(device_id).await? else {
            return Ok(DeviceCheck {
                device_id: device_id.to_string(),
                is_valid: false,
                status: "not_found".to_string(),
                claimed_by: None,
                last_seen: None,
            });
        };

        let binding = self.bindings.find(device_id).await?;
        let session = self.sessions.find(device_id).await?;

        Ok(DeviceCheck {
            device_id: registration.device_id,
            is_valid: registration.status == DeviceStatus::Claimed && binding.is_some(),
            status: registration.status.as_str().to_string(),
            claimed_by: binding.map(|b| b.email),
            last_seen: session.map(|s| s.last_heartbeat_at),
        })
    }

    pub async fn list_active_devices(&self) -> Result<Vec<ActiveDevice>, AuthError> {
        Ok(self
            .sessions
            .list_active()
            .await?
            .into_iter()
            .map(ActiveDevice::from)
            .collect())
    }

    pub async fn user_devices(&self, email: &str) -> Result<Vec<UserDevice>, AuthError> {
        let email = utils::normalize_email(email)?;
        let mut devices = Vec::new();

        for binding in self.bindings.bindings_for(&email).await? {
            // A binding whose registration vanished is reported, not repaired.
            let Some(registration) = self.registry.find(&binding.device_id).await? else {
                warn!(device_id = %binding.device_id, "binding without registration");
                continue;
            };
            let last_seen = self
                .sessions
                .find(&binding.device_id)
                .await?
                .map(|s| s.last_heartbeat_at);

            devices.push(UserDevice {
                device_id: registration.device_id,
                hardware_id: registration.hardware_id,
                status: registration.status,
                claimed_at: binding.claimed_at,
                last_seen,
            });
        }

        devices.sort_by(|a, b| a.claimed_at.cmp(&b.claimed_at));
        Ok(devices)
    }

    /// Administrative unbinding. The registration stays `claimed`, so the
    /// device can never be claimed again.
    pub async fn deactivate(&self, device_id: &str) -> Result<(), AuthError> {
        let binding = self
            .bindings
            .find(device_id)
            .await?
            .ok_or_else(|| AuthError::DeviceNotClaimed(device_id.to_string()))?;

        let txn = self
            .bindings
            .release_ops(&binding)
            .merge(self.sessions.revoke_ops(device_id));

        match self.store.commit(txn).await {
            Ok(()) => {
                info!(device_id = %device_id, email = %binding.email, "device deactivated");
                Ok(())
            }
            Err(StoreError::Conflict { .. }) => {
                Err(AuthError::DeviceNotClaimed(device_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn purge(&self) -> Result<PurgeReport, AuthError> {
        let report = PurgeReport {
            claim_tokens: self.tokens.purge_expired().await?,
            sessions: self.sessions.purge_expired().await?,
        };
        info!(
            claim_tokens = report.claim_tokens,
            sessions = report.sessions,
            "purged expired records"
        );
        Ok(report)
    }
}

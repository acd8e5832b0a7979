use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::{
    auth::utils::{derive_device_id, normalize_mac, require_non_empty},
    clock::Clock,
    db::{self, Store, StoreError, Transaction, DEVICE_REGISTRATIONS},
    error::AuthError,
    model::{DeviceRegistration, DeviceStatus},
};

#[derive(Clone)]
pub struct DeviceRegistry {
    store: Store,
    clock: Arc<dyn Clock>,
}

impl DeviceRegistry {
    pub fn new(store: Store, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Idempotent: the same (mac, hardware_id) always yields the same record,
    /// untouched by later calls.
    pub async fn register(
        &self,
        mac_address: &str,
        hardware_id: &str,
        firmware_version: &str,
    ) -> Result<DeviceRegistration, AuthError> {
        let mac = normalize_mac(mac_address)
            .ok_or_else(|| AuthError::invalid("mac_address", "expected six hex pairs"))?;
        let hardware_id = require_non_empty("hardware_id", hardware_id)?;
        let device_id = derive_device_id(&mac, hardware_id);

        if let Some(existing) = self.find(&device_id).await? {
            debug!(device_id = %device_id, "device re-registered");
            return Ok(existing);
        }

        let registration = DeviceRegistration {
            device_id: device_id.clone(),
            mac_address: mac,
            hardware_id: hardware_id.to_string(),
            firmware_version: firmware_version.trim().to_string(),
            status: DeviceStatus::Registered,
            registered_at: self.clock.now(),
        };

        let txn = Transaction::new()
            .require_absent(DEVICE_REGISTRATIONS, &device_id)
            .set(
                DEVICE_REGISTRATIONS,
                &device_id,
                db::to_record(&registration)?,
            );

        match self.store.commit(txn).await {
            Ok(()) => {
                info!(device_id = %device_id, firmware = %registration.firmware_version, "device registered");
                Ok(registration)
            }
            // Lost a race with an identical registration; theirs is ours.
            Err(StoreError::Conflict { .. }) => self.get(&device_id).await,
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find(&self, device_id: &str) -> Result<Option<DeviceRegistration>, AuthError> {
        Ok(db::load(self.store.as_ref(), DEVICE_REGISTRATIONS, device_id).await?)
    }

    pub async fn get(&self, device_id: &str) -> Result<DeviceRegistration, AuthError> {
        self.find(device_id)
            .await?
            .ok_or_else(|| AuthError::DeviceNotFound(device_id.to_string()))
    }

    /// Looks the device up and checks the presented MAC against the stored one.
    pub async fn get_verified(
        &self,
        device_id: &str,
        mac_address: &str,
    ) -> Result<DeviceRegistration, AuthError> {
        let registration = self.get(device_id).await?;
        if normalize_mac(mac_address).as_deref() != Some(registration.mac_address.as_str()) {
            warn!(device_id = %device_id, "mac address mismatch");
            return Err(AuthError::MacMismatch);
        }
        Ok(registration)
    }

    /// Fragment moving `registered → claimed`; conflicts if already claimed.
    pub fn claim_ops(&self, registration: &DeviceRegistration) -> Result<Transaction, AuthError> {
        let claimed = DeviceRegistration {
            status: DeviceStatus::Claimed,
            ..registration.clone()
        };
        Ok(Transaction::new()
            .require_field(
                DEVICE_REGISTRATIONS,
                &registration.device_id,
                "status",
                json!(DeviceStatus::Registered),
            )
            .set(
                DEVICE_REGISTRATIONS,
                &registration.device_id,
                db::to_record(&claimed)?,
            ))
    }

    pub async fn mark_claimed(&self, device_id: &str) -> Result<DeviceRegistration, AuthError> {
        let registration = self.get(device_id).await?;
        if registration.status == DeviceStatus::Claimed {
            return Err(AuthError::AlreadyClaimed(device_id.to_string()));
        }

        match self.store.commit(self.claim_ops(&registration)?).await {
            Ok(()) => Ok(DeviceRegistration {
                status: DeviceStatus::Claimed,
                ..registration
            }),
            Err(StoreError::Conflict { .. }) => {
                Err(AuthError::AlreadyClaimed(device_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::{
    auth::{claim_token::ClaimTokenIssuer, registry::DeviceRegistry},
    clock::Clock,
    db::{self, Store, StoreError, Transaction, CLAIM_TOKENS, USER_DEVICE_BINDINGS},
    error::AuthError,
    model::{ClaimToken, DeviceStatus, UserDeviceBinding},
};

/// Turns a claim token into a permanent device → email binding.
#[derive(Clone)]
pub struct ClaimBindingAuthority {
    store: Store,
    clock: Arc<dyn Clock>,
    tokens: ClaimTokenIssuer,
    registry: DeviceRegistry,
}

impl ClaimBindingAuthority {
    pub fn new(
        store: Store,
        clock: Arc<dyn Clock>,
        tokens: ClaimTokenIssuer,
        registry: DeviceRegistry,
    ) -> Self {
        Self {
            store,
            clock,
            tokens,
            registry,
        }
    }

    pub async fn claim(
        &self,
        device_id: &str,
        mac_address: &str,
        token: &str,
    ) -> Result<UserDeviceBinding, AuthError> {
        let registration = self.registry.get_verified(device_id, mac_address).await?;
        let claim = self.tokens.validate(token).await?;

        if self.find(device_id).await?.is_some() {
            warn!(device_id = %device_id, "claim attempt on bound device");
            return Err(AuthError::AlreadyBound(device_id.to_string()));
        }
        if registration.status == DeviceStatus::Claimed {
            return Err(AuthError::AlreadyClaimed(device_id.to_string()));
        }

        let now = self.clock.now();
        let binding = UserDeviceBinding {
            device_id: device_id.to_string(),
            email: claim.email.clone(),
            claimed_at: now,
        };

        let txn = self
            .tokens
            .consume_ops(&claim, device_id, now)?
            .merge(
                Transaction::new()
                    .require_absent(USER_DEVICE_BINDINGS, device_id)
                    .set(USER_DEVICE_BINDINGS, device_id, db::to_record(&binding)?),
            )
            .merge(self.registry.claim_ops(&registration)?);

        match self.store.commit(txn).await {
            Ok(()) => {
                info!(device_id = %device_id, email = %binding.email, "device claimed");
                Ok(binding)
            }
            Err(conflict @ StoreError::Conflict { .. }) => {
                Err(self.explain_lost_race(device_id, token, conflict).await)
            }
            Err(e) => {
                error!(device_id = %device_id, error = %e, "claim commit failed");
                Err(e.into())
            }
        }
    }

    /// A concurrent claim committed first; report which invariant it took.
    async fn explain_lost_race(
        &self,
        device_id: &str,
        token: &str,
        conflict: StoreError,
    ) -> AuthError {
        let consumed = matches!(
            db::load::<ClaimToken>(self.store.as_ref(), CLAIM_TOKENS, token).await,
            Ok(Some(ref t)) if t.consumed
        );
        if consumed {
            warn!(device_id = %device_id, "claim token consumed by concurrent claim");
            return AuthError::TokenAlreadyConsumed;
        }

        match self.find(device_id).await {
            Ok(Some(_)) => AuthError::AlreadyBound(device_id.to_string()),
            Ok(None) => match self.registry.find(device_id).await {
                Ok(Some(reg)) if reg.status == DeviceStatus::Claimed => {
                    AuthError::AlreadyClaimed(device_id.to_string())
                }
                Ok(_) => conflict.into(),
                Err(e) => e,
            },
            Err(e) => e,
        }
    }

    pub async fn find(&self, device_id: &str) -> Result<Option<UserDeviceBinding>, AuthError> {
        Ok(db::load(self.store.as_ref(), USER_DEVICE_BINDINGS, device_id).await?)
    }

    pub async fn bindings_for(&self, email: &str) -> Result<Vec<UserDeviceBinding>, AuthError> {
        let records = self
            .store
            .find_by_field(USER_DEVICE_BINDINGS, "email", &serde_json::json!(email))
            .await?;
        Ok(db::from_records(records)?)
    }

    /// Fragment removing an existing binding; conflicts if there is none.
    pub fn release_ops(&self, binding: &UserDeviceBinding) -> Transaction {
        Transaction::new()
            .require_field(
                USER_DEVICE_BINDINGS,
                &binding.device_id,
                "email",
                serde_json::json!(binding.email),
            )
            .delete(USER_DEVICE_BINDINGS, &binding.device_id)
    }
}

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    auth::{
        binding::ClaimBindingAuthority,
        jwt::{self, CredentialKeys, DeviceClaims},
        registry::DeviceRegistry,
        utils::{hash_device_id, require_non_empty},
    },
    clock::Clock,
    db::{self, Store, StoreError, Transaction, DEVICE_SESSIONS},
    error::AuthError,
    model::DeviceSession,
};

const HEARTBEAT_ATTEMPTS: usize = 3;
pub const STATUS_ACTIVE: &str = "active";

#[derive(Debug, Clone, Serialize)]
pub struct IssuedSession {
    pub credential: String,
    pub expires_at: DateTime<Utc>,
    pub hashed_device_id: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VerifiedCredential {
    pub device_id: String,
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Heartbeat {
    pub last_heartbeat_at: DateTime<Utc>,
    pub status: &'static str,
}

/// Issues device credentials and tracks liveness. Reads registrations and
/// bindings, never writes them.
#[derive(Clone)]
pub struct SessionAuthority {
    store: Store,
    clock: Arc<dyn Clock>,
    keys: CredentialKeys,
    registry: DeviceRegistry,
    bindings: ClaimBindingAuthority,
    session_ttl: Duration,
    liveness_window: Duration,
}

impl SessionAuthority {
    pub fn new(
        store: Store,
        clock: Arc<dyn Clock>,
        keys: CredentialKeys,
        registry: DeviceRegistry,
        bindings: ClaimBindingAuthority,
        session_ttl: Duration,
        liveness_window: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            keys,
            registry,
            bindings,
            session_ttl,
            liveness_window,
        }
    }

    pub fn liveness_window(&self) -> Duration {
        self.liveness_window
    }

    pub async fn authenticate(
        &self,
        device_id: &str,
        mac_address: &str,
    ) -> Result<IssuedSession, AuthError> {
        self.registry.get_verified(device_id, mac_address).await?;
        let binding = self.bindings.find(device_id).await?.ok_or_else(|| {
            warn!(device_id = %device_id, "authentication before claim");
            AuthError::DeviceNotClaimed(device_id.to_string())
        })?;

        let now = self.clock.now();
        let session = DeviceSession {
            session_id: Uuid::new_v4(),
            device_id: device_id.to_string(),
            hashed_device_id: hash_device_id(device_id),
            email: binding.email,
            issued_at: now,
            expires_at: now + self.session_ttl,
            last_heartbeat_at: now,
        };

        let credential = self.keys.sign(&DeviceClaims {
            device_id: session.device_id.clone(),
            hashed_device_id: session.hashed_device_id.clone(),
            email: session.email.clone(),
            iat: session.issued_at.timestamp(),
            exp: session.expires_at.timestamp(),
            jti: session.session_id.to_string(),
        })?;

        self.store
            .set(DEVICE_SESSIONS, device_id, db::to_record(&session)?)
            .await?;

        info!(device_id = %device_id, session_id = %session.session_id, "device session issued");
        Ok(IssuedSession {
            credential,
            expires_at: session.expires_at,
            hashed_device_id: session.hashed_device_id,
            email: session.email,
        })
    }

    /// Stateless: signature, then expiry, then the hashed id binding.
    pub fn verify(
        &self,
        credential: &str,
        hashed_device_id: &str,
    ) -> Result<VerifiedCredential, AuthError> {
        let hashed_device_id = require_non_empty("hashed_device_id", hashed_device_id)?;
        let claims = self.keys.decode(credential)?;

        if self.clock.now().timestamp() >= claims.exp {
            return Err(AuthError::CredentialExpired);
        }
        if claims.hashed_device_id != hashed_device_id {
            warn!(device_id = %claims.device_id, "credential presented with foreign hashed id");
            return Err(AuthError::HashedIdMismatch);
        }

        Ok(VerifiedCredential {
            expires_at: jwt::expires_at(&claims),
            device_id: claims.device_id,
            email: claims.email,
        })
    }

    pub async fn heartbeat(
        &self,
        device_id: &str,
        hashed_device_id: &str,
    ) -> Result<Heartbeat, AuthError> {
        let device_id = require_non_empty("device_id", device_id)?;
        let hashed_device_id = require_non_empty("hashed_device_id", hashed_device_id)?;

        for _ in 0..HEARTBEAT_ATTEMPTS {
            let session = self.get(device_id).await?;
            if session.hashed_device_id != hashed_device_id {
                warn!(device_id = %device_id, "heartbeat with mismatched hashed id");
                return Err(AuthError::HashedIdMismatch);
            }

            let beat = self.clock.now().max(session.last_heartbeat_at);
            let updated = DeviceSession {
                last_heartbeat_at: beat,
                ..session.clone()
            };

            // Guard on the previous beat so two concurrent heartbeats never move it backwards,
            // and on the session id so a re-authentication in between is never overwritten.
            let txn = Transaction::new()
                .require_field(
                    DEVICE_SESSIONS,
                    device_id,
                    "session_id",
                    db::to_record(&session.session_id)?,
                )
                .require_field(
                    DEVICE_SESSIONS,
                    device_id,
                    "last_heartbeat_at",
                    db::to_record(&session.last_heartbeat_at)?,
                )
                .set(DEVICE_SESSIONS, device_id, db::to_record(&updated)?);
            let result = self.store.commit(txn).await;

            match result {
                Ok(()) => {
                    return Ok(Heartbeat {
                        last_heartbeat_at: beat,
                        status: STATUS_ACTIVE,
                    })
                }
                Err(StoreError::Conflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(StoreError::Conflict {
            collection: DEVICE_SESSIONS.to_string(),
            id: device_id.to_string(),
        }
        .into())
    }

    pub async fn find(&self, device_id: &str) -> Result<Option<DeviceSession>, AuthError> {
        Ok(db::load(self.store.as_ref(), DEVICE_SESSIONS, device_id).await?)
    }

    pub async fn get(&self, device_id: &str) -> Result<DeviceSession, AuthError> {
        self.find(device_id)
            .await?
            .ok_or_else(|| AuthError::SessionNotFound(device_id.to_string()))
    }

    pub fn is_active(&self, session: &DeviceSession) -> bool {
        session.is_active(self.clock.now(), self.liveness_window)
    }

    /// Lazy scan; stale sessions simply drop out.
    pub async fn list_active(&self) -> Result<Vec<DeviceSession>, AuthError> {
        let sessions: Vec<DeviceSession> =
            db::from_records(self.store.scan(DEVICE_SESSIONS).await?)?;
        let mut active: Vec<_> = sessions.into_iter().filter(|s| self.is_active(s)).collect();
        active.sort_by(|a, b| b.last_heartbeat_at.cmp(&a.last_heartbeat_at));
        Ok(active)
    }

    pub fn revoke_ops(&self, device_id: &str) -> Transaction {
        Transaction::new().delete(DEVICE_SESSIONS, device_id)
    }

    /// Drops sessions whose credential can no longer verify.
    pub async fn purge_expired(&self) -> Result<usize, AuthError> {
        let now = self.clock.now();
        let sessions: Vec<DeviceSession> =
            db::from_records(self.store.scan(DEVICE_SESSIONS).await?)?;

        let mut removed = 0;
        for session in sessions.iter().filter(|s| s.credential_expired(now)) {
            // Only the session that was scanned; a newer one under the same key stays.
            let txn = Transaction::new()
                .require_field(
                    DEVICE_SESSIONS,
                    &session.device_id,
                    "session_id",
                    db::to_record(&session.session_id)?,
                )
                .delete(DEVICE_SESSIONS, &session.device_id);

            match self.store.commit(txn).await {
                Ok(()) => removed += 1,
                Err(StoreError::Conflict { .. }) => {
                    debug!(device_id = %session.device_id, "session replaced during purge; kept");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::AuthService,
        clock::ManualClock,
        config::AuthSettings,
        db::{DocumentStore, MemoryStore},
    };
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Mutex;

    const MAC: &str = "AA:BB:CC:DD:EE:FF";

    /// Lands one queued session write right after the next session read,
    /// as a concurrent re-authentication would.
    #[derive(Default)]
    struct Interleave {
        inner: MemoryStore,
        queued: Mutex<Option<(String, Value)>>,
    }

    impl Interleave {
        fn queue(&self, session: &DeviceSession) {
            let record = db::to_record(session).unwrap();
            *self.queued.lock().unwrap() = Some((session.device_id.clone(), record));
        }

        async fn flush(&self, collection: &str) {
            if collection != DEVICE_SESSIONS {
                return;
            }
            let queued = self.queued.lock().unwrap().take();
            if let Some((id, record)) = queued {
                self.inner.set(DEVICE_SESSIONS, &id, record).await.unwrap();
            }
        }
    }

    #[async_trait]
    impl DocumentStore for Interleave {
        async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
            let out = self.inner.get(collection, id).await;
            self.flush(collection).await;
            out
        }
        async fn set(&self, collection: &str, id: &str, record: Value) -> Result<(), StoreError> {
            self.inner.set(collection, id, record).await
        }
        async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
            self.inner.delete(collection, id).await
        }
        async fn find_by_field(
            &self,
            collection: &str,
            field: &str,
            value: &Value,
        ) -> Result<Vec<Value>, StoreError> {
            self.inner.find_by_field(collection, field, value).await
        }
        async fn scan(&self, collection: &str) -> Result<Vec<Value>, StoreError> {
            let out = self.inner.scan(collection).await;
            self.flush(collection).await;
            out
        }
        async fn commit(&self, txn: Transaction) -> Result<(), StoreError> {
            self.inner.commit(txn).await
        }
    }

    async fn interleaved_device() -> (AuthService, Arc<ManualClock>, Arc<Interleave>, String) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(Interleave::default());
        let auth = AuthService::new(
            store.clone(),
            clock.clone(),
            &AuthSettings::with_secret("test-secret"),
        );

        let device = auth.registry.register(MAC, "HW1", "1.0").await.unwrap();
        let token = auth.tokens.issue("a@x.com").await.unwrap();
        auth.bindings
            .claim(&device.device_id, MAC, &token.token)
            .await
            .unwrap();
        auth.sessions.authenticate(&device.device_id, MAC).await.unwrap();
        (auth, clock, store, device.device_id)
    }

    fn reissued(session: &DeviceSession, now: DateTime<Utc>) -> DeviceSession {
        DeviceSession {
            session_id: Uuid::new_v4(),
            issued_at: now,
            expires_at: now + Duration::hours(24),
            last_heartbeat_at: now,
            ..session.clone()
        }
    }

    async fn claimed_device() -> (AuthService, Arc<ManualClock>, String) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store: Store = Arc::new(MemoryStore::new());
        let auth = AuthService::new(store, clock.clone(), &AuthSettings::with_secret("test-secret"));

        let device = auth.registry.register(MAC, "HW1", "1.0").await.unwrap();
        let token = auth.tokens.issue("a@x.com").await.unwrap();
        auth.bindings
            .claim(&device.device_id, MAC, &token.token)
            .await
            .unwrap();
        (auth, clock, device.device_id)
    }

    #[tokio::test]
    async fn authenticate_issues_credential_for_bound_email() {
        let (auth, clock, device_id) = claimed_device().await;
        let issued = auth.sessions.authenticate(&device_id, MAC).await.unwrap();

        assert_eq!(issued.email, "a@x.com");
        assert_eq!(issued.hashed_device_id, hash_device_id(&device_id));
        assert_eq!(issued.expires_at, clock.now() + Duration::hours(24));

        let session = auth.sessions.get(&device_id).await.unwrap();
        assert!(session.issued_at < session.expires_at);
        assert_eq!(session.last_heartbeat_at, clock.now());
        assert!(auth.sessions.is_active(&session));
    }

    #[tokio::test]
    async fn authenticate_requires_matching_mac() {
        let (auth, _, device_id) = claimed_device().await;
        assert!(matches!(
            auth.sessions
                .authenticate(&device_id, "11:22:33:44:55:66")
                .await,
            Err(AuthError::MacMismatch)
        ));
    }

    #[tokio::test]
    async fn verify_checks_hashed_id_and_expiry() {
        let (auth, clock, device_id) = claimed_device().await;
        let issued = auth.sessions.authenticate(&device_id, MAC).await.unwrap();

        let verified = auth
            .sessions
            .verify(&issued.credential, &issued.hashed_device_id)
            .unwrap();
        assert_eq!(verified.device_id, device_id);
        assert_eq!(verified.email, "a@x.com");
        assert_eq!(verified.expires_at.timestamp(), issued.expires_at.timestamp());

        assert!(matches!(
            auth.sessions.verify(&issued.credential, "ffffffffffffffff"),
            Err(AuthError::HashedIdMismatch)
        ));

        clock.advance(Duration::hours(24));
        assert!(matches!(
            auth.sessions.verify(&issued.credential, &issued.hashed_device_id),
            Err(AuthError::CredentialExpired)
        ));
    }

    #[tokio::test]
    async fn heartbeat_moves_forward_and_rejects_foreign_hash() {
        let (auth, clock, device_id) = claimed_device().await;
        let issued = auth.sessions.authenticate(&device_id, MAC).await.unwrap();

        clock.advance(Duration::minutes(5));
        let beat = auth
            .sessions
            .heartbeat(&device_id, &issued.hashed_device_id)
            .await
            .unwrap();
        assert_eq!(beat.status, STATUS_ACTIVE);
        assert_eq!(beat.last_heartbeat_at, clock.now());

        // A clock that steps backwards never rewinds the stored beat.
        clock.advance(Duration::minutes(-3));
        let again = auth
            .sessions
            .heartbeat(&device_id, &issued.hashed_device_id)
            .await
            .unwrap();
        assert_eq!(again.last_heartbeat_at, beat.last_heartbeat_at);

        assert!(matches!(
            auth.sessions.heartbeat(&device_id, "0000000000000000").await,
            Err(AuthError::HashedIdMismatch)
        ));
        assert!(matches!(
            auth.sessions.heartbeat("esp32_none", "0000000000000000").await,
            Err(AuthError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn sessions_go_stale_after_liveness_window() {
        let (auth, clock, device_id) = claimed_device().await;
        auth.sessions.authenticate(&device_id, MAC).await.unwrap();
        assert_eq!(auth.sessions.list_active().await.unwrap().len(), 1);

        clock.advance(Duration::minutes(10) + Duration::seconds(1));
        assert!(auth.sessions.list_active().await.unwrap().is_empty());
        // Stale, not gone: the record survives until the credential expires.
        assert!(auth.sessions.find(&device_id).await.unwrap().is_some());
        assert_eq!(auth.sessions.purge_expired().await.unwrap(), 0);

        clock.advance(Duration::hours(24));
        assert_eq!(auth.sessions.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn purge_keeps_session_reissued_after_scan() {
        let (auth, clock, store, device_id) = interleaved_device().await;
        let stale = auth.sessions.get(&device_id).await.unwrap();

        clock.advance(Duration::hours(25));
        let fresh = reissued(&stale, clock.now());
        store.queue(&fresh);

        assert_eq!(auth.sessions.purge_expired().await.unwrap(), 0);

        let kept = auth.sessions.get(&device_id).await.unwrap();
        assert_eq!(kept.session_id, fresh.session_id);
        assert!(auth
            .sessions
            .heartbeat(&device_id, &fresh.hashed_device_id)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn heartbeat_never_restores_a_replaced_session() {
        let (auth, clock, store, device_id) = interleaved_device().await;
        let old = auth.sessions.get(&device_id).await.unwrap();

        // Same instant, so only the session id tells the two apart.
        let fresh = reissued(&old, clock.now());
        assert_eq!(fresh.last_heartbeat_at, old.last_heartbeat_at);
        store.queue(&fresh);

        auth.sessions
            .heartbeat(&device_id, &old.hashed_device_id)
            .await
            .unwrap();

        let current = auth.sessions.get(&device_id).await.unwrap();
        assert_eq!(current.session_id, fresh.session_id);
        assert_eq!(current.expires_at, fresh.expires_at);
    }
}

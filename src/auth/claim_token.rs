use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{info, warn};

use crate::{
    auth::utils::{generate_claim_token, normalize_email},
    clock::Clock,
    db::{self, Store, Transaction, CLAIM_TOKENS},
    error::AuthError,
    model::ClaimToken,
};

/// Issues and validates single-use, time-boxed hand-off tokens.
#[derive(Clone)]
pub struct ClaimTokenIssuer {
    store: Store,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl ClaimTokenIssuer {
    pub fn new(store: Store, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn issue(&self, email: &str) -> Result<ClaimToken, AuthError> {
        let email = normalize_email(email)?;
        let now = self.clock.now();

        let claim = ClaimToken {
            token: generate_claim_token(),
            email,
            issued_at: now,
            expires_at: now + self.ttl,
            consumed: false,
            consumed_by: None,
            consumed_at: None,
        };

        self.store
            .set(CLAIM_TOKENS, &claim.token, db::to_record(&claim)?)
            .await?;

        info!(email = %claim.email, expires_at = %claim.expires_at, "issued claim token");
        Ok(claim)
    }

    /// Does not consume. Expiry is reported before consumption.
    pub async fn validate(&self, token: &str) -> Result<ClaimToken, AuthError> {
        let Some(claim) = db::load::<ClaimToken>(self.store.as_ref(), CLAIM_TOKENS, token).await?
        else {
            warn!("claim token not recognised");
            return Err(AuthError::TokenInvalid);
        };

        if claim.is_expired(self.clock.now()) {
            warn!(email = %claim.email, "claim token expired");
            return Err(AuthError::TokenExpired);
        }
        if claim.consumed {
            warn!(email = %claim.email, "claim token reused");
            return Err(AuthError::TokenAlreadyConsumed);
        }
        Ok(claim)
    }

    /// Fragment that flips `consumed` only if nobody has yet.
    pub fn consume_ops(
        &self,
        claim: &ClaimToken,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Transaction, AuthError> {
        let consumed = ClaimToken {
            consumed: true,
            consumed_by: Some(device_id.to_string()),
            consumed_at: Some(now),
            ..claim.clone()
        };
        Ok(Transaction::new()
            .require_field(CLAIM_TOKENS, &claim.token, "consumed", json!(false))
            .set(CLAIM_TOKENS, &claim.token, db::to_record(&consumed)?))
    }

    /// Removes every token past its expiry, consumed or not.
    pub async fn purge_expired(&self) -> Result<usize, AuthError> {
        let now = self.clock.now();
        let tokens: Vec<ClaimToken> = db::from_records(self.store.scan(CLAIM_TOKENS).await?)?;

        let mut removed = 0;
        for claim in tokens.iter().filter(|c| c.is_expired(now)) {
            self.store.delete(CLAIM_TOKENS, &claim.token).await?;
            removed += 1;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, db::MemoryStore};

    fn issuer() -> (ClaimTokenIssuer, Arc<ManualClock>, Store) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store: Store = Arc::new(MemoryStore::new());
        let issuer = ClaimTokenIssuer::new(store.clone(), clock.clone(), Duration::minutes(5));
        (issuer, clock, store)
    }

    #[tokio::test]
    async fn issued_token_validates_to_its_email() {
        let (issuer, clock, _) = issuer();
        let claim = issuer.issue("A@X.com").await.unwrap();
        assert_eq!(claim.expires_at - claim.issued_at, Duration::minutes(5));
        assert_eq!(claim.issued_at, clock.now());

        let validated = issuer.validate(&claim.token).await.unwrap();
        assert_eq!(validated.email, "a@x.com");
        assert!(!validated.consumed);
    }

    #[tokio::test]
    async fn unknown_token_is_invalid() {
        let (issuer, _, _) = issuer();
        assert!(matches!(
            issuer.validate("nope").await,
            Err(AuthError::TokenInvalid)
        ));
    }

    #[tokio::test]
    async fn expiry_wins_over_consumption() {
        let (issuer, clock, store) = issuer();
        let claim = issuer.issue("a@x.com").await.unwrap();
        let txn = issuer.consume_ops(&claim, "esp32_x", clock.now()).unwrap();
        store.commit(txn).await.unwrap();

        assert!(matches!(
            issuer.validate(&claim.token).await,
            Err(AuthError::TokenAlreadyConsumed)
        ));

        clock.advance(Duration::minutes(5) + Duration::seconds(1));
        assert!(matches!(
            issuer.validate(&claim.token).await,
            Err(AuthError::TokenExpired)
        ));
    }

    #[tokio::test]
    async fn token_is_valid_until_the_expiry_instant() {
        let (issuer, clock, _) = issuer();
        let claim = issuer.issue("a@x.com").await.unwrap();
        clock.set(claim.expires_at);
        assert!(issuer.validate(&claim.token).await.is_ok());
    }

    #[tokio::test]
    async fn second_consume_conflicts() {
        let (issuer, clock, store) = issuer();
        let claim = issuer.issue("a@x.com").await.unwrap();
        let first = issuer.consume_ops(&claim, "esp32_a", clock.now()).unwrap();
        let second = issuer.consume_ops(&claim, "esp32_b", clock.now()).unwrap();
        store.commit(first).await.unwrap();
        assert!(store.commit(second).await.is_err());

        let stored: ClaimToken = db::load(store.as_ref(), CLAIM_TOKENS, &claim.token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.consumed_by.as_deref(), Some("esp32_a"));
    }

    #[tokio::test]
    async fn purge_drops_only_expired_tokens() {
        let (issuer, clock, _) = issuer();
        let old = issuer.issue("a@x.com").await.unwrap();
        clock.advance(Duration::minutes(4));
        let fresh = issuer.issue("b@x.com").await.unwrap();
        clock.advance(Duration::minutes(2));

        assert_eq!(issuer.purge_expired().await.unwrap(), 1);
        assert!(matches!(
            issuer.validate(&old.token).await,
            Err(AuthError::TokenInvalid)
        ));
        assert!(issuer.validate(&fresh.token).await.is_ok());
    }

    #[tokio::test]
    async fn malformed_email_is_rejected() {
        let (issuer, _, _) = issuer();
        assert!(matches!(
            issuer.issue("nobody").await,
            Err(AuthError::InvalidInput { field: "email", .. })
        ));
    }
}

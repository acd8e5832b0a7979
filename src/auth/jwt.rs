use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceClaims {
    pub device_id: String,
    pub hashed_device_id: String,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// HS256 signer/verifier around the server-held secret.
#[derive(Clone)]
pub struct CredentialKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl CredentialKeys {
    pub fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn sign(&self, claims: &DeviceClaims) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }

    /// Checks signature and structure only. Expiry is judged by the caller
    /// against its own clock.
    pub fn decode(&self, credential: &str) -> Result<DeviceClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        decode::<DeviceClaims>(credential, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|_| AuthError::SignatureInvalid)
    }
}

pub fn expires_at(claims: &DeviceClaims) -> DateTime<Utc> {
    DateTime::from_timestamp(claims.exp, 0).unwrap_or_default()
}

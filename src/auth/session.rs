use crate::error::AuthError;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Claims carried in a session token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    /// Subject (Discord user id)
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and verifies HS256 session tokens
pub struct SessionSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    lifetime: Duration,
}

impl SessionSigner {
    pub fn new(secret: &[u8], lifetime: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            lifetime,
        }
    }

    pub fn sign(&self, subject: &str) -> Result<String, AuthError> {
        self.sign_with_expiry(subject, Utc::now() + self.lifetime)
    }

    fn sign_with_expiry(
        &self,
        subject: &str,
        expires_at: chrono::DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let claims = SessionClaims {
            sub: subject.to_string(),
            iat: Utc::now().timestamp(),
            exp: expires_at.timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(|e| {
            debug!("Failed to sign session token: {}", e);
            AuthError::InvalidSignature
        })
    }

    /// Verify a token and return its subject
    pub fn verify(&self, token: &str) -> Result<String, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "sub"]);

        decode::<SessionClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims.sub)
            .map_err(|e| {
                debug!("Rejected session token: {}", e);
                AuthError::InvalidSignature
            })
    }
}

impl std::fmt::Debug for SessionSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSigner")
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

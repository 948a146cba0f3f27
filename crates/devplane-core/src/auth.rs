//! C1 — Token Authenticator.
//!
//! Mints and verifies bearer tokens carrying `{username, roles}` signed with
//! HMAC-SHA256 over a process-wide shared secret, via `jsonwebtoken` rather
//! than hand-rolled HMAC.

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use devplane_types::models::Identity;
use devplane_types::{AppError, AppResult};

/// Default cap on requested token lifetime, absent an explicit override.
pub const DEFAULT_MAX_EXPIRY: chrono::Duration = chrono::Duration::days(30);

/// Claims embedded in the signed token. Field names are abbreviated to the
/// JWT registered-claim conventions (`sub`, `iss`, `nbf`, `exp`, `iat`) so
/// the wire format is a plain, inspectable JWT.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    sub: String,
    roles: Vec<String>,
    iss: String,
    iat: i64,
    nbf: i64,
    exp: i64,
}

/// Verified claims handed back to the caller, already shaped into the
/// request-scoped `Identity` plus the raw temporal fields `GetSystemInfo`-
/// adjacent diagnostics might want.
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    pub identity: Identity,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Mints and verifies bearer tokens. Holds the process-wide signing secret;
/// constructed once at daemon startup and shared via `Arc`.
pub struct TokenAuthenticator {
    secret: Vec<u8>,
    issuer: String,
    max_expiry: chrono::Duration,
}

impl TokenAuthenticator {
    pub fn new(secret: impl Into<Vec<u8>>, issuer: impl Into<String>) -> Self {
        Self { secret: secret.into(), issuer: issuer.into(), max_expiry: DEFAULT_MAX_EXPIRY }
    }

    pub fn with_max_expiry(mut self, max_expiry: chrono::Duration) -> Self {
        self.max_expiry = max_expiry;
        self
    }

    /// Generates a signed token for `username`/`roles`.
    ///
    /// **Hard invariant**: the effective expiry is always positive and never
    /// exceeds `max_expiry`. A non-positive `expires_in` or one exceeding
    /// `max_expiry` is silently clamped to `max_expiry` — this authenticator
    /// can never produce a non-expiring token.
    pub fn generate_token(
        &self,
        username: &str,
        roles: &[String],
        expires_in: chrono::Duration,
    ) -> AppResult<String> {
        let now = Utc::now();
        let effective_expiry = if expires_in <= chrono::Duration::zero() || expires_in > self.max_expiry {
            self.max_expiry
        } else {
            expires_in
        };

        let claims = Claims {
            sub: username.to_owned(),
            roles: roles.to_vec(),
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: (now + effective_expiry).timestamp(),
        };

        let header = Header::new(Algorithm::HS256);
        jsonwebtoken::encode(&header, &claims, &EncodingKey::from_secret(&self.secret))
            .map_err(|e| AppError::internal(format!("token signing failed: {e}")))
    }

    /// Verifies a bearer token's structure, signature, and validity window.
    ///
    /// Fails with `UNAUTHENTICATED` for any of: malformed structure,
    /// unexpected signing algorithm, wrong signature, `notBefore > now`, or
    /// `expiresAt <= now`.
    pub fn validate_token(&self, token: &str) -> AppResult<VerifiedToken> {
        let mut validation = Validation::new(Algorithm::HS256);
        // We classify temporal failures ourselves below so every rejection
        // path returns the same `UNAUTHENTICATED` kind rather than leaking
        // jsonwebtoken's distinct expired/immature error variants.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.required_spec_claims.clear();

        let data = jsonwebtoken::decode::<Claims>(
            token,
            &DecodingKey::from_secret(&self.secret),
            &validation,
        )
        .map_err(|e| AppError::unauthenticated(format!("invalid token: {e}")))?;

        let claims = data.claims;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        if claims.nbf > now {
            return Err(AppError::unauthenticated("token not yet valid"));
        }
        if claims.exp <= now {
            return Err(AppError::unauthenticated("token expired"));
        }

        let issued_at = DateTime::from_timestamp(claims.iat, 0).unwrap_or_else(Utc::now);
        let expires_at = DateTime::from_timestamp(claims.exp, 0).unwrap_or_else(Utc::now);

        Ok(VerifiedToken {
            identity: Identity {
                username: claims.sub,
                roles: claims.roles.into_iter().collect::<HashSet<_>>(),
            },
            issued_at,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> TokenAuthenticator {
        TokenAuthenticator::new(b"test-secret".to_vec(), "devplane")
            .with_max_expiry(chrono::Duration::hours(48))
    }

    #[test]
    fn round_trip() {
        let a = auth();
        let token = a
            .generate_token("alice", &["admin".to_string()], chrono::Duration::hours(1))
            .unwrap();
        let verified = a.validate_token(&token).unwrap();
        assert_eq!(verified.identity.username, "alice");
        assert!(verified.identity.has_role("admin"));
    }

    #[test]
    fn zero_expiry_clamps_to_max() {
        let a = auth();
        let token = a.generate_token("alice", &[], chrono::Duration::zero()).unwrap();
        let verified = a.validate_token(&token).unwrap();
        let expected = verified.issued_at + chrono::Duration::hours(48);
        assert!((verified.expires_at - expected).num_seconds().abs() <= 5);
    }

    #[test]
    fn negative_expiry_clamps_to_max() {
        let a = auth();
        let token = a.generate_token("alice", &[], chrono::Duration::hours(-1)).unwrap();
        let verified = a.validate_token(&token).unwrap();
        let expected = verified.issued_at + chrono::Duration::hours(48);
        assert!((verified.expires_at - expected).num_seconds().abs() <= 5);
    }

    #[test]
    fn oversized_expiry_clamps_to_max() {
        let a = auth();
        let token = a.generate_token("alice", &[], chrono::Duration::days(365)).unwrap();
        let verified = a.validate_token(&token).unwrap();
        let expected = verified.issued_at + chrono::Duration::hours(48);
        assert!((verified.expires_at - expected).num_seconds().abs() <= 5);
    }

    #[test]
    fn wrong_secret_rejected() {
        let a = auth();
        let token = a.generate_token("alice", &[], chrono::Duration::hours(1)).unwrap();
        let other = TokenAuthenticator::new(b"other-secret".to_vec(), "devplane");
        assert!(other.validate_token(&token).is_err());
    }

    #[test]
    fn expired_token_rejected() {
        let a = auth();
        // Construct a token whose expiry is already in the past by signing
        // directly rather than waiting on a clock in a unit test.
        let claims = Claims {
            sub: "alice".into(),
            roles: vec![],
            iss: "devplane".into(),
            iat: (Utc::now() - chrono::Duration::hours(2)).timestamp(),
            nbf: (Utc::now() - chrono::Duration::hours(2)).timestamp(),
            exp: (Utc::now() - chrono::Duration::milliseconds(1)).timestamp(),
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&a.secret),
        )
        .unwrap();
        let err = a.validate_token(&token).unwrap_err();
        assert_eq!(err.kind, devplane_types::ErrorKind::Unauthenticated);
    }
}

//! Identity verification at the HTTP boundary.
//!
//! The contract consumed here is narrow: "verify identity → actor id".
//! Tokens are `base64url(claims-json).hex(hmac-sha256(secret, payload))`;
//! session issuance itself is an external collaborator, so the signing helper
//! exists for tests and local tooling standing in for it.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use sketchforge_core::OwnerId;

type HmacSha256 = Hmac<Sha256>;

/// Claims carried by a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject / actor identifier.
    pub sub: OwnerId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Claims {
    pub fn for_owner(owner_id: OwnerId, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: owner_id,
            issued_at: now,
            expires_at: now + ttl,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,

    #[error("bad token signature")]
    BadSignature,

    #[error("token has expired")]
    Expired,

    #[error("token not yet valid")]
    NotYetValid,

    #[error("invalid token time window")]
    InvalidTimeWindow,
}

/// Mint a token for the given claims.
pub fn sign_token(secret: &[u8], claims: &Claims) -> String {
    let payload = URL_SAFE_NO_PAD.encode(
        serde_json::to_vec(claims).expect("claims serialization is infallible"),
    );
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(payload.as_bytes());
    let tag = mac.finalize().into_bytes();

    let mut sig = String::with_capacity(tag.len() * 2);
    for b in tag {
        use core::fmt::Write;
        let _ = write!(sig, "{b:02x}");
    }
    format!("{payload}.{sig}")
}

/// Verify a token and validate its time window.
pub fn verify_token(secret: &[u8], token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
    let (payload, sig_hex) = token.split_once('.').ok_or(TokenError::Malformed)?;

    let provided = decode_hex(sig_hex).ok_or(TokenError::Malformed)?;
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| TokenError::Malformed)?;
    mac.update(payload.as_bytes());
    mac.verify_slice(&provided)
        .map_err(|_| TokenError::BadSignature)?;

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| TokenError::Malformed)?;
    let claims: Claims = serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)?;

    validate_claims(&claims, now)?;
    Ok(claims)
}

/// Deterministically validate a token's time window.
pub fn validate_claims(claims: &Claims, now: DateTime<Utc>) -> Result<(), TokenError> {
    if claims.expires_at <= claims.issued_at {
        return Err(TokenError::InvalidTimeWindow);
    }
    if now < claims.issued_at {
        return Err(TokenError::NotYetValid);
    }
    if now >= claims.expires_at {
        return Err(TokenError::Expired);
    }
    Ok(())
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"dev-secret";

    #[test]
    fn roundtrip() {
        let owner = OwnerId::new();
        let claims = Claims::for_owner(owner, Duration::hours(1));
        let token = sign_token(SECRET, &claims);

        let verified = verify_token(SECRET, &token, Utc::now()).unwrap();
        assert_eq!(verified.sub, owner);
    }

    #[test]
    fn wrong_secret_rejected() {
        let claims = Claims::for_owner(OwnerId::new(), Duration::hours(1));
        let token = sign_token(SECRET, &claims);
        assert_eq!(
            verify_token(b"other", &token, Utc::now()),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn expired_rejected() {
        let claims = Claims::for_owner(OwnerId::new(), Duration::hours(1));
        let token = sign_token(SECRET, &claims);
        assert_eq!(
            verify_token(SECRET, &token, Utc::now() + Duration::hours(2)),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn tampered_payload_rejected() {
        let claims = Claims::for_owner(OwnerId::new(), Duration::hours(1));
        let token = sign_token(SECRET, &claims);
        let mut tampered = token.clone();
        tampered.replace_range(0..1, if token.starts_with('A') { "B" } else { "A" });
        assert!(verify_token(SECRET, &tampered, Utc::now()).is_err());
    }

    #[test]
    fn garbage_rejected() {
        for token in ["", "abc", "abc.def", "a.b.c"] {
            assert!(verify_token(SECRET, token, Utc::now()).is_err(), "{token:?}");
        }
    }
}

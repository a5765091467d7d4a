//! Webhook signature verification.
//!
//! The provider signs the raw request body and sends the result in a header
//! shaped `t=<unix seconds>,v1=<hex hmac>`, where the MAC is
//! HMAC-SHA256(secret, "{t}.{body}"). Verification runs **before any state
//! change**; the timestamp bound rejects replayed captures outside the
//! tolerance window.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Default tolerance between the signed timestamp and `now`.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("malformed signature header")]
    Malformed,

    #[error("signature timestamp outside tolerance")]
    TimestampOutOfTolerance,

    #[error("signature mismatch")]
    Mismatch,
}

/// Verify a `t=...,v1=...` header against the raw body.
pub fn verify_signature(
    secret: &[u8],
    header: &str,
    body: &[u8],
    now_unix: i64,
    tolerance_secs: i64,
) -> Result<(), SignatureError> {
    let (timestamp, provided) = parse_header(header)?;

    if (now_unix - timestamp).abs() > tolerance_secs {
        return Err(SignatureError::TimestampOutOfTolerance);
    }

    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::Malformed)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);

    // Constant-time comparison via the mac itself.
    mac.verify_slice(&provided).map_err(|_| SignatureError::Mismatch)
}

/// Produce a `t=...,v1=...` header for a body. Used by tests and local tools
/// standing in for the provider.
pub fn sign_payload(secret: &[u8], body: &[u8], timestamp_unix: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(timestamp_unix.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    let tag = mac.finalize().into_bytes();
    format!("t={},v1={}", timestamp_unix, hex_encode(&tag))
}

fn parse_header(header: &str) -> Result<(i64, Vec<u8>), SignatureError> {
    let mut timestamp = None;
    let mut signature = None;

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = v.parse::<i64>().ok(),
            Some(("v1", v)) => signature = hex_decode(v),
            _ => {}
        }
    }

    match (timestamp, signature) {
        (Some(t), Some(sig)) if !sig.is_empty() => Ok((t, sig)),
        _ => Err(SignatureError::Malformed),
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        use core::fmt::Write;
        let _ = write!(out, "{b:02x}");
    }
    out
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

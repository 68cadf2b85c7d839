//! Slack request signature verification.
//!
//! Slack signs `v0:{timestamp}:{raw body}` with the app's signing secret and
//! sends `v0=<hex hmac-sha256>` in `X-Slack-Signature`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

pub const SIGNATURE_HEADER: &str = "x-slack-signature";
pub const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";

/// Oldest accepted request, in seconds.
const MAX_AGE_SECS: i64 = 5 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("missing signature headers")]
    Missing,
    #[error("request timestamp outside the accepted window")]
    Stale,
    #[error("signature mismatch")]
    Mismatch,
}

/// Check a Slack signature for `body` received at `now` (unix seconds).
pub fn verify(
    secret: &[u8],
    timestamp: Option<&str>,
    signature: Option<&str>,
    body: &[u8],
    now: i64,
) -> Result<(), SignatureError> {
    let (Some(timestamp), Some(signature)) = (timestamp, signature) else {
        return Err(SignatureError::Missing);
    };

    let sent_at: i64 = timestamp.parse().map_err(|_| SignatureError::Stale)?;
    if (now - sent_at).abs() > MAX_AGE_SECS {
        return Err(SignatureError::Stale);
    }

    let expected = signature
        .strip_prefix("v0=")
        .and_then(|hex_sig| hex::decode(hex_sig).ok())
        .ok_or(SignatureError::Mismatch)?;

    let mut mac = Hmac::<Sha256>::new_from_slice(secret).map_err(|_| SignatureError::Mismatch)?;
    mac.update(b"v0:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}

/// Produce the `X-Slack-Signature` value for a request.
#[cfg(test)]
pub fn sign(secret: &[u8], timestamp: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret).unwrap();
    mac.update(format!("v0:{timestamp}:").as_bytes());
    mac.update(body);
    format!("v0={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"8f742231b10e8888abcd99yyyzzz85a5";
    const BODY: &[u8] = b"token=xyz&team_id=T1&command=%2Flocks";

    #[test]
    fn test_valid_signature() {
        let signature = sign(SECRET, "1531420618", BODY);
        assert_eq!(
            verify(SECRET, Some("1531420618"), Some(&signature), BODY, 1531420700),
            Ok(())
        );
    }

    #[test]
    fn test_tampered_body_rejected() {
        let signature = sign(SECRET, "1531420618", BODY);
        assert_eq!(
            verify(SECRET, Some("1531420618"), Some(&signature), b"team_id=T2", 1531420618),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify(b"other", Some("1531420618"), Some(&signature), BODY, 1531420618),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify(SECRET, Some("1531420618"), Some("v1=abcd"), BODY, 1531420618),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_stale_or_missing_rejected() {
        let signature = sign(SECRET, "1531420618", BODY);
        assert_eq!(
            verify(SECRET, Some("1531420618"), Some(&signature), BODY, 1531420618 + 301),
            Err(SignatureError::Stale)
        );
        assert_eq!(
            verify(SECRET, Some("yesterday"), Some(&signature), BODY, 1531420618),
            Err(SignatureError::Stale)
        );
        assert_eq!(
            verify(SECRET, None, Some(&signature), BODY, 1531420618),
            Err(SignatureError::Missing)
        );
    }
}

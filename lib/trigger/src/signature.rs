//! Webhook signature verification.
//!
//! Three schemes, all HMAC-SHA256 over the raw request body with the
//! configured secret, compared in constant time:
//!
//! - **github**: `X-Hub-Signature-256: sha256=<hex>`
//! - **slack**: `X-Slack-Signature: v0=<hex>` over `v0:<timestamp>:<body>`,
//!   with the timestamp required to be within five minutes of now
//! - **generic**: `X-Webhook-Signature: [sha256=]<hex>`

use crate::error::TriggerError;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Maximum allowed skew between a Slack request timestamp and now.
pub const SLACK_TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Computes the hex HMAC-SHA256 of `message` with `secret`.
#[must_use]
pub fn hmac_sha256_hex(secret: &str, message: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time comparison of a provided hex digest against an expected
/// digest. Invalid hex rejects without revealing where decoding failed.
fn verify_hex_digest(provided_hex: &str, expected_hex: &str) -> Result<(), TriggerError> {
    let provided = hex::decode(provided_hex).map_err(|_| TriggerError::SignatureInvalid {
        reason: "signature is not valid hex".to_string(),
    })?;
    let expected = hex::decode(expected_hex).expect("computed digest is valid hex");

    if provided.len() != expected.len()
        || provided.as_slice().ct_eq(expected.as_slice()).unwrap_u8() != 1
    {
        return Err(TriggerError::SignatureInvalid {
            reason: "signature mismatch".to_string(),
        });
    }
    Ok(())
}

/// Verifies a GitHub `X-Hub-Signature-256` header.
///
/// # Errors
///
/// Returns `SignatureInvalid` on a missing prefix, bad hex, or mismatch.
pub fn verify_github(secret: &str, body: &[u8], header: &str) -> Result<(), TriggerError> {
    let provided = header
        .strip_prefix("sha256=")
        .ok_or_else(|| TriggerError::SignatureInvalid {
            reason: "expected sha256= prefix".to_string(),
        })?;
    verify_hex_digest(provided, &hmac_sha256_hex(secret, body))
}

/// Verifies a Slack request signature.
///
/// The base string is `v0:<timestamp>:<body>`; the timestamp must be
/// within [`SLACK_TIMESTAMP_TOLERANCE_SECS`] of `now` to defeat replay.
///
/// # Errors
///
/// Returns `SignatureInvalid` on a stale timestamp, a missing prefix, bad
/// hex, or mismatch.
pub fn verify_slack(
    secret: &str,
    body: &[u8],
    timestamp: &str,
    signature: &str,
    now: DateTime<Utc>,
) -> Result<(), TriggerError> {
    let ts: i64 = timestamp
        .parse()
        .map_err(|_| TriggerError::SignatureInvalid {
            reason: "invalid request timestamp".to_string(),
        })?;
    if (now.timestamp() - ts).abs() > SLACK_TIMESTAMP_TOLERANCE_SECS {
        return Err(TriggerError::SignatureInvalid {
            reason: "request timestamp outside tolerance".to_string(),
        });
    }

    let provided = signature
        .strip_prefix("v0=")
        .ok_or_else(|| TriggerError::SignatureInvalid {
            reason: "expected v0= prefix".to_string(),
        })?;

    let mut base = format!("v0:{timestamp}:").into_bytes();
    base.extend_from_slice(body);
    verify_hex_digest(provided, &hmac_sha256_hex(secret, &base))
}

/// Verifies a generic `X-Webhook-Signature` header. The `sha256=` prefix
/// is optional.
///
/// # Errors
///
/// Returns `SignatureInvalid` on bad hex or mismatch.
pub fn verify_generic(secret: &str, body: &[u8], header: &str) -> Result<(), TriggerError> {
    let provided = header.strip_prefix("sha256=").unwrap_or(header);
    verify_hex_digest(provided, &hmac_sha256_hex(secret, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SECRET: &str = "test-secret";
    const BODY: &[u8] = br#"{"action":"opened"}"#;

    fn flip_last_char(s: &str) -> String {
        let mut chars: Vec<char> = s.chars().collect();
        let last = chars.last_mut().unwrap();
        *last = if *last == '0' { '1' } else { '0' };
        chars.into_iter().collect()
    }

    #[test]
    fn github_accepts_valid_signature() {
        let header = format!("sha256={}", hmac_sha256_hex(SECRET, BODY));
        assert!(verify_github(SECRET, BODY, &header).is_ok());
    }

    #[test]
    fn github_rejects_flipped_signature() {
        let header = format!("sha256={}", flip_last_char(&hmac_sha256_hex(SECRET, BODY)));
        assert!(verify_github(SECRET, BODY, &header).is_err());
    }

    #[test]
    fn github_rejects_missing_prefix() {
        let header = hmac_sha256_hex(SECRET, BODY);
        assert!(verify_github(SECRET, BODY, &header).is_err());
    }

    #[test]
    fn github_rejects_wrong_secret() {
        let header = format!("sha256={}", hmac_sha256_hex("other-secret", BODY));
        assert!(verify_github(SECRET, BODY, &header).is_err());
    }

    #[test]
    fn github_rejects_non_hex() {
        assert!(verify_github(SECRET, BODY, "sha256=zzzz").is_err());
    }

    #[test]
    fn slack_accepts_valid_signature() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let timestamp = now.timestamp().to_string();
        let mut base = format!("v0:{timestamp}:").into_bytes();
        base.extend_from_slice(BODY);
        let signature = format!("v0={}", hmac_sha256_hex(SECRET, &base));

        assert!(verify_slack(SECRET, BODY, &timestamp, &signature, now).is_ok());
    }

    #[test]
    fn slack_rejects_stale_timestamp() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let stale = (now.timestamp() - 301).to_string();
        let mut base = format!("v0:{stale}:").into_bytes();
        base.extend_from_slice(BODY);
        let signature = format!("v0={}", hmac_sha256_hex(SECRET, &base));

        let result = verify_slack(SECRET, BODY, &stale, &signature, now);
        assert!(matches!(result, Err(TriggerError::SignatureInvalid { .. })));
    }

    #[test]
    fn slack_accepts_timestamp_within_tolerance() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let skewed = (now.timestamp() - 299).to_string();
        let mut base = format!("v0:{skewed}:").into_bytes();
        base.extend_from_slice(BODY);
        let signature = format!("v0={}", hmac_sha256_hex(SECRET, &base));

        assert!(verify_slack(SECRET, BODY, &skewed, &signature, now).is_ok());
    }

    #[test]
    fn slack_rejects_flipped_signature() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let timestamp = now.timestamp().to_string();
        let mut base = format!("v0:{timestamp}:").into_bytes();
        base.extend_from_slice(BODY);
        let signature = format!("v0={}", flip_last_char(&hmac_sha256_hex(SECRET, &base)));

        assert!(verify_slack(SECRET, BODY, &timestamp, &signature, now).is_err());
    }

    #[test]
    fn generic_accepts_with_and_without_prefix() {
        let digest = hmac_sha256_hex(SECRET, BODY);
        assert!(verify_generic(SECRET, BODY, &digest).is_ok());
        assert!(verify_generic(SECRET, BODY, &format!("sha256={digest}")).is_ok());
    }

    #[test]
    fn generic_rejects_mismatch() {
        let digest = flip_last_char(&hmac_sha256_hex(SECRET, BODY));
        assert!(verify_generic(SECRET, BODY, &digest).is_err());
    }

    #[test]
    fn every_byte_flip_rejects() {
        // Flipping any single hex character must reject
        let digest = hmac_sha256_hex(SECRET, BODY);
        for i in 0..digest.len() {
            let mut tampered: Vec<char> = digest.chars().collect();
            tampered[i] = if tampered[i] == 'f' { 'e' } else { 'f' };
            let tampered: String = tampered.into_iter().collect();
            if tampered == digest {
                continue;
            }
            assert!(verify_generic(SECRET, BODY, &tampered).is_err());
        }
    }
}

//! Webhook signature verification.
//!
//! Providers sign each delivery with an HMAC-SHA256 digest over the exact
//! request body bytes. Verification goes through `Mac::verify_slice`, which
//! compares in constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verify a hex-encoded HMAC-SHA256 digest over the raw body.
pub fn verify_hmac_sha256(secret: &str, body: &[u8], digest_hex: &str) -> bool {
    let Ok(expected) = hex::decode(digest_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Verify a Meta-style `sha256=<hex>` signature header, as sent by the
/// WhatsApp, Messenger, and Instagram webhook platforms.
pub fn verify_meta_signature(app_secret: &str, body: &[u8], header: &str) -> bool {
    match header.strip_prefix("sha256=") {
        Some(digest) => verify_hmac_sha256(app_secret, body, digest),
        None => false,
    }
}

/// Compute the hex HMAC-SHA256 digest for a body. Used by tests and by
/// clients constructing signed requests.
pub fn sign_hmac_sha256(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length, so this cannot fail.
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

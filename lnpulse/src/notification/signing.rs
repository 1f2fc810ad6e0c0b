//! HMAC-SHA256 signatures for webhook bodies.
//!
//! The header value is `sha256=<lowercase hex>` computed over the exact bytes sent.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

const SIGNATURE_PREFIX: &str = "sha256=";

fn mac_for(secret: &str) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Other(format!("Invalid HMAC key: {}", e)))
}

/// Sign `body` with `secret`, returning the header value.
pub fn sign(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = mac_for(secret)?;
    mac.update(body);
    Ok(format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Verify a header value against `body` in constant time.
pub fn verify(secret: &str, body: &[u8], header_value: &str) -> bool {
    let Some(hex_sig) = header_value.trim().strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = mac_for(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

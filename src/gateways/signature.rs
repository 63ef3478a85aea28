//! Webhook signature primitives shared by the provider adapters.

use hmac::{Hmac, Mac};
use sha2::Sha512;
use subtle::ConstantTimeEq;

type HmacSha512 = Hmac<Sha512>;

/// Lowercase hex HMAC-SHA512 of `payload`.
pub fn hmac_sha512_hex(secret: &[u8], payload: &[u8]) -> String {
    match HmacSha512::new_from_slice(secret) {
        Ok(mut mac) => {
            mac.update(payload);
            hex::encode(mac.finalize().into_bytes())
        }
        Err(_) => String::new(),
    }
}

/// Checks a hex HMAC-SHA512 signature in constant time.
pub fn verify_hmac_sha512(secret: &[u8], payload: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha512::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Constant-time comparison of a shared secret echoed back by a provider.
pub fn secrets_match(expected: &str, presented: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}

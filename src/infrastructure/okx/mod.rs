pub mod private_ws;
pub mod public_ws;
pub mod rest;

pub use private_ws::{OkxPrivateWs, PrivateFeedEvent};
pub use public_ws::{OkxPublicWs, PublicFeedEvent};
pub use rest::OkxRestClient;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// OKX signature: base64(HMAC-SHA256(secret, timestamp + method + path + body)).
pub(crate) fn sign(secret: &str, prehash: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(prehash.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_is_deterministic_base64() {
        let a = sign("secret", "2026-01-01T00:00:00.000ZGET/users/self/verify");
        let b = sign("secret", "2026-01-01T00:00:00.000ZGET/users/self/verify");
        assert_eq!(a, b);
        // 32-byte HMAC output → 44-char base64
        assert_eq!(a.len(), 44);
    }

    #[test]
    fn test_sign_differs_by_secret() {
        assert_ne!(sign("a", "payload"), sign("b", "payload"));
    }
}

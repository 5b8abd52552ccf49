//! Request Signing
//!
//! MEXC authenticates private REST calls with an HMAC-SHA256 signature of
//! the query string, hex encoded and appended as `signature=<hex>`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs canonical query strings with the account secret.
#[derive(Clone)]
pub struct Signer {
    secret: String,
}

impl Signer {
    /// Create a signer for `secret`.
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Lowercase hex HMAC-SHA256 of `query_string`.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn sign(&self, query_string: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(query_string.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_vector() {
        let signer = Signer::new("testsecret");
        let query = "price=100&quantity=0.1&recvWindow=5000&side=BUY&symbol=BTCUSDT&timeInForce=GTC&timestamp=1700000000000&type=LIMIT";
        assert_eq!(
            signer.sign(query),
            "7ce35481df1c771813dfdf305ecf8a94804816bdc818eeb0404e79a58c887f66"
        );
    }

    #[test]
    fn timestamp_only_query() {
        let signer = Signer::new("testsecret");
        assert_eq!(
            signer.sign("timestamp=1700000000000"),
            "dd273985d88b32eaeeb19cafcc2dbaa9ac658e274cd4095d474395560c4b09b7"
        );
    }

    #[test]
    fn debug_redacts_secret() {
        let debug = format!("{:?}", Signer::new("super_secret"));
        assert!(!debug.contains("super_secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}

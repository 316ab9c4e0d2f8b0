use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use time::OffsetDateTime;

use crate::crypto::{Crypto, pseudo_random_bytes};

const CSRF_TOKEN_BYTES: usize = 32;

/// Single-use nonce binding an outgoing redirect to the response completing it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CsrfToken {
    csrf_token: String,
}

impl CsrfToken {
    /// Generate a new token from 32 bytes of random data, base64 url encoded as a 43 character
    /// string.
    ///
    /// Falls back to a seeded pseudo-random generator if the secure source fails. A predictable
    /// nonce weakens CSRF protection but still lets the sign-in flow complete.
    pub fn generate(crypto: &dyn Crypto, now: OffsetDateTime) -> Self {
        let bytes = match crypto.random_bytes(CSRF_TOKEN_BYTES) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(
                    ?err,
                    "Secure random source unavailable. Falling back to a pseudo-random CSRF token."
                );
                let seed = u64::try_from(now.unix_timestamp_nanos() & i128::from(u64::MAX))
                    .unwrap_or_default();
                pseudo_random_bytes(CSRF_TOKEN_BYTES, seed)
            }
        };

        Self {
            csrf_token: URL_SAFE_NO_PAD.encode(bytes),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.csrf_token
    }

    pub fn into_string(self) -> String {
        self.csrf_token
    }
}

use rand::{RngCore, SeedableRng, TryRngCore};
use sha2::Digest;
use snafu::Snafu;

#[derive(Debug, Snafu)]
pub enum CryptoError {
    #[snafu(display("CryptoError: Secure random source unavailable: {reason}"))]
    RandomUnavailable { reason: String },
}

/// Cryptographic primitives the engine relies on.
pub trait Crypto {
    /// Fill a buffer of `len` bytes from a cryptographically secure source.
    fn random_bytes(&self, len: usize) -> Result<Vec<u8>, CryptoError>;

    fn sha256(&self, data: &[u8]) -> [u8; 32];
}

/// Backed by the operating system's random source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCrypto;

impl Crypto for SystemCrypto {
    fn random_bytes(&self, len: usize) -> Result<Vec<u8>, CryptoError> {
        let mut bytes = vec![0u8; len];
        rand::rngs::OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|err| CryptoError::RandomUnavailable {
                reason: err.to_string(),
            })?;
        Ok(bytes)
    }

    fn sha256(&self, data: &[u8]) -> [u8; 32] {
        sha2::Sha256::digest(data).into()
    }
}

/// Non-secure bytes, only acceptable where a predictable value degrades protection instead of
/// breaking it (the CSRF nonce).
pub(crate) fn pseudo_random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = rand::rngs::SmallRng::seed_from_u64(seed);
    let mut bytes = vec![0u8; len];
    rng.fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use assertr::prelude::*;

    use super::*;

    #[test]
    fn random_bytes_have_requested_length() {
        let bytes = SystemCrypto.random_bytes(43).unwrap();
        assert_that(bytes.len()).is_equal_to(43);
    }

    #[test]
    fn sha256_of_known_input() {
        use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};

        // RFC 7636, appendix B.
        let digest = SystemCrypto.sha256(b"dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk");
        assert_that(URL_SAFE_NO_PAD.encode(digest))
            .is_equal_to("E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM".to_owned());
    }

    #[test]
    fn pseudo_random_bytes_depend_on_seed() {
        assert_that(pseudo_random_bytes(16, 1)).is_not_equal_to(pseudo_random_bytes(16, 2));
    }
}

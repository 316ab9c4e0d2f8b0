use std::collections::BTreeMap;
use std::rc::Rc;

use codee::string::JsonSerdeCodec;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::code_verifier::{CodeVerifier, CodeVerifierError, PkcePair};
use crate::crypto::Crypto;
use crate::error::TrustError;
use crate::storage::StorageHandle;
use crate::time_ext::OffsetDateTimeExt;

pub(crate) const PKCE_KEY: &str = "trust_session_pkce";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct VerifierEntry {
    verifier: String,

    /// Unix milliseconds.
    issued_at: i64,
}

/// Nonce -> verifier.
type VerifierBucket = BTreeMap<String, VerifierEntry>;

/// Manages PKCE code verifiers of pending authorization code flows.
///
/// Verifiers are stored in durable storage, keyed by the nonce of the flow they belong to, as the
/// authorization flow navigates away from the page and back before the code can be exchanged.
/// A verifier is handed out once. Like CSRF nonces, entries older than the TTL are purged lazily.
///
/// # Internal Use
/// This is an internal component exposed via the `internals` feature flag for advanced
/// use cases like testing or debugging.
#[derive(Clone)]
pub struct PkceManager {
    storage: StorageHandle,
    crypto: Rc<dyn Crypto>,
    clock: Rc<dyn Clock>,
    ttl: time::Duration,
}

impl std::fmt::Debug for PkceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkceManager")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl PkceManager {
    pub fn new(
        storage: StorageHandle,
        crypto: Rc<dyn Crypto>,
        clock: Rc<dyn Clock>,
        ttl: time::Duration,
    ) -> Self {
        Self {
            storage,
            crypto,
            clock,
            ttl,
        }
    }

    /// Generate a verifier of `verifier_length` random bytes and remember it for `nonce`.
    ///
    /// There is no fallback to a non-secure random source.
    pub fn create(&self, nonce: &str, verifier_length: usize) -> Result<PkcePair, TrustError> {
        let verifier = CodeVerifier::generate(self.crypto.as_ref(), verifier_length).map_err(
            |err| match err {
                CodeVerifierError::InvalidLength { .. } => TrustError::InvalidConfig {
                    reason: err.to_string(),
                },
                CodeVerifierError::Random { source } => TrustError::Crypto { source },
            },
        )?;
        let challenge = verifier.to_code_challenge(self.crypto.as_ref());

        let mut bucket = self.read_bucket();
        self.purge(&mut bucket);
        bucket.insert(
            nonce.to_owned(),
            VerifierEntry {
                verifier: verifier.code_verifier().to_owned(),
                issued_at: self.clock.now().unix_timestamp_millis(),
            },
        );
        self.storage
            .write::<VerifierBucket, JsonSerdeCodec>(PKCE_KEY, &bucket)
            .map_err(|source| TrustError::Storage { source })?;

        Ok(PkcePair {
            verifier,
            challenge,
        })
    }

    /// Hand out the verifier of `nonce` and forget it. Empty when unknown, expired or already
    /// consumed.
    pub fn consume(&self, nonce: &str) -> String {
        let mut bucket = self.read_bucket();
        let purged = self.purge(&mut bucket);
        let entry = bucket.remove(nonce);

        if entry.is_some() || purged {
            let result = match bucket.is_empty() {
                true => self.storage.remove(PKCE_KEY),
                false => self
                    .storage
                    .write::<VerifierBucket, JsonSerdeCodec>(PKCE_KEY, &bucket),
            };
            if let Err(err) = result {
                tracing::error!(?err, "Could not persist PKCE verifiers.");
            }
        }

        match entry {
            Some(entry) => entry.verifier,
            None => {
                tracing::warn!(nonce, "No PKCE verifier known for nonce.");
                String::new()
            }
        }
    }

    fn purge(&self, bucket: &mut VerifierBucket) -> bool {
        let oldest_allowed = (self.clock.now() - self.ttl).unix_timestamp_millis();
        let before = bucket.len();
        bucket.retain(|_, entry| entry.issued_at > oldest_allowed);
        bucket.len() != before
    }

    fn read_bucket(&self) -> VerifierBucket {
        self.storage
            .read::<VerifierBucket, JsonSerdeCodec>(PKCE_KEY)
            .unwrap_or_else(|err| {
                tracing::error!(?err, "Could not read PKCE verifiers.");
                None
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use assertr::prelude::*;
    use time::macros::datetime;

    use super::*;
    use crate::clock::ManualClock;
    use crate::crypto::SystemCrypto;
    use crate::storage::MemoryStorage;

    fn cut() -> (PkceManager, Rc<ManualClock>) {
        let clock = Rc::new(ManualClock::new(datetime!(2024-06-01 10:00:00 UTC)));
        let manager = PkceManager::new(
            StorageHandle::select(Some(Rc::new(MemoryStorage::new()))),
            Rc::new(SystemCrypto),
            clock.clone(),
            time::Duration::hours(1),
        );
        (manager, clock)
    }

    #[test]
    fn verifier_is_consumed_exactly_once() {
        let (manager, _) = cut();
        let pair = manager.create("nonce", 43).unwrap();

        assert_that(manager.consume("nonce")).is_equal_to(pair.verifier.code_verifier().to_owned());
        assert_that(manager.consume("nonce")).is_equal_to(String::new());
    }

    #[test]
    fn challenge_is_derived_from_verifier() {
        let (manager, _) = cut();
        let pair = manager.create("nonce", 43).unwrap();
        assert_that(pair.verifier.to_code_challenge(&SystemCrypto)).is_equal_to(pair.challenge);
    }

    #[test]
    fn verifiers_are_kept_per_nonce() {
        let (manager, _) = cut();
        let first = manager.create("first", 43).unwrap();
        let second = manager.create("second", 64).unwrap();
        assert_that(manager.consume("second"))
            .is_equal_to(second.verifier.code_verifier().to_owned());
        assert_that(manager.consume("first"))
            .is_equal_to(first.verifier.code_verifier().to_owned());
    }

    #[test]
    fn expired_verifier_is_gone() {
        let (manager, clock) = cut();
        manager.create("nonce", 43).unwrap();
        clock.advance(time::Duration::minutes(61));
        assert_that(manager.consume("nonce")).is_equal_to(String::new());
    }

    #[test]
    fn invalid_length_is_a_config_error() {
        let (manager, _) = cut();
        let err = manager.create("nonce", 8).unwrap_err();
        assert_that(err.kind()).is_equal_to(crate::error::TrustErrorKind::InvalidConfig);
    }
}

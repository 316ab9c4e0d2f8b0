use std::collections::BTreeMap;
use std::rc::Rc;

use codee::string::JsonSerdeCodec;

use crate::clock::Clock;
use crate::crypto::Crypto;
use crate::csrf_token::CsrfToken;
use crate::storage::StorageHandle;
use crate::time_ext::OffsetDateTimeExt;

pub(crate) const NONCE_PREFIX: &str = "trust_session_nonces";

/// Nonce -> issuance instant in unix milliseconds.
type NonceBucket = BTreeMap<String, i64>;

/// Issues and verifies single-use CSRF nonces of one client.
///
/// Nonces live in durable storage, as every sign-in includes navigating away from the page and
/// back again. Without durable storage there is nothing to compare against after the redirect,
/// so issuing yields an empty nonce and verification always succeeds.
///
/// Reading, purging and writing the bucket happens synchronously in one call. No await may ever
/// be introduced in between, as that would allow a nonce to be consumed twice.
///
/// # Internal Use
/// This is an internal component exposed via the `internals` feature flag for advanced
/// use cases like testing or debugging.
#[derive(Clone)]
pub struct CsrfGuard {
    client_id: String,
    storage: StorageHandle,
    crypto: Rc<dyn Crypto>,
    clock: Rc<dyn Clock>,
    ttl: time::Duration,
}

impl std::fmt::Debug for CsrfGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrfGuard")
            .field("client_id", &self.client_id)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl CsrfGuard {
    pub fn new(
        client_id: impl Into<String>,
        storage: StorageHandle,
        crypto: Rc<dyn Crypto>,
        clock: Rc<dyn Clock>,
        ttl: time::Duration,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            storage,
            crypto,
            clock,
            ttl,
        }
    }

    fn storage_key(&self) -> String {
        format!("{NONCE_PREFIX}/{}", self.client_id)
    }

    /// Issue a new nonce. Returns an empty string when no durable storage is available.
    pub fn initialize(&self) -> String {
        if !self.storage.is_durable() {
            tracing::trace!("No durable storage. Not issuing a CSRF nonce.");
            return String::new();
        }

        let now = self.clock.now();
        let nonce = CsrfToken::generate(self.crypto.as_ref(), now).into_string();

        let mut bucket = self.read_bucket();
        self.purge(&mut bucket);
        bucket.insert(nonce.clone(), now.unix_timestamp_millis());
        self.write_bucket(&bucket);

        tracing::trace!(client_id = self.client_id, "Issued CSRF nonce.");
        nonce
    }

    /// Returns `true` exactly once for every issued nonce.
    pub fn verify(&self, nonce: &str) -> bool {
        if !self.storage.is_durable() {
            return true;
        }

        let mut bucket = self.read_bucket();
        let purged = self.purge(&mut bucket);
        let found = bucket.remove(nonce).is_some();
        if found || purged {
            self.write_bucket(&bucket);
        }

        if found {
            tracing::trace!("Verification of the CSRF nonce succeeded.");
        } else {
            tracing::warn!(
                received_nonce = nonce,
                "CSRF nonce verification failed. The nonce is unknown, expired or was already used."
            );
        }
        found
    }

    /// Remove entries older than the TTL. Returns whether anything was removed.
    fn purge(&self, bucket: &mut NonceBucket) -> bool {
        let oldest_allowed = (self.clock.now() - self.ttl).unix_timestamp_millis();
        let before = bucket.len();
        bucket.retain(|_, issued_at| *issued_at > oldest_allowed);
        bucket.len() != before
    }

    fn read_bucket(&self) -> NonceBucket {
        self.storage
            .read::<NonceBucket, JsonSerdeCodec>(&self.storage_key())
            .unwrap_or_else(|err| {
                tracing::error!(?err, "Could not read CSRF nonces.");
                None
            })
            .unwrap_or_default()
    }

    fn write_bucket(&self, bucket: &NonceBucket) {
        let key = self.storage_key();
        let result = match bucket.is_empty() {
            true => self.storage.remove(&key),
            false => self.storage.write::<NonceBucket, JsonSerdeCodec>(&key, bucket),
        };
        if let Err(err) = result {
            tracing::error!(?err, "Could not persist CSRF nonces.");
        }
    }
}

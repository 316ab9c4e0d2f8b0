use codee::string::JsonSerdeCodec;
use time::OffsetDateTime;

use crate::error::TrustError;
use crate::response::Profile;
use crate::storage::StorageHandle;
use crate::token::{REAUTH_SCOPE, Scope, TokenKey, TokenRecord};

/// Persisted tokens and profiles of one client and its requested scope.
///
/// There is one slot for regular tokens and one for reauth tokens.
#[derive(Debug, Clone)]
pub(crate) struct TokenStore {
    storage: StorageHandle,
    client_id: String,
    scope: Scope,
}

impl TokenStore {
    pub(crate) fn new(storage: StorageHandle, client_id: impl Into<String>, scope: Scope) -> Self {
        Self {
            storage,
            client_id: client_id.into(),
            scope,
        }
    }

    pub(crate) fn key(&self, is_reauth: bool) -> TokenKey {
        TokenKey::new(self.client_id.as_str(), &self.scope, is_reauth)
    }

    /// Scope a token of the given slot must cover.
    pub(crate) fn required_scope(&self, is_reauth: bool) -> Scope {
        match is_reauth {
            true => self.scope.clone().with(REAUTH_SCOPE),
            false => self.scope.clone(),
        }
    }

    /// The stored token, if it is still usable. Unusable tokens are removed.
    pub(crate) fn load(&self, is_reauth: bool, now: OffsetDateTime) -> Option<TokenRecord> {
        let key = self.key(is_reauth).token_storage_key();
        let token = self
            .storage
            .read::<TokenRecord, JsonSerdeCodec>(&key)
            .unwrap_or_else(|err| {
                tracing::error!(?err, "Could not read stored token.");
                None
            })?;

        match token.validate(&self.client_id, &self.required_scope(is_reauth), now) {
            Ok(()) => Some(token),
            Err(err) => {
                tracing::trace!(%err, "Discarding stored token.");
                self.remove(is_reauth);
                None
            }
        }
    }

    /// Replace the token in the slot matching `token.is_reauth()`.
    pub(crate) fn save(&self, token: &TokenRecord) -> Result<(), TrustError> {
        let key = self.key(token.is_reauth()).token_storage_key();
        self.storage
            .write::<TokenRecord, JsonSerdeCodec>(&key, token)
            .map_err(|source| TrustError::Storage { source })
    }

    /// Remove the token and the profile cached for it.
    pub(crate) fn remove(&self, is_reauth: bool) {
        let key = self.key(is_reauth);
        for storage_key in [key.token_storage_key(), key.profile_storage_key()] {
            if let Err(err) = self.storage.remove(&storage_key) {
                tracing::error!(?err, storage_key, "Could not remove stored value.");
            }
        }
    }

    pub(crate) fn remove_all(&self) {
        self.remove(false);
        self.remove(true);
    }

    pub(crate) fn load_profile(&self, is_reauth: bool) -> Option<Profile> {
        let key = self.key(is_reauth).profile_storage_key();
        self.storage
            .read::<Profile, JsonSerdeCodec>(&key)
            .unwrap_or_else(|err| {
                tracing::error!(?err, "Could not read stored profile.");
                None
            })
    }

    pub(crate) fn save_profile(&self, is_reauth: bool, profile: &Profile) {
        let key = self.key(is_reauth).profile_storage_key();
        if let Err(err) = self.storage.write::<Profile, JsonSerdeCodec>(&key, profile) {
            tracing::error!(?err, "Could not store profile.");
        }
    }
}

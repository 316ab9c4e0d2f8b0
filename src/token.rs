use std::collections::BTreeSet;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use snafu::Snafu;
use time::OffsetDateTime;

use crate::token_claims::AccessTokenClaims;

/// Scope marker the identity provider adds to tokens issued by a forced re-authentication.
pub const REAUTH_SCOPE: &str = "reauthenticated";

pub const TOKEN_PREFIX: &str = "trust_session_access_token";
pub const PROFILE_PREFIX: &str = "trust_session_profile";

/// A sorted set of scopes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scope(BTreeSet<String>);

impl Scope {
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            scopes
                .into_iter()
                .map(|it| it.as_ref().trim().to_owned())
                .filter(|it| !it.is_empty())
                .collect(),
        )
    }

    /// Accepts comma as well as whitespace separated lists.
    pub fn parse(raw: &str) -> Self {
        Self::new(raw.split(|c: char| c == ',' || c.is_whitespace()))
    }

    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains(scope)
    }

    pub fn is_superset_of(&self, other: &Scope) -> bool {
        self.0.is_superset(&other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn with(mut self, scope: &str) -> Self {
        self.0.insert(scope.to_owned());
        self
    }

    pub fn without(mut self, scope: &str) -> Self {
        self.0.remove(scope);
        self
    }

    /// Sorted, comma separated.
    pub fn to_csv(&self) -> String {
        self.0.iter().join(",")
    }
}

/// Storage location of a token. At most one token exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenKey {
    pub client_id: String,

    /// Requested scope, never containing the reauth marker.
    pub scope: Scope,

    pub is_reauth: bool,
}

impl TokenKey {
    pub fn new(client_id: impl Into<String>, scope: &Scope, is_reauth: bool) -> Self {
        Self {
            client_id: client_id.into(),
            scope: scope.clone().without(REAUTH_SCOPE),
            is_reauth,
        }
    }

    pub fn token_storage_key(&self) -> String {
        self.storage_key(TOKEN_PREFIX)
    }

    pub fn profile_storage_key(&self) -> String {
        self.storage_key(PROFILE_PREFIX)
    }

    fn storage_key(&self, prefix: &str) -> String {
        format!(
            "{prefix}/{}/{}/{}",
            self.client_id,
            self.is_reauth,
            self.scope.to_csv()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
pub enum TokenValidationError {
    #[snafu(display("TokenValidationError: Token expired"))]
    Expired,

    #[snafu(display("TokenValidationError: Token was marked invalid"))]
    MarkedInvalid,

    #[snafu(display("TokenValidationError: Token belongs to another client"))]
    ClientMismatch,

    #[snafu(display("TokenValidationError: Token lacks required scope"))]
    InsufficientScope,
}

fn default_valid() -> bool {
    true
}

/// A persisted access token. Never mutated, only replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Opaque bearer value.
    pub value: String,

    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    pub client_id: String,

    /// Granted scope.
    pub scope: Scope,

    pub session_id: Option<String>,

    pub user_id: Option<String>,

    pub impersonator_id: Option<String>,

    pub is_impersonated_session: bool,

    /// PBA policies this token satisfies.
    pub pba: Vec<String>,

    /// Whether this token was read from a redirect fragment instead of an api response.
    pub from_fragment: bool,

    /// Explicit invalidation marker.
    #[serde(default = "default_valid")]
    pub valid: bool,
}

impl TokenRecord {
    /// Build a record for a freshly received bearer value. Identity fields are filled from the
    /// token's claims when the value is a JWT.
    pub fn new(
        value: String,
        expires_at: OffsetDateTime,
        client_id: impl Into<String>,
        scope: Scope,
        from_fragment: bool,
    ) -> Self {
        let claims = AccessTokenClaims::decode_unverified(&value).unwrap_or_default();
        Self {
            value,
            expires_at,
            client_id: client_id.into(),
            scope,
            session_id: claims.sid,
            user_id: claims.user_id,
            impersonator_id: claims.imp_id,
            is_impersonated_session: claims.imp_sid.is_some(),
            pba: claims.pba,
            from_fragment,
            valid: true,
        }
    }

    pub fn is_reauth(&self) -> bool {
        self.scope.contains(REAUTH_SCOPE)
    }

    pub fn time_left(&self, now: OffsetDateTime) -> time::Duration {
        self.expires_at - now
    }

    /// Check whether this token can be used by `client_id` for `required_scope`.
    pub fn validate(
        &self,
        client_id: &str,
        required_scope: &Scope,
        now: OffsetDateTime,
    ) -> Result<(), TokenValidationError> {
        if self.expires_at <= now {
            return Err(TokenValidationError::Expired);
        }
        if !self.valid {
            return Err(TokenValidationError::MarkedInvalid);
        }
        if self.client_id != client_id {
            return Err(TokenValidationError::ClientMismatch);
        }
        if !self.scope.is_superset_of(required_scope) {
            return Err(TokenValidationError::InsufficientScope);
        }
        Ok(())
    }
}

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Flat view of the parameters in a redirect's fragment (or query).
pub type FragmentParams = BTreeMap<String, String>;

/// Parse the post-`#` (or post-`?`) part of a URL. A leading `#` or `?` is ignored.
pub fn parse_fragment(raw: &str) -> FragmentParams {
    let raw = raw.trim_start_matches(['#', '?']);
    url::form_urlencoded::parse(raw.as_bytes())
        .into_owned()
        .collect()
}

/// Apis we accept tokens from.
pub(crate) const ALLOWED_APIS: [&str; 2] = ["authorize", "check_token"];

/// Object we send through the identity provider in the `state` parameter and expect back
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RedirectState {
    /// Version of this library which initiated the redirect.
    pub jslibver: String,

    pub nonce: String,

    /// Analytics app code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ac: Option<String>,

    /// Analytics app version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub av: Option<String>,

    /// Arbitrary data of the host application.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,

    /// Set when the sign-in happens inside a popup window.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub modal: bool,
}

/// Typed view of a redirect fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RedirectFragment {
    /// Provenance marker. Only fragments the identity provider produced carry it.
    pub from_idp: bool,
    pub client_id: Option<String>,
    pub api: Option<String>,
    pub state: Option<RedirectState>,
    pub error: Option<OidcErrorCode>,
    pub error_description: Option<String>,
    pub access_token: Option<String>,
    /// Seconds.
    pub expires_in: Option<i64>,
    pub code: Option<String>,
    pub scope: Option<String>,
    /// The fragment the page had before we redirected away.
    pub old_hash: Option<String>,
}

impl RedirectFragment {
    pub(crate) fn from_params(params: &FragmentParams) -> Self {
        let get = |key: &str| params.get(key).filter(|it| !it.is_empty()).cloned();

        let state = get("state").and_then(|raw| match serde_json::from_str::<RedirectState>(&raw) {
            Ok(state) => Some(state),
            Err(err) => {
                tracing::debug!(?err, "Could not parse redirect state.");
                None
            }
        });

        let expires_in = get("expires_in").and_then(|raw| {
            raw.parse::<i64>()
                .inspect_err(|err| {
                    tracing::warn!("Could not parse `expires_in` fragment parameter: {err}");
                })
                .ok()
        });

        Self {
            from_idp: params
                .get("from_idp")
                .is_some_and(|it| it.eq_ignore_ascii_case("true")),
            client_id: get("client_id"),
            api: get("api"),
            state,
            error: get("error").map(OidcErrorCode::from),
            error_description: get("error_description"),
            access_token: get("access_token"),
            expires_in,
            code: get("code"),
            scope: get("scope"),
            old_hash: params.get("old_hash").cloned(),
        }
    }

    pub(crate) fn is_modal(&self) -> bool {
        self.state.as_ref().is_some_and(|it| it.modal)
    }

    pub(crate) fn is_allowed_api(&self) -> bool {
        self.api
            .as_deref()
            .is_some_and(|api| ALLOWED_APIS.contains(&api))
    }

    pub(crate) fn nonce(&self) -> Option<&str> {
        self.state.as_ref().map(|it| it.nonce.as_str())
    }
}

/// See [RFC 6749 Section 4.1.2.1](https://datatracker.ietf.org/doc/html/rfc6749#section-4.1.2.1)
/// and [Section 5.2](https://datatracker.ietf.org/doc/html/rfc6749#section-5.2).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum KnownOidcErrorCode {
    #[serde(rename = "invalid_request")]
    InvalidRequest,

    #[serde(rename = "invalid_client")]
    InvalidClient,

    /// The provided authorization grant or refresh token is invalid, expired or revoked.
    #[serde(rename = "invalid_grant")]
    InvalidGrant,

    #[serde(rename = "unauthorized_client")]
    UnauthorizedClient,

    #[serde(rename = "unsupported_grant_type")]
    UnsupportedGrantType,

    #[serde(rename = "invalid_scope")]
    InvalidScope,

    /// The resource owner or authorization server denied the request.
    #[serde(rename = "access_denied")]
    AccessDenied,

    #[serde(rename = "server_error")]
    ServerError,

    #[serde(rename = "temporarily_unavailable")]
    TemporarilyUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum OidcErrorCode {
    Known(KnownOidcErrorCode),
    Unknown(String),
}

impl OidcErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            OidcErrorCode::Known(known) => match known {
                KnownOidcErrorCode::InvalidRequest => "invalid_request",
                KnownOidcErrorCode::InvalidClient => "invalid_client",
                KnownOidcErrorCode::InvalidGrant => "invalid_grant",
                KnownOidcErrorCode::UnauthorizedClient => "unauthorized_client",
                KnownOidcErrorCode::UnsupportedGrantType => "unsupported_grant_type",
                KnownOidcErrorCode::InvalidScope => "invalid_scope",
                KnownOidcErrorCode::AccessDenied => "access_denied",
                KnownOidcErrorCode::ServerError => "server_error",
                KnownOidcErrorCode::TemporarilyUnavailable => "temporarily_unavailable",
            },
            OidcErrorCode::Unknown(other) => other.as_str(),
        }
    }
}

impl From<String> for OidcErrorCode {
    fn from(raw: String) -> Self {
        serde_json::from_value(serde_json::Value::String(raw.clone()))
            .unwrap_or(OidcErrorCode::Unknown(raw))
    }
}

/// Error body of a failed identity provider api call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub error: Option<String>,
    pub error_description: Option<String>,

    /// Where the user has to go to resolve a `ride_*` error.
    pub jump: Option<String>,
}

impl ErrorResponse {
    pub(crate) fn from_body(body: &serde_json::Value) -> Self {
        serde_json::from_value(body.clone()).unwrap_or_default()
    }

    pub fn is_ride(&self) -> bool {
        self.error
            .as_deref()
            .is_some_and(|error| error.starts_with("ride_"))
    }
}

/// Successful answer of the refresh and code exchange endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub(crate) struct SuccessTokenResponse {
    pub access_token: String,
    /// Seconds.
    pub expires_in: i64,
    pub token_type: Option<String>,
    pub scope: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub(crate) struct ValidateTokenResponse {
    pub valid: bool,
}

/// The user profile as served by the identity provider.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Profile {
    #[serde(alias = "userId")]
    pub user_id: String,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(flatten)]
    pub additional: HashMap<String, serde_json::Value>,
}

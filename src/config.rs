use std::time::Duration;

use url::Url;

use crate::code_verifier::DEFAULT_VERIFIER_LENGTH;
use crate::error::TrustError;
use crate::token::Scope;

/// Options of one engine instance.
#[derive(Debug, Clone)]
pub struct TrustOptions {
    /// Base url of the identity provider, E.g. "https://idp.example.com/".
    pub idp_base_url: Url,

    /// Optional proxy in front of the identity provider. Refreshes go through it first.
    pub proxy_base_url: Option<Url>,

    /// The name of this client as registered at the identity provider.
    pub client_id: String,

    pub scope: Vec<String>,

    /// Url the identity provider redirects back to after sign-in.
    pub redirect_uri: Url,

    pub response_type: ResponseType,

    pub locale: Option<String>,

    /// Validate stored tokens remotely before using them.
    pub auto_validate_token: bool,

    /// Fetch the user profile together with the token on initialization.
    pub load_profile: bool,

    pub analytics: Option<Analytics>,

    /// Arbitrary host data sent through the redirect state.
    pub context: Option<serde_json::Value>,

    pub advanced: AdvancedOptions,
}

impl TrustOptions {
    pub fn new(idp_base_url: Url, client_id: impl Into<String>, redirect_uri: Url) -> Self {
        Self {
            idp_base_url,
            proxy_base_url: None,
            client_id: client_id.into(),
            scope: Vec::new(),
            redirect_uri,
            response_type: ResponseType::Token,
            locale: None,
            auto_validate_token: false,
            load_profile: false,
            analytics: None,
            context: None,
            advanced: AdvancedOptions::default(),
        }
    }

    pub fn scope(&self) -> Scope {
        Scope::new(&self.scope)
    }

    pub(crate) fn endpoints(&self) -> Result<Endpoints, TrustError> {
        Endpoints::derive(&self.idp_base_url, self.proxy_base_url.as_ref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    /// Implicit flow, the token arrives in the fragment.
    #[default]
    Token,

    /// Authorization code flow with PKCE.
    Code,
}

impl ResponseType {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Token => "token",
            ResponseType::Code => "code",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analytics {
    pub app_code: String,
    pub app_version: String,
}

#[derive(Debug, Clone)]
pub struct AdvancedOptions {
    /// Age after which unused nonces and PKCE verifiers are purged.
    /// Defaults to one hour.
    pub nonce_ttl: time::Duration,

    /// Lifetime of deduplicated responses.
    /// Defaults to `Duration::from_secs(1)`.
    pub response_cache_ttl: Duration,

    /// Time given to a navigation towards a ride jump url.
    /// Defaults to `Duration::from_secs(10)`.
    pub ride_redirect_wait: Duration,

    /// Defaults to `Duration::from_secs(30)`.
    pub request_timeout: Duration,

    /// Random bytes drawn for a PKCE verifier.
    /// Defaults to `43`.
    pub verifier_length: usize,
}

impl Default for AdvancedOptions {
    fn default() -> Self {
        Self {
            nonce_ttl: time::Duration::hours(1),
            response_cache_ttl: Duration::from_secs(1),
            ride_redirect_wait: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            verifier_length: DEFAULT_VERIFIER_LENGTH,
        }
    }
}

/// Identity provider endpoints, derived from the configured base urls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Endpoints {
    /// The identity provider's base url, with a trailing slash. Relative urls it hands out are
    /// resolved against it.
    pub identity_provider: Url,
    pub authorize: Url,
    pub token: Url,
    pub check_token: Url,
    pub proxied_check_token: Option<Url>,
    pub validate_token: Url,
    pub profile: Url,
    pub logout: Url,
}

impl Endpoints {
    fn derive(base: &Url, proxy: Option<&Url>) -> Result<Self, TrustError> {
        Ok(Self {
            identity_provider: endpoint(base, &[""])?,
            authorize: endpoint(base, &["oauth", "authorize"])?,
            token: endpoint(base, &["oauth", "token"])?,
            check_token: endpoint(base, &["oauth", "check_token"])?,
            proxied_check_token: proxy
                .map(|proxy| endpoint(proxy, &["oauth", "check_token"]))
                .transpose()?,
            validate_token: endpoint(base, &["oauth", "validate_token"])?,
            profile: endpoint(base, &["oauth", "profile"])?,
            logout: endpoint(base, &["oauth", "logout"])?,
        })
    }
}

fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, TrustError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| TrustError::InvalidConfig {
            reason: format!("'{base}' cannot be a base url"),
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

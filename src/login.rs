use std::collections::BTreeMap;

use url::Url;

use crate::code_verifier::CodeChallenge;
use crate::config::ResponseType;
use crate::error::TrustError;
use crate::response::RedirectState;
use crate::token::Scope;

/// Re-authentication mode of a sign-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reauth {
    /// Only ask for credentials if the identity provider deems it necessary.
    Check,

    /// Always ask for credentials. The resulting token carries the reauth scope marker.
    Force,
}

impl Reauth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reauth::Check => "check",
            Reauth::Force => "force",
        }
    }
}

/// Parameters of a single sign-in redirect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignInParams {
    /// Overrides the configured redirect uri.
    pub redirect_uri: Option<Url>,

    pub reauth: Option<Reauth>,

    /// The sign-in happens in a popup window. The authorize url is returned instead of
    /// navigated to.
    pub modal: bool,

    /// Additional parameters passed to the authorize endpoint unchanged.
    pub extra: BTreeMap<String, String>,
}

pub(crate) struct AuthorizeRequest<'a> {
    pub client_id: &'a str,
    pub scope: &'a Scope,
    pub redirect_uri: &'a Url,
    pub response_type: ResponseType,
    pub state: &'a RedirectState,
    pub locale: Option<&'a str>,
    pub code_challenge: Option<&'a CodeChallenge>,
    pub reauth: Option<Reauth>,
    pub extra: &'a BTreeMap<String, String>,
}

pub(crate) fn create_authorize_url(
    authorize_endpoint: &Url,
    request: &AuthorizeRequest<'_>,
) -> Result<Url, TrustError> {
    let state =
        serde_json::to_string(request.state).map_err(|source| TrustError::Serde { source })?;

    let mut url = authorize_endpoint.clone();
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("client_id", request.client_id)
            .append_pair("scope", &request.scope.to_csv())
            .append_pair("redirect_uri", request.redirect_uri.as_str())
            .append_pair("response_type", request.response_type.as_str())
            .append_pair("state", &state);
        if let Some(locale) = request.locale {
            query.append_pair("locale", locale);
        }
        if let Some(challenge) = request.code_challenge {
            query
                .append_pair("code_challenge", challenge.code_challenge())
                .append_pair(
                    "code_challenge_method",
                    challenge.code_challenge_method().as_str(),
                );
        }
        if let Some(reauth) = request.reauth {
            query.append_pair("reauth", reauth.as_str());
        }
        for (key, value) in request.extra {
            query.append_pair(key, value);
        }
    }
    Ok(url)
}

/// The redirect uri extended by the fragment the page currently has, so that it can be restored
/// after the identity provider redirected back.
pub(crate) fn redirect_uri_with_old_hash(redirect_uri: &Url, old_hash: &str) -> Url {
    let mut redirect_uri = redirect_uri.clone();
    if !old_hash.is_empty() {
        redirect_uri
            .query_pairs_mut()
            .append_pair("old_hash", old_hash);
    }
    redirect_uri
}

#[cfg(test)]
mod tests {
    use assertr::prelude::*;

    use super::*;
    use crate::response::parse_fragment;

    #[test]
    fn authorize_url_carries_all_parameters() {
        let state = RedirectState {
            jslibver: "0.1.0".to_owned(),
            nonce: "nonce-1".to_owned(),
            ac: None,
            av: None,
            context: None,
            modal: false,
        };
        let mut extra = BTreeMap::new();
        extra.insert("idp_hint".to_owned(), "google".to_owned());

        let url = create_authorize_url(
            &Url::parse("https://idp.example/oauth/authorize").unwrap(),
            &AuthorizeRequest {
                client_id: "client",
                scope: &Scope::parse("profile,openid"),
                redirect_uri: &Url::parse("https://app.example/").unwrap(),
                response_type: ResponseType::Token,
                state: &state,
                locale: Some("de_DE"),
                code_challenge: None,
                reauth: Some(Reauth::Force),
                extra: &extra,
            },
        )
        .unwrap();

        let params = parse_fragment(url.query().unwrap());
        assert_that(params.get("scope").cloned()).is_equal_to(Some("openid,profile".to_owned()));
        assert_that(params.get("reauth").cloned()).is_equal_to(Some("force".to_owned()));
        assert_that(params.get("idp_hint").cloned()).is_equal_to(Some("google".to_owned()));
        assert_that(params.get("locale").cloned()).is_equal_to(Some("de_DE".to_owned()));
        assert_that(params.contains_key("code_challenge")).is_false();

        let echoed: RedirectState = serde_json::from_str(params.get("state").unwrap()).unwrap();
        assert_that(echoed).is_equal_to(state);
    }

    #[test]
    fn empty_old_hash_leaves_redirect_uri_untouched() {
        let uri = Url::parse("https://app.example/page").unwrap();
        assert_that(redirect_uri_with_old_hash(&uri, "")).is_equal_to(uri);
    }

    #[test]
    fn old_hash_is_appended() {
        let uri = Url::parse("https://app.example/page").unwrap();
        let extended = redirect_uri_with_old_hash(&uri, "#section");
        assert_that(extended.as_str()).is_equal_to("https://app.example/page?old_hash=%23section");
    }
}

use time::OffsetDateTime;

use crate::error::{FragmentErrorKind, FragmentException, ModalSignInEvent, TrustError};
use crate::internal::csrf_guard::CsrfGuard;
use crate::internal::pkce_manager::PkceManager;
use crate::internal::token_store::TokenStore;
use crate::response::{FragmentParams, RedirectFragment};
use crate::token::{Scope, TokenRecord};
use crate::token_claims::AccessTokenClaims;

/// Result of looking at the current redirect fragment and the stored token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionOutcome {
    NoResult,

    /// Freshly received through the fragment, or read from storage.
    Token(TokenRecord),

    /// An authorization code waiting to be exchanged.
    AuthorizationCode {
        code: String,
        code_verifier: String,
        nonce: String,
    },

    FragmentError(FragmentException),

    /// The current page is a sign-in popup.
    ModalSignIn(ModalSignInEvent),
}

/// Classifies a redirect fragment.
pub(crate) struct TokenAcquisition<'a> {
    pub client_id: &'a str,

    /// Used for tokens whose fragment does not name the granted scope.
    pub requested_scope: &'a Scope,

    pub csrf: &'a CsrfGuard,
    pub pkce: &'a PkceManager,
    pub tokens: &'a TokenStore,
    pub now: OffsetDateTime,

    /// The fragment was handed over by a sign-in popup. Its modal marker is expected.
    pub modal_result: bool,
}

impl TokenAcquisition<'_> {
    /// Classify `params`, falling back to the stored token of the `is_reauth` slot.
    ///
    /// Only an authorization code without a known verifier fails outright.
    pub(crate) fn acquire(
        &self,
        params: &FragmentParams,
        is_reauth: bool,
    ) -> Result<AcquisitionOutcome, TrustError> {
        if let Some(outcome) = self.classify_fragment(params)? {
            return Ok(outcome);
        }
        Ok(match self.tokens.load(is_reauth, self.now) {
            Some(token) => {
                tracing::trace!("Using stored token.");
                AcquisitionOutcome::Token(token)
            }
            None => AcquisitionOutcome::NoResult,
        })
    }

    /// `None` when the fragment is absent or not meant for us.
    pub(crate) fn classify_fragment(
        &self,
        params: &FragmentParams,
    ) -> Result<Option<AcquisitionOutcome>, TrustError> {
        if params.is_empty() {
            return Ok(None);
        }
        let fragment = RedirectFragment::from_params(params);

        if fragment.is_modal() && !self.modal_result {
            tracing::trace!("Fragment belongs to a modal sign-in.");
            return Ok(Some(AcquisitionOutcome::ModalSignIn(ModalSignInEvent {
                client_id: self.client_id.to_owned(),
                params: params.clone(),
            })));
        }

        if !fragment.from_idp {
            return Ok(None);
        }

        if fragment.client_id.as_deref() != Some(self.client_id) {
            tracing::trace!(
                fragment_client_id = ?fragment.client_id,
                "Ignoring fragment of another client."
            );
            return Ok(None);
        }

        if let Some(error) = &fragment.error {
            tracing::warn!(
                error = error.as_str(),
                error_description = ?fragment.error_description,
                "Identity provider reported an error in the redirect."
            );
            return Ok(Some(AcquisitionOutcome::FragmentError(FragmentException {
                kind: FragmentErrorKind::Fragment,
                error: Some(error.as_str().to_owned()),
                error_description: fragment.error_description.clone(),
            })));
        }

        if !fragment.is_allowed_api() {
            tracing::warn!(api = ?fragment.api, "Rejecting fragment of a foreign api.");
            return Ok(Some(AcquisitionOutcome::FragmentError(
                FragmentException::new(FragmentErrorKind::NotAllowed),
            )));
        }

        let nonce = fragment.nonce().unwrap_or_default().to_owned();
        if !self.csrf.verify(&nonce) {
            return Ok(Some(AcquisitionOutcome::FragmentError(
                FragmentException::new(FragmentErrorKind::Csrf),
            )));
        }

        if let Some(code) = fragment.code {
            let code_verifier = self.pkce.consume(&nonce);
            if code_verifier.is_empty() {
                return Err(TrustError::MissingCodeVerifier { nonce });
            }
            return Ok(Some(AcquisitionOutcome::AuthorizationCode {
                code,
                code_verifier,
                nonce,
            }));
        }

        let Some(access_token) = fragment.access_token else {
            return Ok(Some(AcquisitionOutcome::FragmentError(FragmentException {
                kind: FragmentErrorKind::Fragment,
                error: Some("missing_token".to_owned()),
                error_description: None,
            })));
        };

        let expires_at = match fragment.expires_in {
            Some(expires_in) => Some(self.now + time::Duration::seconds(expires_in)),
            None => AccessTokenClaims::decode_unverified(&access_token)
                .and_then(|claims| claims.expires_at()),
        };
        let Some(expires_at) = expires_at else {
            return Ok(Some(AcquisitionOutcome::FragmentError(FragmentException {
                kind: FragmentErrorKind::Fragment,
                error: Some("missing_expiry".to_owned()),
                error_description: None,
            })));
        };

        let scope = match fragment.scope.as_deref().map(Scope::parse) {
            Some(scope) if !scope.is_empty() => scope,
            _ => self.requested_scope.clone(),
        };

        let token = TokenRecord::new(access_token, expires_at, self.client_id, scope, true);
        self.tokens.save(&token)?;
        tracing::trace!(is_reauth = token.is_reauth(), "Accepted token from fragment.");

        Ok(Some(AcquisitionOutcome::Token(token)))
    }
}

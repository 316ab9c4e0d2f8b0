use std::cell::Cell;
use std::rc::{Rc, Weak};

use url::Url;

use crate::LIB_VERSION;
use crate::callbacks::{ErrorType, TrustCallbacks};
use crate::config::{ResponseType, TrustOptions};
use crate::context::TrustContext;
use crate::error::{ModalSignInEvent, RideException, TrustError, TrustErrorKind};
use crate::host::UserActivity;
use crate::internal::csrf_guard::CsrfGuard;
use crate::internal::instance_registry::InstanceAnnouncement;
use crate::internal::pkce_manager::PkceManager;
use crate::internal::refresh_scheduler::{RefreshCallback, RefreshParams};
use crate::internal::response_deduper::ResponseDeduper;
use crate::internal::token_acquisition::{AcquisitionOutcome, TokenAcquisition};
use crate::internal::token_service::TokenService;
use crate::internal::token_store::TokenStore;
use crate::login::{self, AuthorizeRequest, Reauth, SignInParams};
use crate::logout;
use crate::response::{
    FragmentParams, Profile, RedirectFragment, RedirectState, SuccessTokenResponse,
};
use crate::token::{Scope, TokenRecord};

/// A usable token, together with the profile of its user if profile loading is enabled.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenAndProfile {
    pub token: TokenRecord,
    pub profile: Option<Profile>,
}

/// How [`TrustOrchestrator::initialize`] settled.
#[derive(Debug)]
pub enum InitializeOutcome {
    SignedIn(TokenAndProfile),

    /// This page was a sign-in popup. Its result was handed to the opener.
    ModalSignInCompleted,

    /// The session is gone. `on_access_token_has_expired` was called.
    TokenExpired,

    /// Unrecoverable. `on_error` was called, unless a navigation already took over.
    Failed(TrustError),
}

struct Inner {
    options: TrustOptions,
    scope: Scope,
    callbacks: TrustCallbacks,
    context: TrustContext,
    csrf: CsrfGuard,
    pkce: PkceManager,
    tokens: TokenStore,
    service: TokenService,
    ready_dispatched: Cell<bool>,
}

/// The session engine of one client.
///
/// Cheap to clone, all clones drive the same state.
#[derive(Clone)]
pub struct TrustOrchestrator {
    inner: Rc<Inner>,
}

impl std::fmt::Debug for TrustOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustOrchestrator")
            .field("client_id", &self.inner.options.client_id)
            .field("scope", &self.inner.scope)
            .field("ready_dispatched", &self.inner.ready_dispatched.get())
            .finish_non_exhaustive()
    }
}

/// Non-owning handle of a [`TrustOrchestrator`].
#[derive(Debug, Clone)]
pub struct WeakTrustOrchestrator(Weak<Inner>);

impl WeakTrustOrchestrator {
    pub fn upgrade(&self) -> Option<TrustOrchestrator> {
        self.0.upgrade().map(|inner| TrustOrchestrator { inner })
    }

    #[cfg(test)]
    pub(crate) fn dangling() -> Self {
        Self(Weak::new())
    }
}

impl TrustOrchestrator {
    pub fn new(
        options: TrustOptions,
        callbacks: TrustCallbacks,
        context: TrustContext,
    ) -> Result<Self, TrustError> {
        if options.client_id.trim().is_empty() {
            return Err(TrustError::InvalidConfig {
                reason: "client_id must not be empty".to_owned(),
            });
        }
        let endpoints = options.endpoints()?;
        let scope = options.scope();

        let csrf = CsrfGuard::new(
            options.client_id.as_str(),
            context.storage.clone(),
            context.crypto.clone(),
            context.clock.clone(),
            options.advanced.nonce_ttl,
        );
        let pkce = PkceManager::new(
            context.storage.clone(),
            context.crypto.clone(),
            context.clock.clone(),
            options.advanced.nonce_ttl,
        );
        let tokens = TokenStore::new(
            context.storage.clone(),
            options.client_id.as_str(),
            scope.clone(),
        );
        let service = TokenService::new(
            context.http.clone(),
            ResponseDeduper::new(options.advanced.response_cache_ttl),
            endpoints,
            options.client_id.as_str(),
            options.advanced.request_timeout,
        );

        tracing::trace!(client_id = options.client_id, ?scope, "Created orchestrator.");

        Ok(Self {
            inner: Rc::new(Inner {
                options,
                scope,
                callbacks,
                context,
                csrf,
                pkce,
                tokens,
                service,
                ready_dispatched: Cell::new(false),
            }),
        })
    }

    pub fn downgrade(&self) -> WeakTrustOrchestrator {
        WeakTrustOrchestrator(Rc::downgrade(&self.inner))
    }

    pub fn client_id(&self) -> &str {
        &self.inner.options.client_id
    }

    pub fn options(&self) -> &TrustOptions {
        &self.inner.options
    }

    #[cfg(feature = "internals")]
    pub fn csrf_guard(&self) -> &CsrfGuard {
        &self.inner.csrf
    }

    #[cfg(feature = "internals")]
    pub fn pkce_manager(&self) -> &PkceManager {
        &self.inner.pkce
    }

    /// Acquire a token for the current page and settle every failure.
    ///
    /// Dispatches `on_ready` after the first initialization that did not end in a popup hand-over.
    pub async fn initialize(&self) -> InitializeOutcome {
        tracing::trace!(client_id = self.client_id(), "Initializing.");
        let params = self.inner.context.page.fragment_params();
        let outcome = self.settle(&params, false).await;
        if !matches!(outcome, InitializeOutcome::ModalSignInCompleted) {
            self.dispatch_ready();
        }
        outcome
    }

    /// Process the result of a sign-in popup. Call this on the page which opened the popup.
    pub async fn complete_modal_sign_in(&self, event: ModalSignInEvent) -> InitializeOutcome {
        tracing::trace!(client_id = event.client_id, "Completing modal sign-in.");
        let outcome = self.settle(&event.params, true).await;
        self.dispatch_ready();
        outcome
    }

    /// Token (and profile) for the current page, without any recovery.
    pub async fn get_token_and_profile(&self) -> Result<TokenAndProfile, TrustError> {
        let params = self.inner.context.page.fragment_params();
        self.token_and_profile_from(&params, false).await
    }

    async fn settle(&self, params: &FragmentParams, modal_result: bool) -> InitializeOutcome {
        match self.token_and_profile_from(params, modal_result).await {
            Ok(acquired) => {
                if !modal_result {
                    self.restore_fragment(params);
                }
                self.accept(&acquired.token);
                InitializeOutcome::SignedIn(acquired)
            }
            Err(err) => self.recover(err, params, modal_result).await,
        }
    }

    async fn token_and_profile_from(
        &self,
        params: &FragmentParams,
        modal_result: bool,
    ) -> Result<TokenAndProfile, TrustError> {
        let acquisition = TokenAcquisition {
            client_id: self.client_id(),
            requested_scope: &self.inner.scope,
            csrf: &self.inner.csrf,
            pkce: &self.inner.pkce,
            tokens: &self.inner.tokens,
            now: self.inner.context.clock.now(),
            modal_result,
        };

        let token = match acquisition.acquire(params, false)? {
            AcquisitionOutcome::ModalSignIn(event) => {
                return Err(TrustError::ModalSignIn { event });
            }
            AcquisitionOutcome::FragmentError(fragment) => return Err(fragment.into()),
            AcquisitionOutcome::AuthorizationCode {
                code,
                code_verifier,
                ..
            } => self.exchange_code(&code, &code_verifier).await?,
            AcquisitionOutcome::Token(token)
                if token.from_fragment || !self.inner.options.auto_validate_token =>
            {
                token
            }
            AcquisitionOutcome::Token(token) => {
                match self.inner.service.validate_token(&token.value).await {
                    Ok(true) => token,
                    Ok(false) => {
                        tracing::debug!("Stored token was rejected by the identity provider.");
                        self.refresh(RefreshParams::default()).await?
                    }
                    Err(err) => {
                        tracing::debug!(%err, "Could not validate stored token.");
                        self.refresh(RefreshParams::default()).await?
                    }
                }
            }
            AcquisitionOutcome::NoResult => self.refresh(RefreshParams::default()).await?,
        };

        let profile = match self.inner.options.load_profile {
            true => Some(self.profile_for(&token).await?),
            false => None,
        };
        Ok(TokenAndProfile { token, profile })
    }

    /// The recovery chain. Every stage either settles the failure or passes it on.
    async fn recover(
        &self,
        err: TrustError,
        params: &FragmentParams,
        modal_result: bool,
    ) -> InitializeOutcome {
        let err = match err {
            TrustError::ModalSignIn { event } => {
                self.notify_opener(&event);
                return InitializeOutcome::ModalSignInCompleted;
            }
            err => err,
        };

        if !modal_result {
            self.restore_fragment(params);
        }

        match err.kind() {
            TrustErrorKind::TokenExpired => {
                tracing::trace!("Session expired.");
                self.inner.callbacks.access_token_has_expired();
                return InitializeOutcome::TokenExpired;
            }
            TrustErrorKind::Ride => {
                if let TrustError::Ride { ride } = &err {
                    self.follow_ride(ride).await;
                }
            }
            TrustErrorKind::Fragment(_) if err.is_csrf() => {
                tracing::warn!("CSRF check failed. Signing out.");
                self.sign_out(None);
            }
            _ => {}
        }

        self.inner.callbacks.error(ErrorType::Http, &err);
        InitializeOutcome::Failed(err)
    }

    async fn follow_ride(&self, ride: &RideException) {
        if self.inner.callbacks.ride_redirect(ride) == Some(false) {
            tracing::trace!(code = ride.code, "Host declined ride redirect.");
            return;
        }
        if ride.is_pba_idle_session {
            tracing::trace!("Session idle for its PBA policy. Signing in again.");
            if let Err(err) = self.sign_in(SignInParams::default()) {
                tracing::warn!(%err, "Could not start sign-in.");
            }
            return;
        }
        tracing::trace!(code = ride.code, jump = %ride.jump, "Following ride redirect.");
        self.inner
            .context
            .navigator
            .replace_and_wait(&ride.jump, self.inner.options.advanced.ride_redirect_wait)
            .await;
    }

    fn notify_opener(&self, event: &ModalSignInEvent) {
        if !self.inner.context.messenger.notify_opener(event) {
            tracing::trace!("No opener window. Broadcasting modal sign-in result.");
            self.inner.context.messenger.broadcast(event);
        }
    }

    /// Put back the fragment the page had before the sign-in redirect.
    fn restore_fragment(&self, params: &FragmentParams) {
        let fragment = RedirectFragment::from_params(params);
        if fragment.from_idp {
            let old_hash = fragment.old_hash.unwrap_or_default();
            self.inner.context.page.replace_fragment(&old_hash);
        }
    }

    fn dispatch_ready(&self) {
        if self.inner.ready_dispatched.replace(true) {
            return;
        }
        self.inner.callbacks.ready();
        self.inner.context.registry.publish(InstanceAnnouncement::new(
            self.inner.options.client_id.clone(),
            LIB_VERSION,
            self.downgrade(),
        ));
    }

    fn accept(&self, token: &TokenRecord) {
        self.inner.callbacks.access_token(token);
        self.arm_refresh(token);
    }

    fn arm_refresh(&self, token: &TokenRecord) {
        if token.is_reauth() {
            return;
        }
        self.inner.context.scheduler.arm(
            Some(token.expires_at),
            Some(self.refresh_callback()),
            self.inner.context.clock.now(),
        );
    }

    fn refresh_callback(&self) -> RefreshCallback {
        let weak = self.downgrade();
        Rc::new(move |params: RefreshParams, is_auto_refresh: bool| {
            let Some(this) = weak.upgrade() else {
                return;
            };
            tokio::task::spawn_local(async move {
                this.auto_refresh(params, is_auto_refresh).await;
            });
        })
    }

    async fn auto_refresh(&self, params: RefreshParams, is_auto_refresh: bool) {
        if let Err(err) = self.refresh_token(params, is_auto_refresh).await {
            match err.kind() {
                TrustErrorKind::TokenExpired => self.inner.callbacks.access_token_has_expired(),
                _ => self.inner.callbacks.error(ErrorType::Http, &err),
            }
        }
    }

    /// Fetch a fresh token and notify the host through `on_access_token`.
    ///
    /// HTTP and ride failures are returned unchanged and are never retried. Every other failure
    /// discards the stored token and is reported as [`TrustError::TokenExpired`].
    pub async fn refresh_token(
        &self,
        params: RefreshParams,
        is_auto_refresh: bool,
    ) -> Result<TokenRecord, TrustError> {
        tracing::trace!(?params, is_auto_refresh, "Refreshing token.");
        let token = self.refresh(params).await?;
        self.inner.callbacks.access_token(&token);
        Ok(token)
    }

    async fn refresh(&self, params: RefreshParams) -> Result<TokenRecord, TrustError> {
        match self.inner.service.refresh(&self.inner.scope, params).await {
            Ok(response) => {
                let token = self.record_from_response(response);
                self.inner.tokens.save(&token)?;
                self.arm_refresh(&token);
                Ok(token)
            }
            Err(err) => match err.kind() {
                TrustErrorKind::Http | TrustErrorKind::Ride => Err(err),
                _ => {
                    tracing::debug!(%err, "Refresh failed. Discarding stored token.");
                    self.inner.tokens.remove(false);
                    Err(TrustError::TokenExpired {
                        reason: err.to_string(),
                    })
                }
            },
        }
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenRecord, TrustError> {
        tracing::trace!("Exchanging authorization code.");
        let response = self
            .inner
            .service
            .exchange_code(code, code_verifier, &self.inner.options.redirect_uri)
            .await?;
        let token = self.record_from_response(response);
        self.inner.tokens.save(&token)?;
        Ok(token)
    }

    fn record_from_response(&self, response: SuccessTokenResponse) -> TokenRecord {
        let scope = match response.scope.as_deref().map(Scope::parse) {
            Some(scope) if !scope.is_empty() => scope,
            _ => self.inner.scope.clone(),
        };
        TokenRecord::new(
            response.access_token,
            self.inner.context.clock.now() + time::Duration::seconds(response.expires_in),
            self.client_id(),
            scope,
            false,
        )
    }

    /// Start a sign-in. Navigates to the authorize endpoint, unless `params.modal` is set.
    ///
    /// Returns the authorize url.
    pub fn sign_in(&self, params: SignInParams) -> Result<Url, TrustError> {
        let options = &self.inner.options;
        let nonce = self.inner.csrf.initialize();

        let pkce = match options.response_type {
            ResponseType::Code => Some(
                self.inner
                    .pkce
                    .create(&nonce, options.advanced.verifier_length)?,
            ),
            ResponseType::Token => None,
        };

        let state = RedirectState {
            jslibver: LIB_VERSION.to_owned(),
            nonce,
            ac: options.analytics.as_ref().map(|it| it.app_code.clone()),
            av: options.analytics.as_ref().map(|it| it.app_version.clone()),
            context: options.context.clone(),
            modal: params.modal,
        };

        let old_hash = self
            .inner
            .context
            .page
            .current_url()
            .fragment()
            .unwrap_or_default()
            .to_owned();
        let redirect_uri = login::redirect_uri_with_old_hash(
            params.redirect_uri.as_ref().unwrap_or(&options.redirect_uri),
            &old_hash,
        );

        let url = login::create_authorize_url(
            &self.inner.service.endpoints().authorize,
            &AuthorizeRequest {
                client_id: &options.client_id,
                scope: &self.inner.scope,
                redirect_uri: &redirect_uri,
                response_type: options.response_type,
                state: &state,
                locale: options.locale.as_deref(),
                code_challenge: pkce.as_ref().map(|it| &it.challenge),
                reauth: params.reauth,
                extra: &params.extra,
            },
        )?;

        tracing::trace!(reauth = ?params.reauth, modal = params.modal, "Signing in.");
        if !params.modal {
            self.inner.context.navigator.replace(&url);
        }
        Ok(url)
    }

    pub fn re_authenticate(&self, reauth: Reauth) -> Result<Url, TrustError> {
        self.sign_in(SignInParams {
            reauth: Some(reauth),
            ..SignInParams::default()
        })
    }

    /// Forget every token and profile of this client, stop auto refreshing and navigate to the
    /// identity provider's logout endpoint.
    pub fn sign_out(&self, redirect_uri: Option<Url>) -> Url {
        self.inner.tokens.remove_all();
        self.inner.context.scheduler.cancel();

        let url = logout::create_logout_url(
            &self.inner.service.endpoints().logout,
            self.client_id(),
            redirect_uri
                .as_ref()
                .unwrap_or(&self.inner.options.redirect_uri),
        );
        tracing::trace!(%url, "Signing out.");
        self.inner.context.navigator.set_href(&url);
        url
    }

    /// Profile of the current user. Served from storage when already known.
    pub async fn get_profile(&self) -> Result<Profile, TrustError> {
        let token = self.get_access_token().ok_or_else(|| TrustError::Profile {
            reason: "no usable token".to_owned(),
        })?;
        self.profile_for(&token).await
    }

    async fn profile_for(&self, token: &TokenRecord) -> Result<Profile, TrustError> {
        if let Some(profile) = self.inner.tokens.load_profile(token.is_reauth()) {
            return Ok(profile);
        }
        let profile = self
            .inner
            .service
            .fetch_profile(&token.value)
            .await
            .map_err(|err| TrustError::Profile {
                reason: err.to_string(),
            })?;
        self.inner.tokens.save_profile(token.is_reauth(), &profile);
        Ok(profile)
    }

    pub fn get_access_token(&self) -> Option<TokenRecord> {
        self.inner
            .tokens
            .load(false, self.inner.context.clock.now())
    }

    pub fn get_reauth_access_token(&self) -> Option<TokenRecord> {
        self.inner
            .tokens
            .load(true, self.inner.context.clock.now())
    }

    pub fn is_signed_in_user(&self) -> bool {
        self.get_access_token().is_some()
    }

    /// Ask the identity provider whether the stored token is still valid. A rejected token is
    /// discarded.
    pub async fn validate_token(&self) -> Result<bool, TrustError> {
        let token = self.get_access_token().ok_or(TrustError::NoToken)?;
        let valid = self.inner.service.validate_token(&token.value).await?;
        if !valid {
            tracing::debug!("Token was rejected by the identity provider. Discarding it.");
            self.inner.tokens.remove(false);
        }
        Ok(valid)
    }

    pub fn record_activity(&self, activity: UserActivity) {
        self.inner.context.scheduler.record_activity(activity);
    }
}

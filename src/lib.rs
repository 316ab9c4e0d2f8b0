//! Client-side trust and session engine for redirect-based sign-in flows.
//!
//! A [`TrustOrchestrator`] acquires, validates, persists, refreshes and revokes access tokens of
//! one client against a remote identity provider. It protects every redirect with a single-use
//! CSRF nonce and, for the authorization code flow, a PKCE verifier.
//!
//! Everything the engine needs from its surroundings is passed in through a [`TrustContext`]:
//! storage, crypto, a clock, an HTTP transport, navigation and the current page location.
//! Timers are spawned with `tokio::task::spawn_local`. Drive the engine from within a
//! `tokio::task::LocalSet`.
//!
//! ```no_run
//! use std::rc::Rc;
//! use trust_session::{
//!     ReqwestTransport, TrustCallbacks, TrustContext, TrustOptions, TrustOrchestrator,
//!     url::Url,
//! };
//! # use trust_session::{
//! #     FragmentParams, ModalSignInEvent, Navigator, PageLocation, WindowMessenger,
//! # };
//! # struct Page;
//! # impl PageLocation for Page {
//! #     fn fragment_params(&self) -> FragmentParams { FragmentParams::new() }
//! #     fn replace_fragment(&self, _fragment: &str) {}
//! #     fn current_url(&self) -> Url { Url::parse("https://app.example").unwrap() }
//! # }
//! # struct Nav;
//! # #[async_trait::async_trait(?Send)]
//! # impl Navigator for Nav {
//! #     fn replace(&self, _url: &Url) {}
//! #     async fn replace_and_wait(&self, _url: &Url, _wait: std::time::Duration) {}
//! #     fn set_href(&self, _url: &Url) {}
//! # }
//! # struct Messenger;
//! # impl WindowMessenger for Messenger {
//! #     fn notify_opener(&self, _event: &ModalSignInEvent) -> bool { false }
//! #     fn broadcast(&self, _event: &ModalSignInEvent) {}
//! # }
//!
//! # async fn run() -> Result<(), trust_session::TrustError> {
//! let context = TrustContext::new(
//!     Rc::new(ReqwestTransport::default()),
//!     Rc::new(Nav),
//!     Rc::new(Page),
//!     Rc::new(Messenger),
//! );
//!
//! let mut options = TrustOptions::new(
//!     Url::parse("https://idp.example.com").unwrap(),
//!     "my-client",
//!     Url::parse("https://app.example.com").unwrap(),
//! );
//! options.scope = vec!["openid".to_owned(), "profile".to_owned()];
//!
//! let callbacks = TrustCallbacks::default()
//!     .on_access_token(|token| tracing::info!(expires_at = ?token.expires_at, "Signed in."))
//!     .on_access_token_has_expired(|| tracing::info!("Signed out."));
//!
//! let session = TrustOrchestrator::new(options, callbacks, context)?;
//! session.initialize().await;
//! # Ok(())
//! # }
//! ```

mod callbacks;
mod clock;
mod code_verifier;
mod config;
mod context;
mod crypto;
mod csrf_token;
mod error;
mod host;
mod internal;
mod login;
mod logout;
mod orchestrator;
mod request;
mod response;
mod storage;
mod time_ext;
mod token;
mod token_claims;

/// Version of this library, sent along with every sign-in redirect.
pub const LIB_VERSION: &str = env!("CARGO_PKG_VERSION");

// Library exports.
pub use callbacks::*;
pub use clock::*;
pub use config::{AdvancedOptions, Analytics, ResponseType, TrustOptions};
pub use context::*;
pub use crypto::{Crypto, CryptoError, SystemCrypto};
pub use error::*;
pub use host::*;
pub use internal::instance_registry::{InstanceAnnouncement, InstanceRegistry, SubscriptionId};
pub use internal::refresh_scheduler::{AutoRefreshScheduler, RefreshCallback, RefreshParams};
pub use login::{Reauth, SignInParams};
pub use orchestrator::*;
pub use request::*;
pub use response::{
    ErrorResponse, FragmentParams, KnownOidcErrorCode, OidcErrorCode, Profile, RedirectState,
    parse_fragment,
};
pub use storage::{MemoryStorage, Storage, StorageError, StorageHandle};
pub use token::{REAUTH_SCOPE, Scope, TokenKey, TokenRecord, TokenValidationError};
pub use token_claims::AccessTokenClaims;
pub mod url {
    pub use url::Url;
}

#[cfg(feature = "internals")]
pub mod internals {
    pub use crate::code_verifier::{CodeChallenge, CodeChallengeMethod, CodeVerifier, PkcePair};
    pub use crate::csrf_token::CsrfToken;
    pub use crate::internal::csrf_guard::CsrfGuard;
    pub use crate::internal::pkce_manager::PkceManager;
    pub use crate::internal::response_deduper::{CachedResult, Flight, Lookup, ResponseDeduper};
    pub use crate::internal::token_acquisition::AcquisitionOutcome;
}

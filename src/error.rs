use std::time::Duration;

use snafu::Snafu;
use url::Url;

use crate::crypto::CryptoError;
use crate::response::FragmentParams;
use crate::storage::StorageError;

/// Every failure the engine can produce.
///
/// Recovery code never inspects the variant directly but dispatches over [`TrustError::kind`],
/// which keeps the order of the recovery chain explicit in one `match`.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TrustError {
    #[snafu(display("TrustError: Identity provider answered with an HTTP error: {response}"))]
    Http { response: HttpErrorResponse },

    #[snafu(display("TrustError: Identity provider requires additional user action: {ride}"))]
    Ride { ride: RideException },

    #[snafu(display("TrustError: Token expired: {reason}"))]
    TokenExpired { reason: String },

    #[snafu(display("TrustError: Redirect fragment was rejected: {fragment}"))]
    Fragment { fragment: FragmentException },

    /// Not an error. Signals that the current page is a sign-in popup that must hand its result
    /// to the window that opened it.
    #[snafu(display("TrustError: Modal sign-in completed"))]
    ModalSignIn { event: ModalSignInEvent },

    #[snafu(display("TrustError: Could not retrieve profile: {reason}"))]
    Profile { reason: String },

    #[snafu(display(
        "TrustError: No PKCE code verifier is known for nonce '{nonce}'. The authorization code cannot be exchanged"
    ))]
    MissingCodeVerifier { nonce: String },

    #[snafu(display("TrustError: Unexpected response with status {status}: {error:?}"))]
    UnexpectedResponse {
        status: u16,
        error: Option<String>,
        error_description: Option<String>,
    },

    #[snafu(display("TrustError: No token available"))]
    NoToken,

    #[snafu(display("TrustError: Storage failure"))]
    Storage { source: StorageError },

    #[snafu(display("TrustError: Could not serialize or deserialize data: {source}"))]
    Serde { source: serde_json::Error },

    #[snafu(display("TrustError: Crypto failure"))]
    Crypto { source: CryptoError },

    #[snafu(display("TrustError: Invalid configuration: {reason}"))]
    InvalidConfig { reason: String },
}

/// Discriminant of [`TrustError`], used for explicit routing of failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrustErrorKind {
    Http,
    Ride,
    TokenExpired,
    Fragment(FragmentErrorKind),
    ModalSignIn,
    Profile,
    MissingCodeVerifier,
    UnexpectedResponse,
    NoToken,
    Storage,
    Serde,
    Crypto,
    InvalidConfig,
}

impl TrustError {
    pub fn kind(&self) -> TrustErrorKind {
        match self {
            TrustError::Http { .. } => TrustErrorKind::Http,
            TrustError::Ride { .. } => TrustErrorKind::Ride,
            TrustError::TokenExpired { .. } => TrustErrorKind::TokenExpired,
            TrustError::Fragment { fragment } => TrustErrorKind::Fragment(fragment.kind),
            TrustError::ModalSignIn { .. } => TrustErrorKind::ModalSignIn,
            TrustError::Profile { .. } => TrustErrorKind::Profile,
            TrustError::MissingCodeVerifier { .. } => TrustErrorKind::MissingCodeVerifier,
            TrustError::UnexpectedResponse { .. } => TrustErrorKind::UnexpectedResponse,
            TrustError::NoToken => TrustErrorKind::NoToken,
            TrustError::Storage { .. } => TrustErrorKind::Storage,
            TrustError::Serde { .. } => TrustErrorKind::Serde,
            TrustError::Crypto { .. } => TrustErrorKind::Crypto,
            TrustError::InvalidConfig { .. } => TrustErrorKind::InvalidConfig,
        }
    }

    pub fn is_csrf(&self) -> bool {
        self.kind() == TrustErrorKind::Fragment(FragmentErrorKind::Csrf)
    }
}

impl From<HttpErrorResponse> for TrustError {
    fn from(response: HttpErrorResponse) -> Self {
        TrustError::Http { response }
    }
}

impl From<RideException> for TrustError {
    fn from(ride: RideException) -> Self {
        TrustError::Ride { ride }
    }
}

impl From<FragmentException> for TrustError {
    fn from(fragment: FragmentException) -> Self {
        TrustError::Fragment { fragment }
    }
}

/// Classification of HTTP failures. None of them is ever retried automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpErrorKind {
    /// No response was received at all.
    Network,
    Unauthorized,
    RateLimited,
    ServerError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpErrorResponse {
    pub kind: HttpErrorKind,

    /// `0` when no response was received.
    pub status: u16,

    /// Parsed from the `Retry-After` header of rate-limited and server error responses.
    pub retry_after: Option<Duration>,

    pub body: serde_json::Value,
}

impl std::fmt::Display for HttpErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} (status {})", self.kind, self.status)?;
        if let Some(retry_after) = self.retry_after {
            write!(f, ", retry after {}s", retry_after.as_secs())?;
        }
        Ok(())
    }
}

/// The identity provider demands an additional user action (consent, policy acceptance, ...),
/// which has to happen at `jump`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RideException {
    pub code: String,
    /// Resolved against the identity provider's base url when it was handed out relative.
    pub jump: Url,

    /// The session is idle with respect to a PBA policy. Following `jump` does not help here,
    /// a fresh sign-in does.
    pub is_pba_idle_session: bool,
}

impl std::fmt::Display for RideException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.code, self.jump)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentErrorKind {
    /// The identity provider reported an error in the fragment itself.
    Fragment,

    /// The fragment's nonce is unknown or was already used.
    Csrf,

    /// The fragment originates from an api we never accept tokens from.
    NotAllowed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentException {
    pub kind: FragmentErrorKind,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl FragmentException {
    pub(crate) fn new(kind: FragmentErrorKind) -> Self {
        Self {
            kind,
            error: None,
            error_description: None,
        }
    }
}

impl std::fmt::Display for FragmentException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(error) = &self.error {
            write!(f, " ({error}")?;
            if let Some(description) = &self.error_description {
                write!(f, ": {description}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// Produced inside a sign-in popup. Carries the raw redirect parameters, which the opener
/// processes through [`crate::TrustOrchestrator::complete_modal_sign_in`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModalSignInEvent {
    pub client_id: String,
    pub params: FragmentParams,
}

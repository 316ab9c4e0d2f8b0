use std::rc::Rc;

use crate::error::{RideException, TrustError};
use crate::token::TokenRecord;

/// Kind passed to [`TrustCallbacks::on_error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorType {
    Http,
}

/// Lifecycle hooks of the host application. All of them are optional.
#[derive(Clone, Default)]
pub struct TrustCallbacks {
    /// Dispatched once, after the first initialization settled.
    pub on_ready: Option<Rc<dyn Fn()>>,

    pub on_access_token: Option<Rc<dyn Fn(&TokenRecord)>>,

    /// Receives tokens carrying the reauth scope marker instead of `on_access_token`.
    pub on_reauth_access_token: Option<Rc<dyn Fn(&TokenRecord)>>,

    pub on_access_token_has_expired: Option<Rc<dyn Fn()>>,

    pub on_error: Option<Rc<dyn Fn(ErrorType, &TrustError)>>,

    /// Return `false` to prevent navigating to the ride's jump url.
    pub on_ride_redirect: Option<Rc<dyn Fn(&RideException) -> bool>>,
}

impl std::fmt::Debug for TrustCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustCallbacks")
            .field("on_ready", &self.on_ready.is_some())
            .field("on_access_token", &self.on_access_token.is_some())
            .field("on_reauth_access_token", &self.on_reauth_access_token.is_some())
            .field(
                "on_access_token_has_expired",
                &self.on_access_token_has_expired.is_some(),
            )
            .field("on_error", &self.on_error.is_some())
            .field("on_ride_redirect", &self.on_ride_redirect.is_some())
            .finish()
    }
}

impl TrustCallbacks {
    pub fn on_ready(mut self, f: impl Fn() + 'static) -> Self {
        self.on_ready = Some(Rc::new(f));
        self
    }

    pub fn on_access_token(mut self, f: impl Fn(&TokenRecord) + 'static) -> Self {
        self.on_access_token = Some(Rc::new(f));
        self
    }

    pub fn on_reauth_access_token(mut self, f: impl Fn(&TokenRecord) + 'static) -> Self {
        self.on_reauth_access_token = Some(Rc::new(f));
        self
    }

    pub fn on_access_token_has_expired(mut self, f: impl Fn() + 'static) -> Self {
        self.on_access_token_has_expired = Some(Rc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(ErrorType, &TrustError) + 'static) -> Self {
        self.on_error = Some(Rc::new(f));
        self
    }

    pub fn on_ride_redirect(mut self, f: impl Fn(&RideException) -> bool + 'static) -> Self {
        self.on_ride_redirect = Some(Rc::new(f));
        self
    }

    pub(crate) fn ready(&self) {
        if let Some(f) = &self.on_ready {
            f();
        }
    }

    /// Routes reauth tokens to `on_reauth_access_token`.
    pub(crate) fn access_token(&self, token: &TokenRecord) {
        let callback = match token.is_reauth() {
            true => &self.on_reauth_access_token,
            false => &self.on_access_token,
        };
        if let Some(f) = callback {
            f(token);
        }
    }

    pub(crate) fn access_token_has_expired(&self) {
        if let Some(f) = &self.on_access_token_has_expired {
            f();
        }
    }

    pub(crate) fn error(&self, kind: ErrorType, err: &TrustError) {
        tracing::debug!(?kind, %err, "Reporting error to host.");
        if let Some(f) = &self.on_error {
            f(kind, err);
        }
    }

    /// `None` when the host did not register a handler.
    pub(crate) fn ride_redirect(&self, ride: &RideException) -> Option<bool> {
        self.on_ride_redirect.as_ref().map(|f| f(ride))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use assertr::prelude::*;
    use time::macros::datetime;

    use super::*;
    use crate::token::{REAUTH_SCOPE, Scope};

    #[test]
    fn reauth_tokens_are_routed_separately() {
        let regular = Rc::new(Cell::new(0));
        let reauth = Rc::new(Cell::new(0));
        let callbacks = TrustCallbacks::default()
            .on_access_token({
                let regular = regular.clone();
                move |_| regular.set(regular.get() + 1)
            })
            .on_reauth_access_token({
                let reauth = reauth.clone();
                move |_| reauth.set(reauth.get() + 1)
            });

        let token = TokenRecord::new(
            "v".to_owned(),
            datetime!(2024-06-01 10:00:00 UTC),
            "client",
            Scope::parse("openid"),
            false,
        );
        callbacks.access_token(&token);
        callbacks.access_token(&TokenRecord {
            scope: token.scope.clone().with(REAUTH_SCOPE),
            ..token
        });

        assert_that(regular.get()).is_equal_to(1);
        assert_that(reauth.get()).is_equal_to(1);
    }

    #[test]
    fn missing_ride_handler_is_reported_as_none() {
        let ride = RideException {
            code: "ride_X".to_owned(),
            jump: url::Url::parse("https://idp.example/jump").unwrap(),
            is_pba_idle_session: false,
        };
        assert_that(TrustCallbacks::default().ride_redirect(&ride)).is_equal_to(None);
        assert_that(
            TrustCallbacks::default()
                .on_ride_redirect(|_| false)
                .ride_redirect(&ride),
        )
        .is_equal_to(Some(false));
    }
}

//! Capabilities of the page hosting the engine.

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::error::ModalSignInEvent;
use crate::response::FragmentParams;

/// Page navigation. Navigations cannot be cancelled.
#[async_trait(?Send)]
pub trait Navigator {
    /// Replace the current location.
    fn replace(&self, url: &Url);

    /// Replace the current location and give the navigation `wait` to take effect.
    async fn replace_and_wait(&self, url: &Url, wait: Duration);

    /// Form-submission style navigation.
    fn set_href(&self, url: &Url);
}

pub trait PageLocation {
    /// Parameters of the current URL's fragment, merged with its query parameters.
    fn fragment_params(&self) -> FragmentParams;

    /// Replace the current fragment without navigating.
    fn replace_fragment(&self, fragment: &str);

    fn current_url(&self) -> Url;
}

/// Best-effort messaging between a sign-in popup and the window that opened it.
pub trait WindowMessenger {
    /// Returns `false` when there is no opener to notify.
    fn notify_opener(&self, event: &ModalSignInEvent) -> bool;

    /// Fallback channel reaching every window of the same origin.
    fn broadcast(&self, event: &ModalSignInEvent);
}

/// Signals of user interaction which keep a session "active".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserActivity {
    PointerMove,
    KeyPress,
}

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use time::macros::datetime;
use trust_session::url::Url;
use trust_session::{
    ErrorType, FragmentParams, HttpRequest, HttpResponse, HttpTransport, ManualClock,
    MemoryStorage, ModalSignInEvent, Navigator, PageLocation, RideException, TokenRecord,
    TrustCallbacks, TrustContext, TrustErrorKind, TrustOptions, TrustOrchestrator,
    WindowMessenger, parse_fragment,
};

pub mod tracing {
    pub fn init_subscriber() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(::tracing::Level::TRACE)
            .with_test_writer()
            .try_init();
    }
}

pub const NOW: OffsetDateTime = datetime!(2024-06-01 10:00:00 UTC);
pub const CLIENT_ID: &str = "client";

/// Answers requests from a queue. An empty queue behaves like an unreachable server.
#[derive(Default)]
pub struct ScriptedTransport {
    answers: RefCell<VecDeque<Result<HttpResponse, HttpResponse>>>,
    sent: RefCell<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn push(&self, answer: Result<HttpResponse, HttpResponse>) {
        self.answers.borrow_mut().push_back(answer);
    }

    pub fn sent(&self) -> Vec<HttpRequest> {
        self.sent.borrow().clone()
    }
}

#[async_trait(?Send)]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpResponse> {
        self.sent.borrow_mut().push(request);
        self.answers
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(HttpResponse::no_response()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Replace(Url),
    ReplaceAndWait(Url, Duration),
    SetHref(Url),
}

#[derive(Default)]
pub struct RecordingNavigator {
    navigations: RefCell<Vec<Navigation>>,
}

impl RecordingNavigator {
    pub fn navigations(&self) -> Vec<Navigation> {
        self.navigations.borrow().clone()
    }
}

#[async_trait(?Send)]
impl Navigator for RecordingNavigator {
    fn replace(&self, url: &Url) {
        self.navigations
            .borrow_mut()
            .push(Navigation::Replace(url.clone()));
    }

    async fn replace_and_wait(&self, url: &Url, wait: Duration) {
        self.navigations
            .borrow_mut()
            .push(Navigation::ReplaceAndWait(url.clone(), wait));
        tokio::time::sleep(wait).await;
    }

    fn set_href(&self, url: &Url) {
        self.navigations
            .borrow_mut()
            .push(Navigation::SetHref(url.clone()));
    }
}

pub struct FakePage {
    url: RefCell<Url>,
    params: RefCell<FragmentParams>,
    replaced_fragments: RefCell<Vec<String>>,
}

impl Default for FakePage {
    fn default() -> Self {
        Self {
            url: RefCell::new(Url::parse("https://app.example/page#section").unwrap()),
            params: RefCell::new(FragmentParams::new()),
            replaced_fragments: RefCell::new(Vec::new()),
        }
    }
}

impl FakePage {
    pub fn set_params(&self, params: FragmentParams) {
        *self.params.borrow_mut() = params;
    }

    pub fn replaced_fragments(&self) -> Vec<String> {
        self.replaced_fragments.borrow().clone()
    }
}

impl PageLocation for FakePage {
    fn fragment_params(&self) -> FragmentParams {
        self.params.borrow().clone()
    }

    fn replace_fragment(&self, fragment: &str) {
        self.replaced_fragments.borrow_mut().push(fragment.to_owned());
        self.params.borrow_mut().clear();
    }

    fn current_url(&self) -> Url {
        self.url.borrow().clone()
    }
}

pub struct RecordingMessenger {
    pub has_opener: Cell<bool>,
    pub notified: RefCell<Vec<ModalSignInEvent>>,
    pub broadcasted: RefCell<Vec<ModalSignInEvent>>,
}

impl Default for RecordingMessenger {
    fn default() -> Self {
        Self {
            has_opener: Cell::new(true),
            notified: RefCell::new(Vec::new()),
            broadcasted: RefCell::new(Vec::new()),
        }
    }
}

impl WindowMessenger for RecordingMessenger {
    fn notify_opener(&self, event: &ModalSignInEvent) -> bool {
        if !self.has_opener.get() {
            return false;
        }
        self.notified.borrow_mut().push(event.clone());
        true
    }

    fn broadcast(&self, event: &ModalSignInEvent) {
        self.broadcasted.borrow_mut().push(event.clone());
    }
}

/// Records every host callback invocation.
#[derive(Default, Clone)]
pub struct Recorder {
    pub ready: Rc<Cell<usize>>,
    pub access_tokens: Rc<RefCell<Vec<TokenRecord>>>,
    pub reauth_access_tokens: Rc<RefCell<Vec<TokenRecord>>>,
    pub expired: Rc<Cell<usize>>,
    pub errors: Rc<RefCell<Vec<(ErrorType, TrustErrorKind)>>>,
    pub rides: Rc<RefCell<Vec<RideException>>>,
}

impl Recorder {
    pub fn callbacks(&self) -> TrustCallbacks {
        let ready = self.ready.clone();
        let access_tokens = self.access_tokens.clone();
        let reauth_access_tokens = self.reauth_access_tokens.clone();
        let expired = self.expired.clone();
        let errors = self.errors.clone();
        TrustCallbacks::default()
            .on_ready(move || ready.set(ready.get() + 1))
            .on_access_token(move |token| access_tokens.borrow_mut().push(token.clone()))
            .on_reauth_access_token(move |token| {
                reauth_access_tokens.borrow_mut().push(token.clone())
            })
            .on_access_token_has_expired(move || expired.set(expired.get() + 1))
            .on_error(move |kind, err| errors.borrow_mut().push((kind, err.kind())))
    }

    /// Like [`Recorder::callbacks`], with a ride handler answering `answer`.
    pub fn callbacks_with_ride_answer(&self, answer: bool) -> TrustCallbacks {
        let rides = self.rides.clone();
        self.callbacks().on_ride_redirect(move |ride| {
            rides.borrow_mut().push(ride.clone());
            answer
        })
    }
}

/// One simulated browser tab.
pub struct Harness {
    pub storage: MemoryStorage,
    pub clock: Rc<ManualClock>,
    pub transport: Rc<ScriptedTransport>,
    pub navigator: Rc<RecordingNavigator>,
    pub page: Rc<FakePage>,
    pub messenger: Rc<RecordingMessenger>,
    pub recorder: Recorder,
    pub context: TrustContext,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(true)
    }

    /// Without durable storage.
    pub fn volatile() -> Self {
        Self::build(false)
    }

    fn build(durable: bool) -> Self {
        let storage = MemoryStorage::new();
        let clock = Rc::new(ManualClock::new(NOW));
        let transport = Rc::new(ScriptedTransport::default());
        let navigator = Rc::new(RecordingNavigator::default());
        let page = Rc::new(FakePage::default());
        let messenger = Rc::new(RecordingMessenger::default());

        let durable_storage: Option<Rc<dyn trust_session::Storage>> = match durable {
            true => Some(Rc::new(storage.clone())),
            false => None,
        };
        let context = TrustContext::new(
            transport.clone(),
            navigator.clone(),
            page.clone(),
            messenger.clone(),
        )
        .with_storage(durable_storage)
        .with_clock(clock.clone());

        Self {
            storage,
            clock,
            transport,
            navigator,
            page,
            messenger,
            recorder: Recorder::default(),
            context,
        }
    }

    pub fn options(&self) -> TrustOptions {
        let mut options = TrustOptions::new(
            Url::parse("https://idp.example").unwrap(),
            CLIENT_ID,
            Url::parse("https://app.example/page").unwrap(),
        );
        options.scope = vec!["openid".to_owned(), "profile".to_owned()];
        options
    }

    pub fn orchestrator(&self, options: TrustOptions) -> TrustOrchestrator {
        self.orchestrator_with(options, self.recorder.callbacks())
    }

    pub fn orchestrator_with(
        &self,
        options: TrustOptions,
        callbacks: TrustCallbacks,
    ) -> TrustOrchestrator {
        TrustOrchestrator::new(options, callbacks, self.context.clone()).unwrap()
    }

    /// The parameters the identity provider hands back after the sign-in started with
    /// `authorize_url`.
    pub fn idp_redirect(&self, authorize_url: &Url, extra: &[(&str, &str)]) -> FragmentParams {
        let query = parse_fragment(authorize_url.query().unwrap_or_default());
        let mut params = FragmentParams::new();
        params.insert("from_idp".to_owned(), "true".to_owned());
        params.insert("client_id".to_owned(), CLIENT_ID.to_owned());
        params.insert("api".to_owned(), "authorize".to_owned());
        params.insert("state".to_owned(), query.get("state").cloned().unwrap_or_default());
        for (key, value) in extra {
            params.insert((*key).to_owned(), (*value).to_owned());
        }
        params
    }
}

pub fn token_response(
    access_token: &str,
    expires_in_seconds: i64,
) -> Result<HttpResponse, HttpResponse> {
    Ok(HttpResponse::new(
        200,
        serde_json::json!({
            "access_token": access_token,
            "expires_in": expires_in_seconds,
            "token_type": "bearer",
        }),
    ))
}

pub fn jwt(claims: serde_json::Value) -> String {
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(b"test-secret"),
    )
    .unwrap()
}

pub fn query_param(url: &Url, key: &str) -> Option<String> {
    parse_fragment(url.query().unwrap_or_default()).get(key).cloned()
}

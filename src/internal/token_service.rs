use std::rc::Rc;
use std::time::Duration;

use http::StatusCode;
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::Endpoints;
use crate::error::{HttpErrorKind, HttpErrorResponse, RideException, TrustError};
use crate::internal::refresh_scheduler::RefreshParams;
use crate::internal::response_deduper::{CachedResult, Lookup, ResponseDeduper};
use crate::request::{HttpRequest, HttpResponse, HttpTransport};
use crate::response::{ErrorResponse, Profile, SuccessTokenResponse, ValidateTokenResponse};
use crate::token::Scope;

/// Ride code of the PBA idle-session policy. Following its jump url does not help, a fresh
/// sign-in does.
pub(crate) const PBA_IDLE_SESSION_RIDE: &str = "ride_pba_idle_session";

const PROXY_ERROR: &str = "proxy_error";
const PROXIED_ENDPOINT_UNAVAILABLE: &str = "proxied_endpoint_unavailable";

/// Calls to the identity provider's token api.
#[derive(Clone)]
pub(crate) struct TokenService {
    http: Rc<dyn HttpTransport>,
    deduper: ResponseDeduper,
    endpoints: Endpoints,
    client_id: String,
    timeout: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("endpoints", &self.endpoints)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub(crate) fn new(
        http: Rc<dyn HttpTransport>,
        deduper: ResponseDeduper,
        endpoints: Endpoints,
        client_id: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            deduper,
            endpoints,
            client_id: client_id.into(),
            timeout,
        }
    }

    pub(crate) fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Ask the identity provider for a fresh token of the current session.
    ///
    /// Goes through the proxy first, if one is configured. Only the proxy explicitly reporting
    /// the proxied endpoint as unavailable makes us retry against the identity provider itself.
    pub(crate) async fn refresh(
        &self,
        scope: &Scope,
        params: RefreshParams,
    ) -> Result<SuccessTokenResponse, TrustError> {
        let build = |url: Url| {
            let mut request = HttpRequest::post(url)
                .param("client_id", self.client_id.as_str())
                .param("scope", scope.to_csv())
                .timeout(self.timeout);
            if let Some(inactive) = params.user_inactive_since {
                request = request.param("user_inactive_since", inactive.to_string());
            }
            request
        };

        if let Some(proxied) = &self.endpoints.proxied_check_token {
            match self.send_deduplicated(build(proxied.clone())).await {
                Err(response) if is_proxy_unavailable(&response) => {
                    tracing::debug!(
                        "Proxied endpoint unavailable. Retrying against the identity provider."
                    );
                }
                result => return self.settle(result),
            }
        }

        self.settle(
            self.send_deduplicated(build(self.endpoints.check_token.clone()))
                .await,
        )
    }

    /// Never deduplicated. An authorization code can only be exchanged once.
    pub(crate) async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &Url,
    ) -> Result<SuccessTokenResponse, TrustError> {
        let request = HttpRequest::post(self.endpoints.token.clone())
            .param("grant_type", "authorization_code")
            .param("client_id", self.client_id.as_str())
            .param("code", code)
            .param("code_verifier", code_verifier)
            .param("redirect_uri", redirect_uri.as_str())
            .timeout(self.timeout);
        self.settle(self.http.send(request).await)
    }

    /// Remote validity check of `token`.
    pub(crate) async fn validate_token(&self, token: &str) -> Result<bool, TrustError> {
        let request = HttpRequest::post(self.endpoints.validate_token.clone())
            .param("client_id", self.client_id.as_str())
            .param("token", token)
            .timeout(self.timeout);
        self.settle::<ValidateTokenResponse>(self.send_deduplicated(request).await)
            .map(|response| response.valid)
    }

    pub(crate) async fn fetch_profile(&self, token: &str) -> Result<Profile, TrustError> {
        let request = HttpRequest::get(self.endpoints.profile.clone())
            .param("client_id", self.client_id.as_str())
            .header(http::header::AUTHORIZATION.as_str(), format!("Bearer {token}"))
            .timeout(self.timeout);
        self.settle(self.send_deduplicated(request).await)
    }

    async fn send_deduplicated(&self, request: HttpRequest) -> CachedResult {
        let url = request.url.to_string();
        let mut params_key = request.encoded_params();
        // Requests differing in credentials must not share a response.
        if let Some(authorization) = request.headers.get(http::header::AUTHORIZATION.as_str()) {
            params_key.push('\n');
            params_key.push_str(authorization);
        }

        match self.deduper.begin(&url, &params_key) {
            Lookup::Hit(cached) => cached,
            Lookup::Wait(pending) => pending.await.unwrap_or_else(|_| {
                tracing::debug!(
                    url = url.as_str(),
                    "Identical call was abandoned before it settled."
                );
                Err(HttpResponse::no_response())
            }),
            Lookup::Lead(flight) => {
                let result = self.http.send(request).await;
                flight.settle(result.clone());
                result
            }
        }
    }

    fn settle<T: DeserializeOwned>(&self, result: CachedResult) -> Result<T, TrustError> {
        match result {
            Ok(response) => serde_json::from_value(response.body)
                .map_err(|source| TrustError::Serde { source }),
            Err(response) => Err(classify_failure(response, &self.endpoints.identity_provider)),
        }
    }
}

fn is_proxy_unavailable(response: &HttpResponse) -> bool {
    let error = ErrorResponse::from_body(&response.body);
    error.error.as_deref() == Some(PROXY_ERROR)
        && error.error_description.as_deref() == Some(PROXIED_ENDPOINT_UNAVAILABLE)
}

/// Turn a failed response into a typed error.
///
/// `409` carrying a `ride_*` error and a non-empty jump url becomes a [`RideException`]. A
/// relative jump url is resolved against `identity_provider`. Missing responses, `401`, `429`
/// and `5xx` become an [`HttpErrorResponse`]. Anything else is unexpected.
pub(crate) fn classify_failure(response: HttpResponse, identity_provider: &Url) -> TrustError {
    let error = ErrorResponse::from_body(&response.body);

    if response.status == StatusCode::CONFLICT.as_u16() && error.is_ride() {
        let jump = error
            .jump
            .as_deref()
            .map(str::trim)
            .filter(|it| !it.is_empty())
            .map(|jump| identity_provider.join(jump));
        match (error.error, jump) {
            (Some(code), Some(Ok(jump))) => {
                let is_pba_idle_session = code == PBA_IDLE_SESSION_RIDE;
                return TrustError::Ride {
                    ride: RideException {
                        code,
                        jump,
                        is_pba_idle_session,
                    },
                };
            }
            (code, jump) => {
                tracing::warn!(?code, ?jump, "Ride response without a usable jump url.");
                return TrustError::UnexpectedResponse {
                    status: response.status,
                    error: code,
                    error_description: error.error_description,
                };
            }
        }
    }

    let kind = match StatusCode::from_u16(response.status) {
        Err(_) if response.status == 0 => Some(HttpErrorKind::Network),
        Ok(StatusCode::UNAUTHORIZED) => Some(HttpErrorKind::Unauthorized),
        Ok(StatusCode::TOO_MANY_REQUESTS) => Some(HttpErrorKind::RateLimited),
        Ok(status) if status.is_server_error() => Some(HttpErrorKind::ServerError),
        _ => None,
    };

    match kind {
        Some(kind) => {
            let retry_after = match kind {
                HttpErrorKind::RateLimited | HttpErrorKind::ServerError => response
                    .header(http::header::RETRY_AFTER.as_str())
                    .and_then(|it| it.trim().parse::<u64>().ok())
                    .map(Duration::from_secs),
                HttpErrorKind::Network | HttpErrorKind::Unauthorized => None,
            };
            TrustError::Http {
                response: HttpErrorResponse {
                    kind,
                    status: response.status,
                    retry_after,
                    body: response.body,
                },
            }
        }
        None => TrustError::UnexpectedResponse {
            status: response.status,
            error: error.error,
            error_description: error.error_description,
        },
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use assertr::prelude::*;
    use async_trait::async_trait;
    use tokio::task::LocalSet;

    use super::*;
    use crate::error::TrustErrorKind;

    #[derive(Default)]
    struct Scripted {
        answers: RefCell<VecDeque<Result<HttpResponse, HttpResponse>>>,
        sent: RefCell<Vec<HttpRequest>>,
        latency: Duration,
    }

    #[async_trait(?Send)]
    impl HttpTransport for Scripted {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpResponse> {
            self.sent.borrow_mut().push(request);
            let answer = self
                .answers
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(HttpResponse::no_response()));
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            answer
        }
    }

    fn endpoints(proxy: bool) -> Endpoints {
        let mut options = crate::config::TrustOptions::new(
            Url::parse("https://idp.example").unwrap(),
            "client",
            Url::parse("https://app.example").unwrap(),
        );
        if proxy {
            options.proxy_base_url = Some(Url::parse("https://app.example/proxy").unwrap());
        }
        options.endpoints().unwrap()
    }

    fn cut(transport: Rc<Scripted>, proxy: bool) -> TokenService {
        TokenService::new(
            transport,
            ResponseDeduper::new(Duration::from_secs(1)),
            endpoints(proxy),
            "client",
            Duration::from_secs(30),
        )
    }

    fn classify(response: HttpResponse) -> TrustError {
        classify_failure(response, &Url::parse("https://idp.example/").unwrap())
    }

    fn token_body() -> serde_json::Value {
        serde_json::json!({ "access_token": "t", "expires_in": 3600, "token_type": "bearer" })
    }

    #[test]
    fn conflict_with_ride_error_is_a_ride() {
        let err = classify(HttpResponse::new(
            409,
            serde_json::json!({ "error": "ride_X", "jump": "https://idp.example/jump" }),
        ));
        let TrustError::Ride { ride } = err else {
            panic!("expected a ride, got {err:?}");
        };
        assert_that(ride.code.as_str()).is_equal_to("ride_X");
        assert_that(ride.jump.as_str()).is_equal_to("https://idp.example/jump");
        assert_that(ride.is_pba_idle_session).is_false();
    }

    #[test]
    fn pba_idle_session_ride_is_flagged() {
        let err = classify(HttpResponse::new(
            409,
            serde_json::json!({
                "error": "ride_pba_idle_session",
                "jump": "https://idp.example/jump",
            }),
        ));
        let TrustError::Ride { ride } = err else {
            panic!("expected a ride, got {err:?}");
        };
        assert_that(ride.is_pba_idle_session).is_true();
    }

    #[test]
    fn http_failures_are_classified() {
        let cases = [
            (0, HttpErrorKind::Network),
            (401, HttpErrorKind::Unauthorized),
            (429, HttpErrorKind::RateLimited),
            (503, HttpErrorKind::ServerError),
        ];
        for (status, expected) in cases {
            let err = classify(HttpResponse::new(status, serde_json::Value::Null));
            let TrustError::Http { response } = err else {
                panic!("expected an http error for {status}, got {err:?}");
            };
            assert_that(response.kind).is_equal_to(expected);
        }
    }

    #[test]
    fn retry_after_is_read_for_rate_limits() {
        let err = classify(
            HttpResponse::new(429, serde_json::Value::Null).with_header("Retry-After", "17"),
        );
        let TrustError::Http { response } = err else {
            panic!("expected an http error, got {err:?}");
        };
        assert_that(response.retry_after).is_equal_to(Some(Duration::from_secs(17)));
    }

    #[test]
    fn other_statuses_are_unexpected() {
        let err = classify(HttpResponse::new(
            400,
            serde_json::json!({ "error": "invalid_request" }),
        ));
        assert_that(err.kind()).is_equal_to(TrustErrorKind::UnexpectedResponse);
    }

    #[test]
    fn relative_jump_is_resolved_against_identity_provider() {
        let err = classify(HttpResponse::new(
            409,
            serde_json::json!({ "error": "ride_X", "jump": "U" }),
        ));
        let TrustError::Ride { ride } = err else {
            panic!("expected a ride, got {err:?}");
        };
        assert_that(ride.code.as_str()).is_equal_to("ride_X");
        assert_that(ride.jump.as_str()).is_equal_to("https://idp.example/U");
    }

    #[test]
    fn ride_without_jump_is_unexpected() {
        let bodies = [
            serde_json::json!({ "error": "ride_X" }),
            serde_json::json!({ "error": "ride_X", "jump": "  " }),
        ];
        for body in bodies {
            let err = classify(HttpResponse::new(409, body));
            assert_that(err.kind()).is_equal_to(TrustErrorKind::UnexpectedResponse);
        }
    }

    #[tokio::test]
    async fn refresh_passes_ride_with_relative_jump_through() {
        LocalSet::new()
            .run_until(async {
                let transport = Rc::new(Scripted::default());
                transport.answers.borrow_mut().push_back(Err(HttpResponse::new(
                    409,
                    serde_json::json!({ "error": "ride_X", "jump": "U" }),
                )));
                let service = cut(transport.clone(), false);

                let err = service
                    .refresh(&Scope::parse("openid"), RefreshParams::default())
                    .await
                    .unwrap_err();
                let TrustError::Ride { ride } = err else {
                    panic!("expected a ride, got {err:?}");
                };
                assert_that(ride.jump.as_str()).is_equal_to("https://idp.example/U");
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_identical_calls_share_one_request() {
        LocalSet::new()
            .run_until(async {
                let transport = Rc::new(Scripted {
                    latency: Duration::from_millis(50),
                    ..Scripted::default()
                });
                transport
                    .answers
                    .borrow_mut()
                    .push_back(Ok(HttpResponse::new(200, serde_json::json!({ "valid": true }))));
                let service = cut(transport.clone(), false);

                let (first, second) =
                    tokio::join!(service.validate_token("t"), service.validate_token("t"));
                assert_that(first.unwrap()).is_true();
                assert_that(second.unwrap()).is_true();
                assert_that(transport.sent.borrow().len()).is_equal_to(1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_calls_with_other_credentials_are_not_shared() {
        LocalSet::new()
            .run_until(async {
                let transport = Rc::new(Scripted {
                    latency: Duration::from_millis(50),
                    ..Scripted::default()
                });
                transport.answers.borrow_mut().extend([
                    Ok(HttpResponse::new(200, serde_json::json!({ "user_id": "a" }))),
                    Ok(HttpResponse::new(200, serde_json::json!({ "user_id": "b" }))),
                ]);
                let service = cut(transport.clone(), false);

                let (first, second) =
                    tokio::join!(service.fetch_profile("a"), service.fetch_profile("b"));
                assert_that(first.unwrap().user_id.as_str()).is_equal_to("a");
                assert_that(second.unwrap().user_id.as_str()).is_equal_to("b");
                assert_that(transport.sent.borrow().len()).is_equal_to(2);
            })
            .await;
    }

    #[tokio::test]
    async fn proxy_unavailable_falls_back_to_identity_provider() {
        LocalSet::new()
            .run_until(async {
                let transport = Rc::new(Scripted::default());
                transport.answers.borrow_mut().extend([
                    Err(HttpResponse::new(
                        502,
                        serde_json::json!({
                            "error": "proxy_error",
                            "error_description": "proxied_endpoint_unavailable",
                        }),
                    )),
                    Ok(HttpResponse::new(200, token_body())),
                ]);
                let service = cut(transport.clone(), true);

                let response = service
                    .refresh(&Scope::parse("openid"), RefreshParams::default())
                    .await
                    .unwrap();
                assert_that(response.access_token.as_str()).is_equal_to("t");

                let sent = transport.sent.borrow();
                assert_that(sent.len()).is_equal_to(2);
                assert_that(sent[0].url.as_str())
                    .is_equal_to("https://app.example/proxy/oauth/check_token");
                assert_that(sent[1].url.as_str())
                    .is_equal_to("https://idp.example/oauth/check_token");
            })
            .await;
    }

    #[tokio::test]
    async fn other_proxy_errors_do_not_fall_back() {
        LocalSet::new()
            .run_until(async {
                let transport = Rc::new(Scripted::default());
                transport.answers.borrow_mut().push_back(Err(HttpResponse::new(
                    502,
                    serde_json::json!({ "error": "proxy_error", "error_description": "timeout" }),
                )));
                let service = cut(transport.clone(), true);

                let err = service
                    .refresh(&Scope::parse("openid"), RefreshParams::default())
                    .await
                    .unwrap_err();
                assert_that(err.kind()).is_equal_to(TrustErrorKind::Http);
                assert_that(transport.sent.borrow().len()).is_equal_to(1);
            })
            .await;
    }

    #[tokio::test]
    async fn identical_refreshes_are_deduplicated() {
        LocalSet::new()
            .run_until(async {
                let transport = Rc::new(Scripted::default());
                transport
                    .answers
                    .borrow_mut()
                    .push_back(Ok(HttpResponse::new(200, token_body())));
                let service = cut(transport.clone(), false);

                let scope = Scope::parse("openid");
                service.refresh(&scope, RefreshParams::default()).await.unwrap();
                service.refresh(&scope, RefreshParams::default()).await.unwrap();
                assert_that(transport.sent.borrow().len()).is_equal_to(1);
            })
            .await;
    }
}

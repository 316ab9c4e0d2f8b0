use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use http::Method;
use url::Url;

/// An outgoing identity provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,

    /// Sent url-encoded as the body of POST requests and as query parameters of GET requests.
    pub params: BTreeMap<String, String>,

    pub headers: BTreeMap<String, String>,

    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            params: BTreeMap::new(),
            headers: BTreeMap::new(),
            timeout: None,
        }
    }

    pub fn post(url: Url) -> Self {
        Self {
            method: Method::POST,
            ..Self::get(url)
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Url-encoded parameters, in sorted order. Two requests with equal params produce equal
    /// strings.
    pub fn encoded_params(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.params.iter())
            .finish()
    }
}

/// Response of an identity provider call, successful or not.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// `0` when no response was received.
    pub status: u16,

    /// Lowercase header names.
    pub headers: BTreeMap<String, String>,

    /// JSON body. `Null` for empty or non-JSON bodies.
    pub body: serde_json::Value,
}

impl HttpResponse {
    pub fn new(status: u16, body: serde_json::Value) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body,
        }
    }

    pub fn no_response() -> Self {
        Self::new(0, serde_json::Value::Null)
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Wire-level transport to the identity provider.
///
/// Non-2xx answers and transport failures are both returned as `Err`, carrying the same shape
/// as a successful response.
#[async_trait(?Send)]
pub trait HttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpResponse>;
}

/// Default transport, backed by `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait(?Send)]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpResponse> {
        let HttpRequest {
            method,
            url,
            params,
            headers,
            timeout,
        } = request;

        let mut builder = if method == Method::GET {
            self.client.get(url).query(&params)
        } else {
            self.client.request(method, url).form(&params)
        };
        for (name, value) in &headers {
            builder = builder.header(name, value);
        }
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|err| {
            tracing::debug!(?err, "Could not send request.");
            HttpResponse::no_response()
        })?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_owned(), value.to_owned()))
            })
            .collect();
        let text = response.text().await.map_err(|err| {
            tracing::debug!(?err, "Could not read response body.");
            HttpResponse::no_response()
        })?;
        let body = serde_json::from_str(&text).unwrap_or(serde_json::Value::Null);

        let response = HttpResponse {
            status: status.as_u16(),
            headers,
            body,
        };
        match status.is_success() {
            true => Ok(response),
            false => Err(response),
        }
    }
}

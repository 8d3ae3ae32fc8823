//! Blocking HTTP client for consign carrier adapters.
//!
//! Each adapter owns one explicitly constructed [`HttpClient`]. Every request
//! carries a timeout; it is clamped to whatever is left before the attempt's
//! [`CancelToken`] deadline, and the token is checked before anything goes on
//! the wire.
//!
//! # Example
//!
//! ```no_run
//! use consign_http::{Auth, HttpClient, HttpOptions, Request};
//! use consign_types::CancelToken;
//!
//! let client = HttpClient::new(HttpOptions::default()).unwrap();
//! let response = client
//!     .send(
//!         Request::get("https://carrier.example/labels/42")
//!             .auth(Auth::Bearer("token".into()))
//!             .accept("application/json"),
//!         &CancelToken::new(),
//!     )
//!     .unwrap();
//! assert!(response.is_success());
//! ```

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use consign_types::{CancelToken, RawResponse};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Default timeout for carrier requests
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default user agent for carrier requests
pub const USER_AGENT: &str = concat!("consign/", env!("CARGO_PKG_VERSION"));

/// Content type used for XML bodies
pub const XML_CONTENT_TYPE: &str = "text/xml; charset=utf-8";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpOptions {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            user_agent: USER_AGENT.to_string(),
        }
    }
}

impl HttpOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Clone, PartialEq, Eq, Default)]
pub enum Auth {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
    Bearer(String),
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::None => f.write_str("None"),
            Auth::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Auth::Bearer(_) => f.debug_tuple("Bearer").field(&"<redacted>").finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    Json(Value),
    Xml(String),
}

/// One outbound request.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: String,
    auth: Auth,
    accept: Option<String>,
    body: Body,
}

impl Request {
    fn new(method: Method, url: impl Into<String>, body: Body) -> Self {
        Self {
            method,
            url: url.into(),
            auth: Auth::None,
            accept: None,
            body,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url, Body::Empty)
    }

    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, url, Body::Json(body))
    }

    pub fn post_xml(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(Method::Post, url, Body::Xml(body.into()))
    }

    pub fn auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    pub fn accept(mut self, content_type: impl Into<String>) -> Self {
        self.accept = Some(content_type.into());
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn body(&self) -> &Body {
        &self.body
    }
}

/// Fully read response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 401 or 403.
    pub fn is_auth_rejected(&self) -> bool {
        matches!(self.status, 401 | 403)
    }

    /// Media type without parameters, lowercased.
    pub fn media_type(&self) -> Option<String> {
        self.content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .map(|mt| mt.trim().to_ascii_lowercase())
            .filter(|mt| !mt.is_empty())
    }

    pub fn is_pdf(&self) -> bool {
        self.media_type().as_deref() == Some("application/pdf")
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Audit copy of this response.
    pub fn snapshot(&self) -> RawResponse {
        RawResponse {
            status: self.status,
            content_type: self.content_type.clone(),
            body: self.text().into_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpError {
    #[error("request cancelled before completion")]
    Cancelled,
    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },
    #[error("failed to connect to {url}: {message}")]
    Connect { url: String, message: String },
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("failed to build HTTP client: {0}")]
    Build(String),
}

/// Blocking client bound to one timeout and user agent.
#[derive(Debug, Clone)]
pub struct HttpClient {
    options: HttpOptions,
    client: reqwest::blocking::Client,
}

impl HttpClient {
    pub fn new(options: HttpOptions) -> Result<Self, HttpError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(options.timeout)
            .user_agent(options.user_agent.clone())
            .build()
            .map_err(|e| HttpError::Build(e.to_string()))?;

        Ok(Self { options, client })
    }

    pub fn options(&self) -> &HttpOptions {
        &self.options
    }

    /// Send `request` and read the whole body.
    pub fn send(&self, request: Request, cancel: &CancelToken) -> Result<HttpResponse, HttpError> {
        if cancel.is_cancelled() {
            return Err(HttpError::Cancelled);
        }

        let timeout = cancel.clamp(self.options.timeout);
        if timeout.is_zero() {
            return Err(HttpError::Cancelled);
        }

        let Request {
            method,
            url,
            auth,
            accept,
            body,
        } = request;

        debug!(method = method.as_str(), url = %url, ?timeout, "sending carrier request");

        let mut builder = match method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        }
        .timeout(timeout);

        builder = match auth {
            Auth::None => builder,
            Auth::Basic { username, password } => builder.basic_auth(username, Some(password)),
            Auth::Bearer(token) => builder.bearer_auth(token),
        };

        if let Some(accept) = accept {
            builder = builder.header(ACCEPT, accept);
        }

        builder = match body {
            Body::Empty => builder,
            Body::Json(value) => builder.json(&value),
            Body::Xml(xml) => builder.header(CONTENT_TYPE, XML_CONTENT_TYPE).body(xml),
        };

        let classify = |e: reqwest::Error| classify_error(e, &url, timeout, cancel);

        let response = builder.send().map_err(classify)?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().map_err(classify)?.to_vec();

        debug!(
            method = method.as_str(),
            url = %url,
            status,
            content_type = content_type.as_deref().unwrap_or(""),
            bytes = body.len(),
            "received carrier response"
        );

        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}

fn classify_error(
    error: reqwest::Error,
    url: &str,
    timeout: Duration,
    cancel: &CancelToken,
) -> HttpError {
    if cancel.is_cancelled() {
        return HttpError::Cancelled;
    }
    if error.is_timeout() {
        return HttpError::Timeout {
            url: url.to_string(),
            timeout,
        };
    }
    if error.is_connect() {
        return HttpError::Connect {
            url: url.to_string(),
            message: error.to_string(),
        };
    }
    HttpError::Transport {
        url: url.to_string(),
        message: error.to_string(),
    }
}

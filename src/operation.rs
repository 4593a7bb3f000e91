//! Operation Module
//!
//! One request/response lifecycle: the request description, a small status
//! state machine, and the response (wire or cached) once it has run.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;

use crate::error::TransportError;
use crate::http::{CacheHeaders, CacheKey};

// == HTTP Method ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Head,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
        }
    }

    /// Only plain retrievals are served from or written to the caches.
    pub fn is_cacheable(&self) -> bool {
        matches!(self, HttpMethod::Get)
    }

    /// Methods whose params travel as a form body.
    pub fn has_form_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// == Operation Status ==
/// `Pending -> Executing -> {Completed, Error, Timeout, Cancelled}`, plus
/// `Pending -> Cancelled` for an enqueued operation cancelled before a worker
/// picks it up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Executing,
    Completed,
    Error,
    Timeout,
    Cancelled,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationStatus::Pending | OperationStatus::Executing)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// An operation may be cancelled before it starts executing.
    pub fn can_transition_to(&self, next: OperationStatus) -> bool {
        match self {
            OperationStatus::Pending => {
                matches!(next, OperationStatus::Executing | OperationStatus::Cancelled)
            }
            OperationStatus::Executing => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Executing => "executing",
            OperationStatus::Completed => "completed",
            OperationStatus::Error => "error",
            OperationStatus::Timeout => "timeout",
            OperationStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

// == Credentials ==
/// Basic-auth credentials. They are part of the cache key, so two users never
/// share a cached response.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// == Request Body ==
/// What the transport sends after the headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Empty,
    /// URL-encoded by the transport
    Form(Vec<(String, String)>),
    Raw(Bytes),
}

// == Listener ==
/// Receives the outcome of an enqueued operation.
///
/// Called on the task awaiting the operation's handle, never on a worker.
pub trait OperationListener: Send {
    fn on_completion(&mut self, operation: &Operation);

    fn on_error(&mut self, operation: &Operation);
}

/// Any `FnMut(&Operation)` is a listener receiving both outcomes.
impl<F> OperationListener for F
where
    F: FnMut(&Operation) + Send,
{
    fn on_completion(&mut self, operation: &Operation) {
        self(operation)
    }

    fn on_error(&mut self, operation: &Operation) {
        self(operation)
    }
}

// == Operation ==
pub struct Operation {
    pub(crate) url: String,
    pub(crate) method: HttpMethod,
    pub(crate) headers: HeaderMap,
    pub(crate) params: BTreeMap<String, String>,
    pub(crate) raw_body: Option<Bytes>,
    pub(crate) credentials: Option<Credentials>,

    pub(crate) status: OperationStatus,
    pub(crate) http_status: Option<u16>,
    pub(crate) response_headers: HeaderMap,
    pub(crate) response_data: Option<Bytes>,
    pub(crate) cached_data: Option<Bytes>,
    pub(crate) cache_headers: CacheHeaders,
    pub(crate) fresh: bool,
    pub(crate) error: Option<TransportError>,

    listener: Option<Box<dyn OperationListener>>,
}

impl Operation {
    // == Constructor ==
    pub fn new<I, K, V>(url: impl Into<String>, params: I, method: HttpMethod) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            url: url.into(),
            method,
            headers: HeaderMap::new(),
            params: params
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            raw_body: None,
            credentials: None,
            status: OperationStatus::Pending,
            http_status: None,
            response_headers: HeaderMap::new(),
            response_data: None,
            cached_data: None,
            cache_headers: CacheHeaders::default(),
            fresh: false,
            error: None,
            listener: None,
        }
    }

    // == Request ==
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Sets a request header, replacing any previous value.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), TransportError> {
        let name = HeaderName::try_from(name)
            .map_err(|e| TransportError::InvalidRequest(format!("header name {name:?}: {e}")))?;
        let value = HeaderValue::try_from(value)
            .map_err(|e| TransportError::InvalidRequest(format!("header {name}: {e}")))?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Adds headers that are not already set on the operation.
    pub fn add_default_headers(&mut self, defaults: &HeaderMap) {
        for (name, value) in defaults {
            if !self.headers.contains_key(name) {
                self.headers.insert(name.clone(), value.clone());
            }
        }
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn add_params<I, K, V>(&mut self, params: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
    }

    /// Sends `body` verbatim instead of the form-encoded params.
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.raw_body = Some(body.into());
    }

    /// Body to send: a raw body if one was set, else the params as a form
    /// for `POST`/`PUT`, else nothing.
    pub fn request_body(&self) -> RequestBody {
        if let Some(body) = &self.raw_body {
            return RequestBody::Raw(body.clone());
        }
        if self.method.has_form_body() {
            return RequestBody::Form(
                self.params
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            );
        }
        RequestBody::Empty
    }

    pub fn set_basic_auth(&mut self, username: impl Into<String>, password: impl Into<String>) {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    // == Caching ==
    pub fn is_cacheable(&self) -> bool {
        self.method.is_cacheable()
    }

    pub fn cache_key(&self) -> CacheKey {
        let credentials = self
            .credentials
            .as_ref()
            .map(|c| (c.username.as_str(), c.password.as_str()));
        CacheKey::derive(self.method.as_str(), &self.url, credentials)
    }

    /// Turns stored validators into conditional request headers.
    pub fn update_from_cache_headers(&mut self, cache_headers: &CacheHeaders) {
        cache_headers.apply_conditional(&mut self.headers);
    }

    /// Cache headers derived from the last wire response.
    pub fn cache_headers(&self) -> &CacheHeaders {
        &self.cache_headers
    }

    /// True when the result is a cached body, whether served fresh or
    /// confirmed by a not-modified revalidation.
    pub fn is_cached_response(&self) -> bool {
        self.cached_data.is_some()
    }

    /// True when the cached entry was fresh and no request was sent.
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    // == Response ==
    pub fn status(&self) -> OperationStatus {
        self.status
    }

    pub fn http_status_code(&self) -> Option<u16> {
        self.http_status
    }

    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    /// Cached data takes precedence over the wire body.
    pub fn response_data(&self) -> Option<Bytes> {
        self.cached_data
            .as_ref()
            .or(self.response_data.as_ref())
            .cloned()
    }

    pub fn response_string(&self) -> Option<String> {
        self.response_data()
            .map(|data| String::from_utf8_lossy(&data).into_owned())
    }

    /// Transport failure behind an `Error` or `Timeout` status.
    pub fn error(&self) -> Option<&TransportError> {
        self.error.as_ref()
    }

    // == Listener ==
    pub fn set_listener(&mut self, listener: impl OperationListener + 'static) {
        self.listener = Some(Box::new(listener));
    }

    pub fn has_listener(&self) -> bool {
        self.listener.is_some()
    }

    pub(crate) fn take_listener(&mut self) -> Option<Box<dyn OperationListener>> {
        self.listener.take()
    }

    pub(crate) fn set_status(&mut self, next: OperationStatus) {
        debug_assert!(
            self.status.can_transition_to(next),
            "invalid operation transition {} -> {}",
            self.status,
            next
        );
        self.status = next;
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("status", &self.status)
            .field("http_status", &self.http_status)
            .field("cached", &self.cached_data.is_some())
            .field("fresh", &self.fresh)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

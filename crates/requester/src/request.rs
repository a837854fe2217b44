//! Request description handed to a `Transport`
//!
//! An `ApiRequest` is a transport-neutral value: method, headers, optional
//! body and the proxy route to use. The retry loop re-sends the same value
//! on every attempt, so it must be cheap to borrow and never consumed.

use std::fmt;

use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};

use crate::error::{Error, Result};

/// Request payload.
///
/// Raw strings are sent as-is with `text/plain`; everything else is JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(serde_json::Value),
    Text(String),
}

impl RequestBody {
    pub fn content_type(&self) -> &'static str {
        match self {
            RequestBody::Json(_) => "application/json",
            RequestBody::Text(_) => "text/plain",
        }
    }

    /// Encoded bytes for the wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            RequestBody::Json(value) => serde_json::to_vec(value)
                .map_err(|e| Error::InvalidRequest(format!("unserializable JSON body: {e}"))),
            RequestBody::Text(text) => Ok(text.clone().into_bytes()),
        }
    }
}

impl From<serde_json::Value> for RequestBody {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(text) => RequestBody::Text(text),
            other => RequestBody::Json(other),
        }
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        RequestBody::Text(text)
    }
}

/// HTTP-level proxy route: a client with the proxy baked in.
///
/// `label` is `ip:port` only; credentials never leave the client.
#[derive(Clone)]
pub struct ProxyHandle {
    label: String,
    client: reqwest::Client,
}

impl ProxyHandle {
    pub fn new(label: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            label: label.into(),
            client,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

impl fmt::Debug for ProxyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyHandle")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// A single outbound call, reusable across retry attempts.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    headers: HeaderMap,
    body: Option<RequestBody>,
    proxy: Option<ProxyHandle>,
}

impl ApiRequest {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            headers: HeaderMap::new(),
            body: None,
            proxy: None,
        }
    }

    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    pub fn post() -> Self {
        Self::new(Method::POST)
    }

    /// Insert a header, replacing any previous value for the same name.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Merge a header map; entries in `headers` win over existing ones.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        for (name, value) in headers.iter() {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }

    /// Attach a body and set the matching content-type.
    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        let body = body.into();
        self.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static(body.content_type()),
        );
        self.body = Some(body);
        self
    }

    /// Route the request through a proxy.
    pub fn via(mut self, proxy: ProxyHandle) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn header_map(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn payload(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    pub fn proxy(&self) -> Option<&ProxyHandle> {
        self.proxy.as_ref()
    }
}

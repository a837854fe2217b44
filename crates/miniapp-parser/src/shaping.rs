//! Browser-like request shaping
//!
//! Mini-app backends expect requests that look like they came from the
//! embedded web view. Every request built here starts from the same baseline
//! (Chrome on Windows, same-origin CORS fetch), then gets the auth token,
//! then the strategy's custom headers, which win on conflicts.

use reqwest::Method;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, AUTHORIZATION, HeaderMap, HeaderName, HeaderValue, REFERER,
};
use requester::{ApiRequest, ProxyHandle, RequestBody};

use crate::error::{Error, Result};

const BASELINE: &[(&str, &str)] = &[
    ("priority", "u=1, i"),
    (
        "sec-ch-ua",
        "\"Not)A;Brand\";v=\"8\", \"Chromium\";v=\"138\", \"Google Chrome\";v=\"138\"",
    ),
    ("sec-ch-ua-mobile", "?0"),
    ("sec-ch-ua-platform", "\"Windows\""),
    ("sec-fetch-dest", "empty"),
    ("sec-fetch-mode", "cors"),
    ("sec-fetch-site", "same-origin"),
    ("sec-fetch-storage-access", "active"),
];

#[derive(Debug, Clone)]
pub struct RequestShaper {
    referer: HeaderValue,
}

impl RequestShaper {
    pub fn new(referer: &str) -> Result<Self> {
        let referer = HeaderValue::from_str(referer)
            .map_err(|e| Error::InvalidHeader(format!("referer {referer:?}: {e}")))?;
        Ok(Self { referer })
    }

    /// Fixed header set, before token and custom headers.
    pub fn baseline(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("ru-RU,ru;q=0.9,en-US;q=0.8,en;q=0.7"),
        );
        for &(name, value) in BASELINE {
            headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
        }
        headers.insert(REFERER, self.referer.clone());
        headers
    }

    /// Build a request routed through `proxy`.
    ///
    /// `auth_token` is sent raw in `authorization` (no scheme).
    pub fn build(
        &self,
        method: Method,
        proxy: &ProxyHandle,
        auth_token: Option<&str>,
        custom: HeaderMap,
        body: Option<RequestBody>,
    ) -> Result<ApiRequest> {
        let mut request = ApiRequest::new(method).headers(self.baseline());
        if let Some(token) = auth_token {
            let mut value = HeaderValue::from_str(token)
                .map_err(|e| Error::InvalidHeader(format!("authorization: {e}")))?;
            value.set_sensitive(true);
            request = request.header(AUTHORIZATION, value);
        }
        request = request.headers(custom);
        if let Some(body) = body {
            request = request.body(body);
        }
        Ok(request.via(proxy.clone()))
    }
}

//! Config-driven strategy
//!
//! Covers the common mini-app shape: init-data goes to the auth endpoint as
//! JSON (or raw text), the token comes back somewhere in a JSON document, and
//! the worker is a single shaped call whose JSON reply is the output.

use std::str::FromStr;

use anyhow::Context;
use miniapp_parser::{Error, MiniAppStrategy, Result, WorkerContext, WorkerFuture};
use requester::RequestBody;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{Map, Value};
use userbot_pool::UserProfile;

use crate::config::StrategyConfig;

pub struct JsonStrategy {
    auth_field: Option<String>,
    include_user: bool,
    token_pointer: String,
    init_data_header: Option<HeaderName>,
    worker_url: String,
    worker_method: Method,
    headers: HeaderMap,
}

impl JsonStrategy {
    pub fn from_config(config: &StrategyConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_str(name)
                .with_context(|| format!("invalid header name {name:?}"))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("invalid value for header {name}"))?;
            headers.insert(name, value);
        }

        let init_data_header = config
            .init_data_header
            .as_deref()
            .map(HeaderName::from_str)
            .transpose()
            .context("invalid init_data_header")?;
        let worker_method = Method::from_str(&config.worker_method)
            .with_context(|| format!("invalid worker_method {:?}", config.worker_method))?;

        Ok(Self {
            auth_field: config.auth_field.clone(),
            include_user: config.include_user,
            token_pointer: config.token_pointer.clone(),
            init_data_header,
            worker_url: config.worker_url.clone(),
            worker_method,
            headers,
        })
    }
}

impl MiniAppStrategy for JsonStrategy {
    /// Optional body for the worker call.
    type Args = Option<Value>;
    type Output = Value;

    fn auth_payload(&self, init_data: &str, user: &UserProfile) -> Result<RequestBody> {
        let Some(field) = &self.auth_field else {
            return Ok(RequestBody::Text(init_data.to_string()));
        };
        let mut payload = Map::new();
        payload.insert(field.clone(), Value::String(init_data.to_string()));
        if self.include_user {
            let user = serde_json::to_value(user).map_err(|e| Error::AuthPayload(e.to_string()))?;
            payload.insert("user".into(), user);
        }
        Ok(RequestBody::Json(Value::Object(payload)))
    }

    fn extract_token(&self, response: &Value) -> Result<String> {
        response
            .pointer(&self.token_pointer)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                Error::TokenExtraction(format!(
                    "nothing at {} in auth response",
                    self.token_pointer
                ))
            })
    }

    fn custom_headers(&self, init_data: &str) -> HeaderMap {
        let mut headers = self.headers.clone();
        if let Some(name) = &self.init_data_header {
            if let Ok(value) = HeaderValue::from_str(init_data) {
                headers.insert(name.clone(), value);
            }
        }
        headers
    }

    fn worker<'a>(&'a self, ctx: WorkerContext, body: Option<Value>) -> WorkerFuture<'a, Value> {
        Box::pin(async move {
            let request = ctx.request(self.worker_method.clone(), body.map(RequestBody::from))?;
            ctx.send(&self.worker_url, &request).await
        })
    }
}

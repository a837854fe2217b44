//! Strategy seam
//!
//! A parser is generic over one `MiniAppStrategy`, which supplies the parts
//! that differ between mini-apps: how to turn launch data into an auth
//! request, where the token sits in the response, which extra headers the
//! backend wants, and the worker body itself.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use common::Secret;
use reqwest::Method;
use reqwest::header::HeaderMap;
use requester::{ApiRequest, ProxyHandle, RequestBody, Requester};
use serde::de::DeserializeOwned;
use userbot_pool::UserProfile;

use crate::error::Result;
use crate::shaping::RequestShaper;

pub type WorkerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

pub trait MiniAppStrategy: Send + Sync + 'static {
    /// Per-cycle arguments. Loop mode passes `Default::default()`.
    type Args: Default + Send + 'static;
    type Output: Send + 'static;

    /// Body POSTed to the auth endpoint.
    fn auth_payload(&self, init_data: &str, user: &UserProfile) -> Result<RequestBody>;

    /// Pull the auth token out of the auth endpoint's response.
    fn extract_token(&self, response: &serde_json::Value) -> Result<String>;

    /// Extra headers for every request of a cycle, including the auth call.
    fn custom_headers(&self, _init_data: &str) -> HeaderMap {
        HeaderMap::new()
    }

    /// One unit of work, run with a snapshot of the identity's credentials.
    ///
    /// Each cycle runs in its own task. A panic here is reported as a failed
    /// cycle and the loop carries on, unless the binary is built with
    /// `panic = "abort"`.
    fn worker<'a>(
        &'a self,
        ctx: WorkerContext,
        args: Self::Args,
    ) -> WorkerFuture<'a, Self::Output>;
}

/// Credentials and request helpers handed to a worker.
///
/// The token and init-data are a snapshot taken when the cycle started;
/// they do not change if the cached token expires mid-cycle.
#[derive(Clone)]
pub struct WorkerContext {
    username: String,
    auth_token: Secret<String>,
    init_data: String,
    proxy: ProxyHandle,
    custom_headers: HeaderMap,
    shaper: RequestShaper,
    requester: Arc<Requester>,
}

impl WorkerContext {
    pub(crate) fn new(
        username: String,
        auth_token: Secret<String>,
        init_data: String,
        proxy: ProxyHandle,
        custom_headers: HeaderMap,
        shaper: RequestShaper,
        requester: Arc<Requester>,
    ) -> Self {
        Self {
            username,
            auth_token,
            init_data,
            proxy,
            custom_headers,
            shaper,
            requester,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn auth_token(&self) -> &str {
        self.auth_token.expose_str()
    }

    pub fn init_data(&self) -> &str {
        &self.init_data
    }

    pub fn proxy(&self) -> &ProxyHandle {
        &self.proxy
    }

    /// Shaped request carrying the token, routed through this identity's proxy.
    pub fn request(&self, method: Method, body: Option<RequestBody>) -> Result<ApiRequest> {
        self.shaper.build(
            method,
            &self.proxy,
            Some(self.auth_token()),
            self.custom_headers.clone(),
            body,
        )
    }

    pub async fn send(&self, url: &str, request: &ApiRequest) -> Result<serde_json::Value> {
        Ok(self.requester.send(url, request).await?)
    }

    pub async fn send_as<T: DeserializeOwned>(&self, url: &str, request: &ApiRequest) -> Result<T> {
        Ok(self.requester.send_as(url, request).await?)
    }
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("username", &self.username)
            .field("auth_token", &self.auth_token)
            .field("proxy", &self.proxy)
            .finish_non_exhaustive()
    }
}

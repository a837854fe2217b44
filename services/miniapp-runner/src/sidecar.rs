//! Session gateway client
//!
//! The platform protocol runs in a separate sidecar process that owns the
//! actual client library. This module speaks its small JSON API:
//!
//! | call | route |
//! |------|-------|
//! | connect | `POST /sessions/{username}/connect` |
//! | is authorized | `GET /sessions/{username}/authorized` |
//! | resolve entity | `POST /sessions/{username}/resolve` |
//! | web view | `POST /sessions/{username}/web-view` |
//!
//! Session credentials and the proxy descriptor travel with `connect`; later
//! calls only name the session.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;
use userbot_pool::{
    PeerRef, SessionClient, SessionConfig, SessionConnector, SessionError, SessionFuture,
    WebViewRequest, WebViewResult,
};

#[derive(Debug, Deserialize)]
struct AuthorizedResponse {
    authorized: bool,
}

pub struct SidecarConnector {
    base_url: String,
    client: reqwest::Client,
}

impl SidecarConnector {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

impl SessionConnector for SidecarConnector {
    fn open(&self, config: SessionConfig) -> Result<Arc<dyn SessionClient>, SessionError> {
        if config.username.contains('/') {
            return Err(SessionError(format!(
                "username {:?} cannot be used in a URL path",
                config.username
            )));
        }
        Ok(Arc::new(SidecarSessionClient {
            session_url: format!("{}/sessions/{}", self.base_url, config.username),
            client: self.client.clone(),
            config,
        }))
    }
}

pub struct SidecarSessionClient {
    session_url: String,
    client: reqwest::Client,
    config: SessionConfig,
}

impl SidecarSessionClient {
    async fn call<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, SessionError> {
        let response = request
            .send()
            .await
            .map_err(|e| SessionError(format!("sidecar unreachable: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError(format!("sidecar returned {status}: {body}")));
        }
        response
            .json()
            .await
            .map_err(|e| SessionError(format!("invalid sidecar response: {e}")))
    }

    fn connect_body(&self) -> serde_json::Value {
        let config = &self.config;
        json!({
            "string_session": config.string_session.expose_str(),
            "api_id": config.api_id,
            "api_hash": config.api_hash.expose_str(),
            "connection_retries": config.connection_retries,
            "proxy": {
                "ip": config.proxy.ip,
                "port": config.proxy.port,
                "username": config.proxy.username,
                "password": config.proxy.password.expose_str(),
                "socks_type": config.proxy.socks_version,
                "timeout_ms": config.proxy.timeout.as_millis() as u64,
            },
        })
    }
}

impl SessionClient for SidecarSessionClient {
    fn connect(&self) -> SessionFuture<'_, ()> {
        Box::pin(async move {
            let request = self
                .client
                .post(format!("{}/connect", self.session_url))
                .json(&self.connect_body());
            let _: serde_json::Value = self.call(request).await?;
            debug!(username = %self.config.username, "sidecar session connected");
            Ok(())
        })
    }

    fn is_authorized(&self) -> SessionFuture<'_, bool> {
        Box::pin(async move {
            let request = self.client.get(format!("{}/authorized", self.session_url));
            let response: AuthorizedResponse = self.call(request).await?;
            Ok(response.authorized)
        })
    }

    fn resolve_entity<'a>(&'a self, name: &'a str) -> SessionFuture<'a, PeerRef> {
        Box::pin(async move {
            let request = self
                .client
                .post(format!("{}/resolve", self.session_url))
                .json(&json!({ "username": name }));
            self.call(request).await
        })
    }

    fn request_web_view(&self, request: WebViewRequest) -> SessionFuture<'_, WebViewResult> {
        Box::pin(async move {
            let request = self
                .client
                .post(format!("{}/web-view", self.session_url))
                .json(&request);
            self.call(request).await
        })
    }
}

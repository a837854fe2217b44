//! Proxy access layer
//!
//! Turns a `ProxyCredential` into the two shapes the rest of the system
//! needs: an HTTP-level `ProxyHandle` for the request layer, and a
//! `SessionProxy` descriptor for the session client's own transport. Also
//! owns the startup reachability check.

use std::sync::Arc;
use std::time::Duration;

use common::Secret;
use requester::{ApiRequest, ProxyHandle, Requester};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::identity::ProxyCredential;

/// "What is my IP" endpoint used to verify a proxy routes where it claims.
pub const PROXY_CHECK_URL: &str = "https://api.ipify.org?format=json";

/// Connect timeout handed to the session transport.
pub const SESSION_PROXY_TIMEOUT: Duration = Duration::from_secs(2);

/// SOCKS protocol version spoken by every configured proxy.
pub const SOCKS_VERSION: u8 = 5;

#[derive(Debug, Deserialize)]
struct IpResponse {
    ip: String,
}

/// Proxy settings in the shape the session client's transport expects.
#[derive(Debug, Clone)]
pub struct SessionProxy {
    pub ip: String,
    pub port: u16,
    pub username: String,
    pub password: Secret<String>,
    pub socks_version: u8,
    pub timeout: Duration,
}

pub struct ProxyService {
    requester: Arc<Requester>,
}

impl ProxyService {
    pub fn new(requester: Arc<Requester>) -> Self {
        Self { requester }
    }

    /// Build an HTTP client that tunnels through the credential's SOCKS5 proxy.
    ///
    /// Pure construction: no connection is attempted. DNS is resolved on the
    /// proxy side (`socks5h`).
    pub fn build_handle(credential: &ProxyCredential) -> Result<ProxyHandle> {
        let label = credential.label();
        credential
            .validate()
            .map_err(|e| Error::InvalidProxy(format!("{label}: {e}")))?;

        let mut proxy_url = Url::parse(&format!("socks5h://{label}"))
            .map_err(|e| Error::InvalidProxy(format!("{label}: {e}")))?;
        proxy_url
            .set_username(&credential.username)
            .map_err(|_| Error::InvalidProxy(format!("{label}: username rejected")))?;
        proxy_url
            .set_password(Some(credential.password.expose_str()))
            .map_err(|_| Error::InvalidProxy(format!("{label}: password rejected")))?;

        let proxy = reqwest::Proxy::all(proxy_url.as_str())
            .map_err(|e| Error::InvalidProxy(format!("{label}: {e}")))?;
        let client = reqwest::Client::builder()
            .proxy(proxy)
            .build()
            .map_err(|e| Error::InvalidProxy(format!("{label}: building client: {e}")))?;

        Ok(ProxyHandle::new(label, client))
    }

    /// Confirm that traffic through `handle` exits from `expected_ip`.
    pub async fn verify(&self, handle: &ProxyHandle, expected_ip: &str) -> Result<()> {
        let request = ApiRequest::get().via(handle.clone());
        let response: IpResponse = self
            .requester
            .send_as(PROXY_CHECK_URL, &request)
            .await
            .map_err(|e| Error::ProxyVerificationFailed {
                ip: expected_ip.to_string(),
                reason: e.to_string(),
            })?;

        if response.ip != expected_ip {
            return Err(Error::ProxyVerificationFailed {
                ip: expected_ip.to_string(),
                reason: format!("invalid response IP: {}", response.ip),
            });
        }

        debug!(proxy_ip = expected_ip, response_ip = %response.ip, "proxy verified");
        Ok(())
    }

    /// Adapt a credential for the session client's transport.
    pub fn session_proxy(credential: &ProxyCredential) -> SessionProxy {
        SessionProxy {
            ip: credential.ip.clone(),
            port: credential.port,
            username: credential.username.clone(),
            password: credential.password.clone(),
            socks_version: SOCKS_VERSION,
            timeout: SESSION_PROXY_TIMEOUT,
        }
    }
}

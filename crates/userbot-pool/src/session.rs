//! Session client seam
//!
//! The platform protocol (handshake, authorization, web-view invocation) is
//! not implemented here. The pool talks to it through `SessionClient`, and
//! creates clients through a `SessionConnector`, so the actual protocol stack
//! can live in a sidecar or another crate.
//!
//! Only the pool calls these traits; nothing else opens or closes a session.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use common::Secret;
use serde::{Deserialize, Serialize};

use crate::proxy::SessionProxy;

/// Failure reported by a session client. The pool adds the username.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct SessionError(pub String);

pub type SessionFuture<'a, T> =
    Pin<Box<dyn Future<Output = std::result::Result<T, SessionError>> + Send + 'a>>;

/// Resolved platform entity (user or bot) usable as a peer in later calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRef {
    pub id: i64,
    pub access_hash: i64,
    pub username: String,
}

/// Parameters for opening a mini-app web view.
#[derive(Debug, Clone, Serialize)]
pub struct WebViewRequest {
    pub peer: PeerRef,
    pub bot: PeerRef,
    pub platform: String,
    pub url: String,
    pub from_bot_menu: bool,
}

/// Web view result: the mini-app URL with launch data in its fragment.
#[derive(Debug, Clone, Deserialize)]
pub struct WebViewResult {
    pub url: String,
}

/// Everything needed to open one user-bot session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub username: String,
    pub string_session: Secret<String>,
    pub api_id: i32,
    pub api_hash: Secret<String>,
    pub proxy: SessionProxy,
    pub connection_retries: u32,
}

/// One long-lived, proxied platform session.
pub trait SessionClient: Send + Sync {
    fn connect(&self) -> SessionFuture<'_, ()>;

    fn is_authorized(&self) -> SessionFuture<'_, bool>;

    /// Resolve a username (without `@`) to a peer.
    fn resolve_entity<'a>(&'a self, name: &'a str) -> SessionFuture<'a, PeerRef>;

    fn request_web_view(&self, request: WebViewRequest) -> SessionFuture<'_, WebViewResult>;
}

/// Factory for session clients. Construction must not touch the network;
/// the pool calls `connect` itself.
pub trait SessionConnector: Send + Sync {
    fn open(
        &self,
        config: SessionConfig,
    ) -> std::result::Result<Arc<dyn SessionClient>, SessionError>;
}

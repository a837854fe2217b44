//! Identity pool
//!
//! Owns every user-bot session and its proxy route, and hands out rotation
//! slots round-robin. Initialization is all-or-nothing: one bad record, one
//! proxy that exits from the wrong IP or one unauthorized session aborts the
//! whole startup, and nothing becomes selectable.

use std::collections::HashSet;
use std::sync::Arc;

use requester::{ProxyHandle, Requester};
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, info, trace};

use crate::error::{Error, Result};
use crate::identity::UserBot;
use crate::launch::{LaunchParams, parse_launch_params};
use crate::proxy::ProxyService;
use crate::session::{SessionClient, SessionConfig, SessionConnector, WebViewRequest};
use crate::slot::{RotationQueue, RotationSlot};

/// Connection attempts the session client makes before giving up.
pub const CONNECTION_RETRIES: u32 = 5;

/// Platform reported when opening a mini-app web view.
pub const WEB_VIEW_PLATFORM: &str = "web";

struct Identity {
    username: String,
    session: Arc<dyn SessionClient>,
    proxy: ProxyHandle,
}

pub struct IdentityPool {
    user_bots: Vec<UserBot>,
    connector: Arc<dyn SessionConnector>,
    proxies: ProxyService,
    identities: RwLock<Vec<Identity>>,
    rotation: OnceCell<RotationQueue>,
    init_lock: Mutex<()>,
}

impl IdentityPool {
    pub fn new(
        user_bots: Vec<UserBot>,
        requester: Arc<Requester>,
        connector: Arc<dyn SessionConnector>,
    ) -> Self {
        Self {
            user_bots,
            connector,
            proxies: ProxyService::new(requester),
            identities: RwLock::new(Vec::new()),
            rotation: OnceCell::new(),
            init_lock: Mutex::new(()),
        }
    }

    /// Validate, verify proxies, connect and authorize every user-bot.
    ///
    /// Runs once. On any failure the pool stays empty and the error is
    /// returned; there is no partial pool.
    pub async fn initialize(&self) -> Result<()> {
        let _guard = self.init_lock.lock().await;
        if self.rotation.initialized() {
            return Err(Error::AlreadyInitialized);
        }

        self.validate_all()?;

        let mut handles = Vec::with_capacity(self.user_bots.len());
        for bot in &self.user_bots {
            let handle = ProxyService::build_handle(&bot.proxy)?;
            self.proxies.verify(&handle, &bot.proxy.ip).await?;
            handles.push(handle);
        }

        let mut identities = Vec::with_capacity(self.user_bots.len());
        for (bot, proxy) in self.user_bots.iter().zip(handles) {
            let session = self.open_session(bot).await?;
            info!(username = %bot.username, proxy = proxy.label(), "user-bot connected");
            identities.push(Identity {
                username: bot.username.clone(),
                session,
                proxy,
            });
        }

        let slots = identities
            .iter()
            .map(|identity| RotationSlot::new(identity.username.clone()))
            .collect();
        *self.identities.write().await = identities;
        self.rotation
            .set(RotationQueue::new(slots))
            .map_err(|_| Error::AlreadyInitialized)?;

        info!(count = self.user_bots.len(), "identity pool initialized");
        Ok(())
    }

    fn validate_all(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for bot in &self.user_bots {
            bot.validate().map_err(|source| Error::Validation {
                username: bot.username.clone(),
                source,
            })?;
            if !seen.insert(bot.username.as_str()) {
                return Err(Error::Validation {
                    username: bot.username.clone(),
                    source: common::Error::invalid("username", "duplicate user-bot"),
                });
            }
        }
        Ok(())
    }

    async fn open_session(&self, bot: &UserBot) -> Result<Arc<dyn SessionClient>> {
        let session_error = |e: crate::session::SessionError| Error::Session {
            username: bot.username.clone(),
            reason: e.to_string(),
        };

        let session = self
            .connector
            .open(SessionConfig {
                username: bot.username.clone(),
                string_session: bot.string_session.clone(),
                api_id: bot.api_id,
                api_hash: bot.api_hash.clone(),
                proxy: ProxyService::session_proxy(&bot.proxy),
                connection_retries: CONNECTION_RETRIES,
            })
            .map_err(session_error)?;
        session.connect().await.map_err(session_error)?;

        if !session.is_authorized().await.map_err(session_error)? {
            return Err(Error::SessionNotAuthorized(bot.username.clone()));
        }
        Ok(session)
    }

    /// Usernames of connected identities, in initialization order.
    pub async fn list_connected(&self) -> Vec<String> {
        let usernames: Vec<String> = self
            .identities
            .read()
            .await
            .iter()
            .map(|identity| identity.username.clone())
            .collect();
        trace!(?usernames, "connected user-bots");
        usernames
    }

    pub async fn proxy_for(&self, username: &str) -> Result<ProxyHandle> {
        self.identities
            .read()
            .await
            .iter()
            .find(|identity| identity.username == username)
            .map(|identity| identity.proxy.clone())
            .ok_or_else(|| Error::NotFound(username.to_string()))
    }

    /// Open the mini-app web view as `username` and parse its launch data.
    pub async fn fetch_launch_params(
        &self,
        username: &str,
        bot_username: &str,
        app_base_url: &str,
    ) -> Result<LaunchParams> {
        let session = self
            .identities
            .read()
            .await
            .iter()
            .find(|identity| identity.username == username)
            .map(|identity| identity.session.clone())
            .ok_or_else(|| Error::NotFound(username.to_string()))?;

        let session_error = |e: crate::session::SessionError| Error::Session {
            username: username.to_string(),
            reason: e.to_string(),
        };

        let bot = session
            .resolve_entity(bot_username.trim_start_matches('@'))
            .await
            .map_err(session_error)?;
        let web_view = session
            .request_web_view(WebViewRequest {
                peer: bot.clone(),
                bot,
                platform: WEB_VIEW_PLATFORM.to_string(),
                url: app_base_url.to_string(),
                from_bot_menu: true,
            })
            .await
            .map_err(session_error)?;

        let params = parse_launch_params(&web_view.url)?;
        debug!(username, user_id = params.user.id, "launch params fetched");
        Ok(params)
    }

    /// Next slot in round-robin order.
    pub async fn select(&self) -> Result<Arc<RotationSlot>> {
        let queue = self.rotation.get().ok_or(Error::NoAvailableIdentity)?;
        queue.next().await.ok_or(Error::NoAvailableIdentity)
    }

    pub fn rotation_len(&self) -> usize {
        self.rotation.get().map_or(0, RotationQueue::len)
    }

    /// Cancel every slot's expiry timer. Token deadlines still apply.
    pub async fn disarm_all(&self) {
        if let Some(queue) = self.rotation.get() {
            for slot in queue.slots() {
                slot.disarm().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeConnector, FakeTransport, launch_url, user_bot};

    fn pool(
        bots: Vec<UserBot>,
        transport: Arc<FakeTransport>,
        connector: Arc<FakeConnector>,
    ) -> IdentityPool {
        IdentityPool::new(bots, Arc::new(Requester::new(transport)), connector)
    }

    fn alice_pool(connector: Arc<FakeConnector>) -> IdentityPool {
        pool(vec![user_bot("alice", "203.0.113.1")], FakeTransport::new(), connector)
    }

    #[tokio::test]
    async fn initialize_connects_every_user_bot() {
        let connector = FakeConnector::new();
        let pool = pool(
            vec![user_bot("alice", "203.0.113.1"), user_bot("bob", "203.0.113.2")],
            FakeTransport::new(),
            connector.clone(),
        );

        pool.initialize().await.unwrap();

        assert_eq!(pool.list_connected().await, vec!["alice", "bob"]);
        assert_eq!(pool.rotation_len(), 2);
        assert_eq!(pool.proxy_for("bob").await.unwrap().label(), "203.0.113.2:1080");

        let opened = connector.opened();
        assert_eq!(opened.len(), 2);
        assert_eq!(opened[0].connection_retries, CONNECTION_RETRIES);
        assert_eq!(opened[0].proxy.socks_version, 5);
    }

    #[tokio::test]
    async fn select_rotates_round_robin() {
        let pool = pool(
            vec![
                user_bot("alice", "203.0.113.1"),
                user_bot("bob", "203.0.113.2"),
                user_bot("carol", "203.0.113.3"),
            ],
            FakeTransport::new(),
            FakeConnector::new(),
        );
        pool.initialize().await.unwrap();

        let mut picks = Vec::new();
        for _ in 0..6 {
            picks.push(pool.select().await.unwrap().username().to_string());
        }
        assert_eq!(picks, ["alice", "bob", "carol", "alice", "bob", "carol"]);
    }

    #[tokio::test]
    async fn proxy_mismatch_aborts_and_leaves_nothing_selectable() {
        let transport = FakeTransport::new();
        transport.override_exit_ip("203.0.113.2:1080", "198.51.100.7");
        let connector = FakeConnector::new();
        let pool = pool(
            vec![user_bot("alice", "203.0.113.1"), user_bot("bob", "203.0.113.2")],
            transport,
            connector.clone(),
        );

        let err = pool.initialize().await.unwrap_err();

        assert!(matches!(err, Error::ProxyVerificationFailed { .. }), "got: {err:?}");
        assert!(matches!(pool.select().await, Err(Error::NoAvailableIdentity)));
        assert!(pool.list_connected().await.is_empty());
        assert!(connector.opened().is_empty());
    }

    #[tokio::test]
    async fn unauthorized_session_aborts_initialization() {
        let connector = FakeConnector::new();
        connector.unauthorized("bob");
        let pool = pool(
            vec![user_bot("alice", "203.0.113.1"), user_bot("bob", "203.0.113.2")],
            FakeTransport::new(),
            connector,
        );

        let err = pool.initialize().await.unwrap_err();

        assert!(
            matches!(err, Error::SessionNotAuthorized(ref name) if name == "bob"),
            "got: {err:?}"
        );
        assert!(matches!(pool.select().await, Err(Error::NoAvailableIdentity)));
    }

    #[tokio::test]
    async fn connect_failure_is_a_session_error() {
        let connector = FakeConnector::new();
        connector.fail_connect("alice");
        let pool = alice_pool(connector);

        let err = pool.initialize().await.unwrap_err();
        assert!(
            matches!(err, Error::Session { ref username, .. } if username == "alice"),
            "got: {err:?}"
        );
    }

    #[tokio::test]
    async fn invalid_record_fails_before_any_network_call() {
        let transport = FakeTransport::new();
        let mut broken = user_bot("bob", "203.0.113.2");
        broken.api_id = 0;
        let pool = pool(
            vec![user_bot("alice", "203.0.113.1"), broken],
            transport.clone(),
            FakeConnector::new(),
        );

        let err = pool.initialize().await.unwrap_err();

        assert!(
            matches!(err, Error::Validation { ref username, .. } if username == "bob"),
            "got: {err:?}"
        );
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn duplicate_usernames_are_rejected() {
        let pool = pool(
            vec![user_bot("alice", "203.0.113.1"), user_bot("alice", "203.0.113.2")],
            FakeTransport::new(),
            FakeConnector::new(),
        );
        let err = pool.initialize().await.unwrap_err();
        assert!(err.to_string().contains("duplicate"), "got: {err}");
    }

    #[tokio::test]
    async fn initialize_runs_once() {
        let pool = alice_pool(FakeConnector::new());
        pool.initialize().await.unwrap();
        assert!(matches!(pool.initialize().await, Err(Error::AlreadyInitialized)));
    }

    #[tokio::test]
    async fn empty_pool_has_nothing_to_select() {
        let pool = pool(Vec::new(), FakeTransport::new(), FakeConnector::new());
        pool.initialize().await.unwrap();
        assert_eq!(pool.rotation_len(), 0);
        assert!(matches!(pool.select().await, Err(Error::NoAvailableIdentity)));
    }

    #[tokio::test]
    async fn unknown_username_is_not_found() {
        let pool = alice_pool(FakeConnector::new());
        pool.initialize().await.unwrap();

        assert!(matches!(pool.proxy_for("mallory").await, Err(Error::NotFound(_))));
        let err = pool
            .fetch_launch_params("mallory", "@shop_bot", "https://app.example.com/")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn fetch_launch_params_parses_web_view_url() {
        let connector = FakeConnector::new();
        connector.redirect_to("alice", &launch_url("AAE9", 4242, "alice"));
        let pool = alice_pool(connector.clone());
        pool.initialize().await.unwrap();

        let params = pool
            .fetch_launch_params("alice", "@shop_bot", "https://app.example.com/")
            .await
            .unwrap();

        assert_eq!(params.user.id, 4242);
        assert!(params.init_data.starts_with("query_id=AAE9&"));
        assert_eq!(connector.web_view_calls("alice"), 1);
    }

    #[tokio::test]
    async fn launch_url_without_init_data_is_reported() {
        let connector = FakeConnector::new();
        connector.redirect_to("alice", "https://app.example.com/#tgWebAppVersion=8.0");
        let pool = alice_pool(connector);
        pool.initialize().await.unwrap();

        let err = pool
            .fetch_launch_params("alice", "shop_bot", "https://app.example.com/")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoInitData), "got: {err:?}");
    }
}

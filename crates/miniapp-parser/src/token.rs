//! Auth token lifecycle
//!
//! A slot's token is acquired lazily the first time a cycle lands on an
//! `Absent` slot:
//!
//! 1. open the mini-app web view as that identity and parse launch data;
//! 2. let the strategy build the auth payload from init-data + profile;
//! 3. POST it through the identity's proxy (retried by `Requester`);
//! 4. let the strategy extract the token;
//! 5. store token + init-data in the slot and arm the expiry timer.
//!
//! Any failure leaves the slot `Absent`. There is no early invalidation: a
//! token rejected downstream stays cached until its timer fires.

use std::sync::Arc;

use common::Secret;
use reqwest::Method;
use requester::{ProxyHandle, Requester};
use tracing::{debug, info};
use userbot_pool::{IdentityPool, RotationSlot, SlotCredentials};

use crate::error::{Error, Result};
use crate::observer::CycleObserver;
use crate::options::{ParserOptions, TokenTtl};
use crate::shaping::RequestShaper;
use crate::strategy::MiniAppStrategy;

pub struct TokenManager<S> {
    pool: Arc<IdentityPool>,
    requester: Arc<Requester>,
    strategy: Arc<S>,
    shaper: RequestShaper,
    bot_username: String,
    app_base_url: String,
    auth_url: String,
    ttl: TokenTtl,
    observer: Arc<dyn CycleObserver>,
}

impl<S: MiniAppStrategy> TokenManager<S> {
    pub fn new(
        pool: Arc<IdentityPool>,
        requester: Arc<Requester>,
        strategy: Arc<S>,
        shaper: RequestShaper,
        options: &ParserOptions,
        observer: Arc<dyn CycleObserver>,
    ) -> Self {
        Self {
            pool,
            requester,
            strategy,
            shaper,
            bot_username: options.bot_username.clone(),
            app_base_url: options.app_base_url.clone(),
            auth_url: options.auth_url.clone(),
            ttl: options.token_ttl,
            observer,
        }
    }

    /// Snapshot of the slot's credentials, acquiring them first if needed.
    pub async fn ensure(
        &self,
        slot: &Arc<RotationSlot>,
        proxy: &ProxyHandle,
    ) -> Result<SlotCredentials> {
        slot.get_or_fill(self.ttl.as_duration(), || self.acquire(slot.username(), proxy))
            .await
    }

    async fn acquire(&self, username: &str, proxy: &ProxyHandle) -> Result<SlotCredentials> {
        debug!(username, "acquiring auth token");
        let params = self
            .pool
            .fetch_launch_params(username, &self.bot_username, &self.app_base_url)
            .await?;

        let payload = self.strategy.auth_payload(&params.init_data, &params.user)?;
        let request = self.shaper.build(
            Method::POST,
            proxy,
            None,
            self.strategy.custom_headers(&params.init_data),
            Some(payload),
        )?;
        let response = self.requester.send(&self.auth_url, &request).await?;

        let token = self.strategy.extract_token(&response)?;
        if token.trim().is_empty() {
            return Err(Error::TokenExtraction("token is empty".into()));
        }

        info!(username, "auth token acquired");
        self.observer.token_acquired(username);
        Ok(SlotCredentials {
            auth_token: Secret::new(token),
            init_data: params.init_data,
        })
    }
}

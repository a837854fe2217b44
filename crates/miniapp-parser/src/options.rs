//! Parser configuration
//!
//! Everything here is fixed at construction time.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Auth tokens are dropped this long after acquisition unless overridden.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(55 * 60);

/// When the next worker cycle runs.
#[derive(Clone, Default)]
pub enum WorkerTimeout {
    /// No loop: the caller drives cycles through a `WorkerHandle`.
    #[default]
    Disabled,
    /// Loop with the same pause after every cycle.
    Fixed(Duration),
    /// Loop, asking the supplier for a fresh pause after every cycle.
    Dynamic(Arc<dyn Fn() -> Duration + Send + Sync>),
}

impl WorkerTimeout {
    pub fn dynamic(supplier: impl Fn() -> Duration + Send + Sync + 'static) -> Self {
        WorkerTimeout::Dynamic(Arc::new(supplier))
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, WorkerTimeout::Disabled)
    }

    /// Pause before the next cycle, or `None` when looping is disabled.
    pub fn next_delay(&self) -> Option<Duration> {
        match self {
            WorkerTimeout::Disabled => None,
            WorkerTimeout::Fixed(delay) => Some(*delay),
            WorkerTimeout::Dynamic(supplier) => Some(supplier()),
        }
    }
}

impl fmt::Debug for WorkerTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerTimeout::Disabled => f.write_str("Disabled"),
            WorkerTimeout::Fixed(delay) => f.debug_tuple("Fixed").field(delay).finish(),
            WorkerTimeout::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// How long a cached auth token stays valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenTtl {
    Expires(Duration),
    /// Keep the first token for the life of the process.
    Never,
}

impl Default for TokenTtl {
    fn default() -> Self {
        TokenTtl::Expires(DEFAULT_TOKEN_TTL)
    }
}

impl TokenTtl {
    pub fn as_duration(self) -> Option<Duration> {
        match self {
            TokenTtl::Expires(ttl) => Some(ttl),
            TokenTtl::Never => None,
        }
    }
}

/// Target mini-app and scheduling policy.
#[derive(Debug, Clone)]
pub struct ParserOptions {
    /// Bot that hosts the mini-app, with or without `@`.
    pub bot_username: String,
    /// URL passed to the web-view request.
    pub app_base_url: String,
    /// Absolute URL the auth payload is POSTed to. Callers holding a bare
    /// path join it onto `app_base_url` first.
    pub auth_url: String,
    /// `Referer` sent on every shaped request.
    pub referer: String,
    pub worker_timeout: WorkerTimeout,
    pub token_ttl: TokenTtl,
}

impl ParserOptions {
    pub fn new(
        bot_username: impl Into<String>,
        app_base_url: impl Into<String>,
        auth_url: impl Into<String>,
        referer: impl Into<String>,
    ) -> Self {
        Self {
            bot_username: bot_username.into(),
            app_base_url: app_base_url.into(),
            auth_url: auth_url.into(),
            referer: referer.into(),
            worker_timeout: WorkerTimeout::default(),
            token_ttl: TokenTtl::default(),
        }
    }

    pub fn with_worker_timeout(mut self, worker_timeout: WorkerTimeout) -> Self {
        self.worker_timeout = worker_timeout;
        self
    }

    pub fn with_token_ttl(mut self, token_ttl: TokenTtl) -> Self {
        self.token_ttl = token_ttl;
        self
    }
}

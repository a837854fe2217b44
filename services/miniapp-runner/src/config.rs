//! Configuration types and loading
//!
//! Config precedence: CLI `--config` > `CONFIG_PATH` env var > default file.
//! `MINIAPP_SIDECAR_URL` overrides the sidecar URL from the file.
//! Everything is validated here, before any network activity.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use miniapp_parser::{ParserOptions, TokenTtl, WorkerTimeout};
use rand::RngExt;
use serde::Deserialize;
use userbot_pool::UserBot;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub parser: ParserConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    pub strategy: StrategyConfig,
    pub sidecar: SidecarConfig,
    #[serde(default)]
    pub request: RequestConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub user_bots: Vec<UserBot>,
}

/// Target mini-app
#[derive(Debug, Deserialize)]
pub struct ParserConfig {
    pub bot_username: String,
    pub app_base_url: String,
    /// Absolute URL, or a path starting with `/` joined onto `app_base_url`.
    pub auth_url: String,
    pub referer: String,
    /// Token lifetime; 0 keeps tokens for the life of the process.
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
}

/// Worker cadence
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ScheduleConfig {
    /// Cycles only run through `POST /run`.
    Disabled,
    Fixed { delay_secs: u64 },
    /// `delay_secs` plus a random extra of up to `jitter_secs`, drawn per cycle.
    Jittered { delay_secs: u64, jitter_secs: u64 },
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig::Fixed { delay_secs: 60 }
    }
}

/// What the worker calls and how the auth exchange is shaped
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    /// JSON field carrying init-data in the auth payload. Without it the
    /// raw init-data string is posted as `text/plain`.
    #[serde(default)]
    pub auth_field: Option<String>,
    /// Also send the parsed user profile under `user`.
    #[serde(default)]
    pub include_user: bool,
    /// JSON pointer to the token in the auth response, e.g. `/data/token`.
    pub token_pointer: String,
    /// Header that repeats the init-data on every request, if the backend wants one.
    #[serde(default)]
    pub init_data_header: Option<String>,
    pub worker_url: String,
    #[serde(default = "default_worker_method")]
    pub worker_method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Session gateway
#[derive(Debug, Deserialize)]
pub struct SidecarConfig {
    pub url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Outbound HTTP
#[derive(Debug, Deserialize)]
pub struct RequestConfig {
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
        }
    }
}

/// `/health`, `/metrics` and `/run` listener
#[derive(Debug, Deserialize)]
pub struct StatusConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_token_ttl_secs() -> u64 {
    miniapp_parser::DEFAULT_TOKEN_TTL.as_secs()
}

fn default_worker_method() -> String {
    "GET".into()
}

fn default_timeout() -> u64 {
    30
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

fn require_http_url(field: &str, value: &str) -> common::Result<()> {
    if !value.starts_with("http://") && !value.starts_with("https://") {
        return Err(common::Error::Config(format!(
            "{field} must start with http:// or https://, got: {value}"
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(url) = std::env::var("MINIAPP_SIDECAR_URL") {
            config.sidecar.url = url;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if self.parser.bot_username.trim_start_matches('@').trim().is_empty() {
            return Err(common::Error::Config("bot_username must not be empty".into()));
        }
        require_http_url("app_base_url", &self.parser.app_base_url)?;
        if !self.parser.auth_url.starts_with('/') {
            require_http_url("auth_url", &self.parser.auth_url)?;
        }
        require_http_url("referer", &self.parser.referer)?;
        require_http_url("worker_url", &self.strategy.worker_url)?;
        require_http_url("sidecar url", &self.sidecar.url)?;

        if !self.strategy.token_pointer.starts_with('/') {
            return Err(common::Error::Config(format!(
                "token_pointer must be a JSON pointer starting with '/', got: {}",
                self.strategy.token_pointer
            )));
        }
        if reqwest::Method::from_bytes(self.strategy.worker_method.as_bytes()).is_err() {
            return Err(common::Error::Config(format!(
                "worker_method is not an HTTP method: {}",
                self.strategy.worker_method
            )));
        }

        match self.schedule {
            ScheduleConfig::Fixed { delay_secs: 0 }
            | ScheduleConfig::Jittered { delay_secs: 0, .. } => {
                return Err(common::Error::Config(
                    "schedule delay_secs must be greater than 0".into(),
                ));
            }
            _ => {}
        }

        if self.request.timeout_secs == 0 || self.sidecar.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.user_bots.is_empty() {
            return Err(common::Error::Config(
                "at least one [[user_bots]] entry is required".into(),
            ));
        }

        Ok(())
    }

    pub fn parser_options(&self) -> ParserOptions {
        let ttl = match self.parser.token_ttl_secs {
            0 => TokenTtl::Never,
            secs => TokenTtl::Expires(Duration::from_secs(secs)),
        };
        ParserOptions::new(
            self.parser.bot_username.clone(),
            self.parser.app_base_url.clone(),
            self.auth_endpoint(),
            self.parser.referer.clone(),
        )
        .with_worker_timeout(self.schedule.worker_timeout())
        .with_token_ttl(ttl)
    }

    /// Absolute auth URL.
    pub fn auth_endpoint(&self) -> String {
        let auth = &self.parser.auth_url;
        if auth.starts_with('/') {
            format!("{}{auth}", self.parser.app_base_url.trim_end_matches('/'))
        } else {
            auth.clone()
        }
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("miniapp-runner.toml")
    }
}

impl ScheduleConfig {
    pub fn worker_timeout(&self) -> WorkerTimeout {
        match *self {
            ScheduleConfig::Disabled => WorkerTimeout::Disabled,
            ScheduleConfig::Fixed { delay_secs } => {
                WorkerTimeout::Fixed(Duration::from_secs(delay_secs))
            }
            ScheduleConfig::Jittered {
                delay_secs,
                jitter_secs,
            } => {
                let base = Duration::from_secs(delay_secs);
                let jitter_ms = jitter_secs.saturating_mul(1000);
                WorkerTimeout::dynamic(move || {
                    base + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
                })
            }
        }
    }
}

//! User-bot and proxy credential records
//!
//! Both are plain config records. `validate` is run once by the pool before
//! any network activity; a record that fails it aborts initialization.

use std::net::Ipv4Addr;

use common::Secret;
use serde::Deserialize;

/// SOCKS proxy credential assigned to one user-bot.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyCredential {
    pub ip: String,
    pub port: u16,
    pub username: String,
    pub password: Secret<String>,
}

impl ProxyCredential {
    /// Check all four fields; returns the parsed address.
    pub fn validate(&self) -> common::Result<Ipv4Addr> {
        let addr: Ipv4Addr = self.ip.parse().map_err(|_| {
            common::Error::invalid("proxy.ip", format!("{:?} is not an IPv4 address", self.ip))
        })?;
        if self.port == 0 {
            return Err(common::Error::invalid("proxy.port", "must be between 1 and 65535"));
        }
        if self.username.trim().is_empty() {
            return Err(common::Error::invalid("proxy.username", "must not be empty"));
        }
        if self.password.is_blank() {
            return Err(common::Error::invalid("proxy.password", "must not be empty"));
        }
        Ok(addr)
    }

    /// `ip:port`, safe to log.
    pub fn label(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// A pre-authenticated platform account plus the proxy it must use.
#[derive(Debug, Clone, Deserialize)]
pub struct UserBot {
    pub username: String,
    pub string_session: Secret<String>,
    pub api_id: i32,
    pub api_hash: Secret<String>,
    pub proxy: ProxyCredential,
}

impl UserBot {
    pub fn validate(&self) -> common::Result<()> {
        if self.username.trim().is_empty() {
            return Err(common::Error::invalid("username", "must not be empty"));
        }
        if self.string_session.is_blank() {
            return Err(common::Error::invalid("string_session", "must not be empty"));
        }
        if self.api_id <= 0 {
            return Err(common::Error::invalid("api_id", "must be a positive integer"));
        }
        if self.api_hash.is_blank() {
            return Err(common::Error::invalid("api_hash", "must not be empty"));
        }
        self.proxy.validate()?;
        Ok(())
    }
}

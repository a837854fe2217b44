//! User-bot identity pool
//!
//! Each identity is a pre-authenticated platform account bound to its own
//! SOCKS5 proxy. The pool validates the records, proves every proxy exits
//! from the IP it claims, opens and authorizes each session, and then serves
//! rotation slots round-robin.
//!
//! The platform protocol itself sits behind `SessionConnector` /
//! `SessionClient`; this crate never speaks it directly.

pub mod error;
pub mod identity;
pub mod launch;
pub mod pool;
pub mod proxy;
pub mod session;
pub mod slot;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{Error, Result};
pub use identity::{ProxyCredential, UserBot};
pub use launch::{LaunchParams, UserProfile, parse_launch_params};
pub use pool::{CONNECTION_RETRIES, IdentityPool, WEB_VIEW_PLATFORM};
pub use proxy::{PROXY_CHECK_URL, ProxyService, SessionProxy};
pub use session::{
    PeerRef, SessionClient, SessionConfig, SessionConnector, SessionError, SessionFuture,
    WebViewRequest, WebViewResult,
};
pub use slot::{RotationQueue, RotationSlot, SlotCredentials};

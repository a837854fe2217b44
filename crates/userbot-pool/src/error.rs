//! Error types for pool operations

/// Errors from pool initialization, lookups and launch-parameter fetches.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid user-bot {username}: {source}")]
    Validation {
        username: String,
        #[source]
        source: common::Error,
    },

    #[error("invalid proxy {0}")]
    InvalidProxy(String),

    #[error("proxy verification failed for {ip}: {reason}")]
    ProxyVerificationFailed { ip: String, reason: String },

    #[error("user-bot {0} is not authorized")]
    SessionNotAuthorized(String),

    #[error("session error for user-bot {username}: {reason}")]
    Session { username: String, reason: String },

    #[error("no connected user-bot with username: {0}")]
    NotFound(String),

    #[error("no available user-bot")]
    NoAvailableIdentity,

    #[error("pool is already initialized")]
    AlreadyInitialized,

    #[error("no init data in launch parameters")]
    NoInitData,

    #[error("no user data in init data")]
    NoUserData,

    #[error("launch parameters parse error: {0}")]
    LaunchParams(String),

    #[error(transparent)]
    Request(#[from] requester::Error),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;

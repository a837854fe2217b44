//! Error types for parser cycles

/// Errors from token acquisition, worker execution and scheduler control.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Pool(#[from] userbot_pool::Error),

    #[error(transparent)]
    Request(#[from] requester::Error),

    #[error("cannot build auth payload: {0}")]
    AuthPayload(String),

    #[error("auth response carries no token: {0}")]
    TokenExtraction(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("worker failed: {0}")]
    Worker(String),

    #[error("parser is already initialized")]
    AlreadyInitialized,

    #[error("parser has been shut down")]
    ShutDown,
}

impl Error {
    /// HTTP status behind the failure, if it came from an upstream response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Request(e) | Error::Pool(userbot_pool::Error::Request(e)) => e.status(),
            _ => None,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Pool(userbot_pool::Error::NoAvailableIdentity) => "no_identity",
            Error::Pool(userbot_pool::Error::NoInitData | userbot_pool::Error::NoUserData) => {
                "launch_params"
            }
            Error::Pool(_) => "pool",
            Error::Request(_) => "request",
            Error::AuthPayload(_) | Error::TokenExtraction(_) => "auth",
            Error::InvalidHeader(_) => "header",
            Error::Worker(_) => "worker",
            Error::AlreadyInitialized | Error::ShutDown => "lifecycle",
        }
    }
}

/// Result alias for parser operations.
pub type Result<T> = std::result::Result<T, Error>;

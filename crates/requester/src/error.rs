//! Error types for outbound requests

/// Errors from a single transport attempt or from the retry loop as a whole.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response body: {0}")]
    Decode(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Every attempt failed. Carries the error of the final attempt.
    #[error("request to {url} exhausted after {attempts} attempts: {last}")]
    Exhausted {
        url: String,
        attempts: u32,
        last: Box<Error>,
    },
}

impl Error {
    /// HTTP status of the underlying failure, looking through `Exhausted`.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Status { status, .. } => Some(*status),
            Error::Exhausted { last, .. } => last.status(),
            _ => None,
        }
    }
}

/// Result alias for request operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_reports_last_error() {
        let err = Error::Exhausted {
            url: "https://api.ipify.org?format=json".into(),
            attempts: 3,
            last: Box::new(Error::Status {
                status: 502,
                body: "bad gateway".into(),
            }),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempts"), "got: {msg}");
        assert!(msg.contains("502"), "got: {msg}");
        assert_eq!(err.status(), Some(502));
    }

    #[test]
    fn status_absent_for_transport_errors() {
        assert_eq!(Error::Http("connection refused".into()).status(), None);
    }
}

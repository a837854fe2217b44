//! Retrying HTTP request layer
//!
//! Every authenticated call in the workspace goes through `Requester`, which
//! wraps a `Transport` with a fixed retry budget: 3 attempts, 1.5 s apart,
//! no backoff growth and no retryable/non-retryable distinction. A proxy
//! that is down should fail the call in a few seconds, not hang a cycle.
//!
//! The `Transport` trait is the seam between retry policy and the actual
//! HTTP stack. `ReqwestTransport` is the production implementation; tests
//! plug in scripted transports.

pub mod client;
pub mod error;
pub mod request;
pub mod transport;

pub use client::{MAX_ATTEMPTS, RETRY_DELAY, Requester};
pub use error::{Error, Result};
pub use request::{ApiRequest, ProxyHandle, RequestBody};
pub use transport::ReqwestTransport;

use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by transport calls.
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send + 'a>>;

/// One HTTP attempt: send the request, return the parsed JSON body.
///
/// Implementations must treat transport failures, non-2xx statuses and
/// non-JSON bodies as errors. Retrying is the caller's job.
///
/// Uses `Pin<Box<dyn Future>>` return types so it can live behind
/// `Arc<dyn Transport>`.
pub trait Transport: Send + Sync {
    fn execute<'a>(&'a self, url: &'a str, request: &'a ApiRequest) -> TransportFuture<'a>;
}

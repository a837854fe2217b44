//! Retrying request client

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};

use crate::Transport;
use crate::error::{Error, Result};
use crate::request::ApiRequest;

/// Total attempts per call (first try included).
pub const MAX_ATTEMPTS: u32 = 3;

/// Fixed pause between a failed attempt and the next one.
pub const RETRY_DELAY: Duration = Duration::from_millis(1500);

/// Sends requests through a `Transport` with a fixed retry budget.
///
/// Cheap to share: hold it in an `Arc` and hand it to every component that
/// makes outbound calls.
pub struct Requester {
    transport: Arc<dyn Transport>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl Requester {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_policy(transport, MAX_ATTEMPTS, RETRY_DELAY)
    }

    /// Override the retry budget. `max_attempts` is clamped to at least 1.
    pub fn with_policy(
        transport: Arc<dyn Transport>,
        max_attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            transport,
            max_attempts: max_attempts.max(1),
            retry_delay,
        }
    }

    /// Send `request` to `url`, retrying every failure until the budget runs out.
    ///
    /// Returns the parsed JSON body of the first successful attempt, or
    /// `Error::Exhausted` wrapping the last attempt's error.
    pub async fn send(&self, url: &str, request: &ApiRequest) -> Result<serde_json::Value> {
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            match self.transport.execute(url, request).await {
                Ok(body) => {
                    if attempt > 1 {
                        debug!(url, attempt, "request succeeded after retry");
                    }
                    return Ok(body);
                }
                Err(e) => {
                    warn!(
                        url,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "request attempt failed"
                    );
                    last_error = Some(e);
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        let last = last_error.unwrap_or_else(|| Error::Http("no attempt was made".into()));
        error!(url, attempts = self.max_attempts, error = %last, "request exhausted all attempts");
        Err(Error::Exhausted {
            url: url.to_string(),
            attempts: self.max_attempts,
            last: Box::new(last),
        })
    }

    /// `send`, then deserialize the body into `T`.
    ///
    /// A body that parses as JSON but does not match `T` is not retried.
    pub async fn send_as<T: DeserializeOwned>(&self, url: &str, request: &ApiRequest) -> Result<T> {
        let body = self.send(url, request).await?;
        serde_json::from_value(body)
            .map_err(|e| Error::Decode(format!("unexpected response shape: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransportFuture;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Transport that replays a fixed script of outcomes and counts calls.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<serde_json::Value>>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<serde_json::Value>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Transport for ScriptedTransport {
        fn execute<'a>(&'a self, _url: &'a str, _request: &'a ApiRequest) -> TransportFuture<'a> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::Http("script exhausted".into())));
            Box::pin(async move { next })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fails_twice_then_succeeds_on_third_attempt() {
        let transport = ScriptedTransport::new(vec![
            Err(Error::Http("connection reset".into())),
            Err(Error::Status {
                status: 503,
                body: "busy".into(),
            }),
            Ok(json!({"token": "jwt-3"})),
        ]);
        let requester = Requester::new(transport.clone());

        let started = tokio::time::Instant::now();
        let body = requester
            .send("https://app.example/api/auth", &ApiRequest::post())
            .await
            .unwrap();

        assert_eq!(body, json!({"token": "jwt-3"}));
        assert_eq!(transport.calls(), 3);
        assert_eq!(started.elapsed(), RETRY_DELAY * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_transport_exhausts_after_three_attempts() {
        let transport = ScriptedTransport::new(vec![
            Err(Error::Http("timeout".into())),
            Err(Error::Http("timeout".into())),
            Err(Error::Decode("expected value at line 1".into())),
            Ok(json!({"never": "reached"})),
        ]);
        let requester = Requester::new(transport.clone());

        let err = requester
            .send("https://app.example/api/auth", &ApiRequest::post())
            .await
            .unwrap_err();

        assert_eq!(transport.calls(), 3);
        match err {
            Error::Exhausted { attempts, last, .. } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, Error::Decode(_)), "last: {last:?}");
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_success_makes_single_attempt() {
        let transport = ScriptedTransport::new(vec![Ok(json!({"ip": "1.2.3.4"}))]);
        let requester = Requester::new(transport.clone());

        let started = tokio::time::Instant::now();
        requester
            .send("https://api.ipify.org?format=json", &ApiRequest::get())
            .await
            .unwrap();

        assert_eq!(transport.calls(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn no_sleep_after_final_failure() {
        let transport = ScriptedTransport::new(vec![]);
        let requester = Requester::with_policy(transport.clone(), 2, Duration::from_secs(10));

        let started = tokio::time::Instant::now();
        let _ = requester.send("https://x.example", &ApiRequest::get()).await;

        assert_eq!(transport.calls(), 2);
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn send_as_decodes_typed_body() {
        #[derive(serde::Deserialize)]
        struct Ip {
            ip: String,
        }
        let transport = ScriptedTransport::new(vec![Ok(json!({"ip": "198.51.100.2"}))]);
        let requester = Requester::new(transport);

        let ip: Ip = requester
            .send_as("https://api.ipify.org?format=json", &ApiRequest::get())
            .await
            .unwrap();
        assert_eq!(ip.ip, "198.51.100.2");
    }

    #[test]
    fn zero_attempts_clamped_to_one() {
        let requester = Requester::with_policy(ScriptedTransport::new(vec![]), 0, RETRY_DELAY);
        assert_eq!(requester.max_attempts, 1);
    }
}

//! Worker scheduler
//!
//! A `Parser` drives worker cycles over the identity pool. Each cycle:
//!
//! 1. select the next slot round-robin;
//! 2. resolve that identity's proxy;
//! 3. ensure the slot holds a valid token and take a snapshot of it;
//! 4. run the strategy's worker with the snapshot;
//! 5. log the outcome and notify the observer.
//!
//! Cycle errors never escape. In loop mode the next cycle is scheduled after
//! every cycle, successful or not. In on-demand mode `WorkerHandle::run`
//! reports a contained failure as `Ok(None)`.
//!
//! Shutdown only cancels the pending sleep: a cycle already running is
//! allowed to finish, and `shutdown` waits for it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use requester::Requester;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};
use userbot_pool::{IdentityPool, RotationSlot};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::observer::{CycleObserver, NoopObserver};
use crate::options::{ParserOptions, WorkerTimeout};
use crate::shaping::RequestShaper;
use crate::strategy::{MiniAppStrategy, WorkerContext};
use crate::token::TokenManager;

struct Inner<S: MiniAppStrategy> {
    pool: Arc<IdentityPool>,
    requester: Arc<Requester>,
    strategy: Arc<S>,
    tokens: TokenManager<S>,
    shaper: RequestShaper,
    worker_timeout: WorkerTimeout,
    observer: Arc<dyn CycleObserver>,
    shut_down: AtomicBool,
}

impl<S: MiniAppStrategy> Inner<S> {
    async fn cycle_on(&self, slot: &Arc<RotationSlot>, args: S::Args) -> Result<S::Output> {
        let proxy = self.pool.proxy_for(slot.username()).await?;
        let credentials = self.tokens.ensure(slot, &proxy).await?;
        let custom_headers = self.strategy.custom_headers(&credentials.init_data);
        let ctx = WorkerContext::new(
            slot.username().to_string(),
            credentials.auth_token,
            credentials.init_data,
            proxy,
            custom_headers,
            self.shaper.clone(),
            self.requester.clone(),
        );
        self.strategy.worker(ctx, args).await
    }

    /// One contained cycle.
    async fn execute(&self, args: S::Args) -> Option<S::Output> {
        let span = info_span!(
            "cycle",
            cycle_id = %Uuid::new_v4(),
            username = tracing::field::Empty
        );
        async move {
            let started = Instant::now();
            let slot = match self.pool.select().await {
                Ok(slot) => slot,
                Err(e) => {
                    self.report_failure(None, e.into());
                    return None;
                }
            };
            tracing::Span::current().record("username", slot.username());

            match self.cycle_on(&slot, args).await {
                Ok(output) => {
                    let elapsed = started.elapsed();
                    info!(elapsed_ms = elapsed.as_millis() as u64, "worker finished its job");
                    self.observer.cycle_succeeded(slot.username(), elapsed);
                    Some(output)
                }
                Err(e) => {
                    self.report_failure(Some(slot.username()), e);
                    None
                }
            }
        }
        .instrument(span)
        .await
    }

    /// `execute` in its own task, so a panicking worker fails only its cycle.
    async fn execute_isolated(self: &Arc<Self>, args: S::Args) -> Option<S::Output> {
        let inner = self.clone();
        match tokio::spawn(async move { inner.execute(args).await }).await {
            Ok(output) => output,
            Err(e) => {
                self.report_failure(None, Error::Worker(format!("cycle task aborted: {e}")));
                None
            }
        }
    }

    fn report_failure(&self, username: Option<&str>, error: Error) {
        error!(error = %error, kind = error.kind(), "worker cycle failed");
        self.observer.cycle_failed(username, &error);
    }
}

async fn run_loop<S: MiniAppStrategy>(inner: Arc<Inner<S>>, mut shutdown: watch::Receiver<bool>) {
    info!(timeout = ?inner.worker_timeout, "worker loop started");
    loop {
        inner.execute_isolated(S::Args::default()).await;

        if *shutdown.borrow() {
            break;
        }
        let Some(delay) = inner.worker_timeout.next_delay() else {
            break;
        };
        debug!(delay_ms = delay.as_millis() as u64, "next cycle scheduled");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }
    info!("worker loop stopped");
}

/// Caller-driven entry point returned when the worker loop is disabled.
pub struct WorkerHandle<S: MiniAppStrategy> {
    inner: Arc<Inner<S>>,
}

impl<S: MiniAppStrategy> Clone for WorkerHandle<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: MiniAppStrategy> WorkerHandle<S> {
    /// Run one cycle now.
    ///
    /// `Ok(None)` means the cycle failed; the failure was logged and sent to
    /// the observer. Fails only once the parser has been shut down.
    pub async fn run(&self, args: S::Args) -> Result<Option<S::Output>> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(Error::ShutDown);
        }
        Ok(self.inner.execute_isolated(args).await)
    }
}

/// Schedules worker cycles over an initialized identity pool.
pub struct Parser<S: MiniAppStrategy> {
    inner: Arc<Inner<S>>,
    shutdown_tx: watch::Sender<bool>,
    loop_task: Mutex<Option<JoinHandle<()>>>,
    initialized: AtomicBool,
}

impl<S: MiniAppStrategy> Parser<S> {
    pub fn new(
        pool: Arc<IdentityPool>,
        requester: Arc<Requester>,
        strategy: S,
        options: ParserOptions,
    ) -> Result<Self> {
        Self::with_observer(pool, requester, strategy, options, Arc::new(NoopObserver))
    }

    pub fn with_observer(
        pool: Arc<IdentityPool>,
        requester: Arc<Requester>,
        strategy: S,
        options: ParserOptions,
        observer: Arc<dyn CycleObserver>,
    ) -> Result<Self> {
        let strategy = Arc::new(strategy);
        let shaper = RequestShaper::new(&options.referer)?;
        let tokens = TokenManager::new(
            pool.clone(),
            requester.clone(),
            strategy.clone(),
            shaper.clone(),
            &options,
            observer.clone(),
        );
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(Inner {
                pool,
                requester,
                strategy,
                tokens,
                shaper,
                worker_timeout: options.worker_timeout,
                observer,
                shut_down: AtomicBool::new(false),
            }),
            shutdown_tx,
            loop_task: Mutex::new(None),
            initialized: AtomicBool::new(false),
        })
    }

    /// Start scheduling.
    ///
    /// With looping disabled, returns a handle for running cycles on demand.
    /// Otherwise spawns the loop (first cycle immediately) and returns `None`.
    /// The pool must already be initialized.
    pub async fn initialize(&self) -> Result<Option<WorkerHandle<S>>> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(Error::ShutDown);
        }
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyInitialized);
        }

        if self.inner.worker_timeout.is_disabled() {
            info!(
                identities = self.inner.pool.rotation_len(),
                "worker loop disabled, cycles run on demand"
            );
            return Ok(Some(WorkerHandle {
                inner: self.inner.clone(),
            }));
        }

        let task = tokio::spawn(run_loop(self.inner.clone(), self.shutdown_tx.subscribe()));
        *self.loop_task.lock().await = Some(task);
        Ok(None)
    }

    /// Run one cycle and return its error instead of containing it.
    pub async fn run_cycle(&self, args: S::Args) -> Result<S::Output> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(Error::ShutDown);
        }
        let slot = self.inner.pool.select().await?;
        self.inner.cycle_on(&slot, args).await
    }

    /// Cancel the pending cycle, wait for a running one and cancel token
    /// timers. Safe to call more than once.
    ///
    /// The pool stays usable: cached tokens keep their deadlines, and a
    /// parser started later on the same pool arms fresh timers.
    pub async fn shutdown(&self) {
        let first = !self.inner.shut_down.swap(true, Ordering::SeqCst);
        self.shutdown_tx.send_replace(true);

        let task = self.loop_task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "worker loop ended abnormally");
            }
        }

        if first {
            self.inner.pool.disarm_all().await;
            info!("parser shut down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use reqwest::Method;
    use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, REFERER};
    use requester::RequestBody;
    use serde_json::{Value, json};
    use userbot_pool::UserProfile;
    use userbot_pool::testing::{FakeConnector, FakeTransport, user_bot};

    use crate::options::TokenTtl;
    use crate::strategy::WorkerFuture;

    const APP_URL: &str = "https://app.example.com/";
    const AUTH_URL: &str = "https://app.example.com/api/auth";
    const WORK_URL: &str = "https://app.example.com/api/tasks";

    #[derive(Default)]
    struct TaskStrategy {
        hold: Option<Duration>,
        panic_on_work: bool,
        seen_tokens: std::sync::Mutex<Vec<String>>,
    }

    impl TaskStrategy {
        fn seen(&self) -> Vec<String> {
            self.seen_tokens.lock().unwrap().clone()
        }
    }

    impl MiniAppStrategy for Arc<TaskStrategy> {
        type Args = ();
        type Output = Value;

        fn auth_payload(&self, init_data: &str, user: &UserProfile) -> Result<RequestBody> {
            Ok(json!({ "init_data": init_data, "user_id": user.id }).into())
        }

        fn extract_token(&self, response: &Value) -> Result<String> {
            response["token"]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| Error::TokenExtraction(response.to_string()))
        }

        fn custom_headers(&self, _init_data: &str) -> HeaderMap {
            let mut headers = HeaderMap::new();
            headers.insert("x-app-version", HeaderValue::from_static("2.4.1"));
            headers
        }

        fn worker<'a>(&'a self, ctx: WorkerContext, _args: ()) -> WorkerFuture<'a, Value> {
            Box::pin(async move {
                if let Some(hold) = self.hold {
                    tokio::time::sleep(hold).await;
                }
                if self.panic_on_work {
                    panic!("worker blew up");
                }
                self.seen_tokens.lock().unwrap().push(ctx.auth_token().to_string());
                let request = ctx.request(Method::GET, None)?;
                ctx.send(WORK_URL, &request).await
            })
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: std::sync::Mutex<Vec<String>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn failures(&self) -> usize {
            self.events().iter().filter(|e| e.starts_with("fail:")).count()
        }
    }

    impl CycleObserver for Recorder {
        fn cycle_succeeded(&self, username: &str, _elapsed: Duration) {
            self.events.lock().unwrap().push(format!("ok:{username}"));
        }

        fn cycle_failed(&self, username: Option<&str>, error: &Error) {
            self.events
                .lock()
                .unwrap()
                .push(format!("fail:{}:{}", username.unwrap_or("-"), error.kind()));
        }

        fn token_acquired(&self, username: &str) {
            self.events.lock().unwrap().push(format!("token:{username}"));
        }
    }

    struct Harness {
        transport: Arc<FakeTransport>,
        pool: Arc<IdentityPool>,
        requester: Arc<Requester>,
        recorder: Arc<Recorder>,
        strategy: Arc<TaskStrategy>,
    }

    impl Harness {
        async fn new(usernames: &[&str]) -> Self {
            Self::with_strategy(usernames, TaskStrategy::default()).await
        }

        async fn with_strategy(usernames: &[&str], strategy: TaskStrategy) -> Self {
            let transport = FakeTransport::new();
            // Single attempt, so failing cycles take no simulated time.
            let requester = Arc::new(Requester::with_policy(transport.clone(), 1, Duration::ZERO));
            let bots = usernames
                .iter()
                .enumerate()
                .map(|(i, name)| user_bot(name, &format!("203.0.113.{}", i + 1)))
                .collect();
            let pool = Arc::new(IdentityPool::new(bots, requester.clone(), FakeConnector::new()));
            pool.initialize().await.unwrap();
            Self {
                transport,
                pool,
                requester,
                recorder: Arc::new(Recorder::default()),
                strategy: Arc::new(strategy),
            }
        }

        fn parser(&self, timeout: WorkerTimeout, ttl: TokenTtl) -> Parser<Arc<TaskStrategy>> {
            let options = ParserOptions::new("@shop_bot", APP_URL, AUTH_URL, APP_URL)
                .with_worker_timeout(timeout)
                .with_token_ttl(ttl);
            Parser::with_observer(
                self.pool.clone(),
                self.requester.clone(),
                self.strategy.clone(),
                options,
                self.recorder.clone(),
            )
            .unwrap()
        }

        fn auth_calls(&self) -> usize {
            self.transport.requests_to(AUTH_URL).len()
        }

        fn work_calls(&self) -> usize {
            self.transport.requests_to(WORK_URL).len()
        }
    }

    #[tokio::test]
    async fn on_demand_cycle_sends_shaped_requests() {
        let h = Harness::new(&["alice"]).await;
        h.transport.respond(AUTH_URL, Ok(json!({ "token": "tok-1" })));
        h.transport.respond(WORK_URL, Ok(json!({ "tasks": [] })));
        let parser = h.parser(WorkerTimeout::Disabled, TokenTtl::default());

        let handle = parser.initialize().await.unwrap().expect("on-demand handle");
        let output = handle.run(()).await.unwrap();

        assert_eq!(output, Some(json!({ "tasks": [] })));

        let auth = &h.transport.requests_to(AUTH_URL)[0];
        assert!(auth.headers.get(AUTHORIZATION).is_none());
        assert_eq!(auth.headers.get("x-app-version").unwrap(), "2.4.1");
        assert_eq!(auth.proxy.as_deref(), Some("203.0.113.1:1080"));
        match &auth.body {
            Some(RequestBody::Json(body)) => {
                assert!(body["init_data"].as_str().unwrap().starts_with("query_id=AAE-alice&"));
            }
            other => panic!("expected JSON auth body, got {other:?}"),
        }

        let work = &h.transport.requests_to(WORK_URL)[0];
        assert_eq!(work.headers.get(AUTHORIZATION).unwrap(), "tok-1");
        assert_eq!(work.headers.get(REFERER).unwrap(), APP_URL);
        assert_eq!(work.proxy.as_deref(), Some("203.0.113.1:1080"));

        assert_eq!(h.recorder.events(), ["token:alice", "ok:alice"]);
    }

    #[tokio::test(start_paused = true)]
    async fn token_is_reused_until_it_expires() {
        let h = Harness::new(&["alice"]).await;
        h.transport.respond(AUTH_URL, Ok(json!({ "token": "tok-1" })));
        h.transport.respond(AUTH_URL, Ok(json!({ "token": "tok-2" })));
        h.transport.respond(WORK_URL, Ok(json!({})));
        let parser = h.parser(WorkerTimeout::Disabled, TokenTtl::Expires(Duration::from_secs(60)));
        let handle = parser.initialize().await.unwrap().unwrap();

        handle.run(()).await.unwrap().unwrap();
        handle.run(()).await.unwrap().unwrap();
        assert_eq!(h.auth_calls(), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        handle.run(()).await.unwrap().unwrap();
        assert_eq!(h.auth_calls(), 2);
        assert_eq!(h.strategy.seen(), ["tok-1", "tok-1", "tok-2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn never_ttl_keeps_first_token() {
        let h = Harness::new(&["alice"]).await;
        h.transport.respond(AUTH_URL, Ok(json!({ "token": "tok-1" })));
        h.transport.respond(WORK_URL, Ok(json!({})));
        let parser = h.parser(WorkerTimeout::Disabled, TokenTtl::Never);
        let handle = parser.initialize().await.unwrap().unwrap();

        handle.run(()).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_secs(6 * 3600)).await;
        handle.run(()).await.unwrap().unwrap();

        assert_eq!(h.auth_calls(), 1);
    }

    #[tokio::test]
    async fn each_identity_gets_its_own_token_and_proxy() {
        let h = Harness::new(&["alice", "bob"]).await;
        h.transport.respond(AUTH_URL, Ok(json!({ "token": "tok-a" })));
        h.transport.respond(AUTH_URL, Ok(json!({ "token": "tok-b" })));
        h.transport.respond(WORK_URL, Ok(json!({})));
        let parser = h.parser(WorkerTimeout::Disabled, TokenTtl::default());
        let handle = parser.initialize().await.unwrap().unwrap();

        for _ in 0..4 {
            handle.run(()).await.unwrap().unwrap();
        }

        assert_eq!(h.auth_calls(), 2);
        assert_eq!(h.strategy.seen(), ["tok-a", "tok-b", "tok-a", "tok-b"]);
        let proxies: Vec<_> = h
            .transport
            .requests_to(WORK_URL)
            .into_iter()
            .map(|r| r.proxy.unwrap())
            .collect();
        assert_eq!(
            proxies,
            ["203.0.113.1:1080", "203.0.113.2:1080", "203.0.113.1:1080", "203.0.113.2:1080"]
        );
    }

    #[tokio::test]
    async fn failed_acquisition_is_contained_and_retried_next_cycle() {
        let h = Harness::new(&["alice"]).await;
        h.transport.respond(
            AUTH_URL,
            Err(requester::Error::Status {
                status: 500,
                body: "maintenance".into(),
            }),
        );
        h.transport.respond(AUTH_URL, Ok(json!({ "token": "tok-1" })));
        h.transport.respond(WORK_URL, Ok(json!({})));
        let parser = h.parser(WorkerTimeout::Disabled, TokenTtl::default());
        let handle = parser.initialize().await.unwrap().unwrap();

        assert!(handle.run(()).await.unwrap().is_none());
        assert_eq!(h.work_calls(), 0);

        assert!(handle.run(()).await.unwrap().is_some());
        assert_eq!(h.auth_calls(), 2);
        assert_eq!(h.recorder.events(), ["fail:alice:request", "token:alice", "ok:alice"]);
    }

    #[tokio::test]
    async fn token_missing_from_response_is_an_auth_failure() {
        let h = Harness::new(&["alice"]).await;
        h.transport.respond(AUTH_URL, Ok(json!({ "error": "bad init data" })));
        let parser = h.parser(WorkerTimeout::Disabled, TokenTtl::default());
        let handle = parser.initialize().await.unwrap().unwrap();

        assert!(handle.run(()).await.unwrap().is_none());
        assert_eq!(h.recorder.events(), ["fail:alice:auth"]);
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_loop_keeps_going_after_failures() {
        let h = Harness::new(&["alice"]).await;
        h.transport.respond(AUTH_URL, Ok(json!({ "token": "tok-1" })));
        // No route for WORK_URL: every worker call fails with 404.
        let parser = h.parser(WorkerTimeout::Fixed(Duration::from_secs(10)), TokenTtl::default());

        assert!(parser.initialize().await.unwrap().is_none());
        tokio::time::sleep(Duration::from_secs(25)).await;

        assert_eq!(h.work_calls(), 3);
        assert_eq!(h.recorder.failures(), 3);
        parser.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn dynamic_delay_is_asked_for_after_every_cycle() {
        let h = Harness::new(&["alice"]).await;
        h.transport.respond(AUTH_URL, Ok(json!({ "token": "tok-1" })));
        h.transport.respond(WORK_URL, Ok(json!({})));
        let asked = Arc::new(AtomicUsize::new(0));
        let counter = asked.clone();
        let timeout = WorkerTimeout::dynamic(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Duration::from_secs(5)
        });
        let parser = h.parser(timeout, TokenTtl::default());

        parser.initialize().await.unwrap();
        tokio::time::sleep(Duration::from_secs(12)).await;

        assert_eq!(h.work_calls(), 3);
        assert_eq!(asked.load(Ordering::SeqCst), 3);
        parser.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn worker_keeps_snapshot_when_token_expires_mid_cycle() {
        let strategy = TaskStrategy {
            hold: Some(Duration::from_secs(5)),
            ..TaskStrategy::default()
        };
        let h = Harness::with_strategy(&["alice"], strategy).await;
        h.transport.respond(AUTH_URL, Ok(json!({ "token": "tok-1" })));
        h.transport.respond(AUTH_URL, Ok(json!({ "token": "tok-2" })));
        h.transport.respond(WORK_URL, Ok(json!({})));
        let parser = h.parser(WorkerTimeout::Disabled, TokenTtl::Expires(Duration::from_secs(1)));
        let handle = parser.initialize().await.unwrap().unwrap();

        handle.run(()).await.unwrap().unwrap();

        // The slot expired while the worker slept; it still used tok-1.
        let work = h.transport.requests_to(WORK_URL);
        assert_eq!(work[0].headers.get(AUTHORIZATION).unwrap(), "tok-1");

        handle.run(()).await.unwrap().unwrap();
        assert_eq!(h.strategy.seen(), ["tok-1", "tok-2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_twice_leaves_nothing_scheduled() {
        let h = Harness::new(&["alice"]).await;
        h.transport.respond(AUTH_URL, Ok(json!({ "token": "tok-1" })));
        h.transport.respond(WORK_URL, Ok(json!({})));
        let parser = h.parser(WorkerTimeout::Fixed(Duration::from_secs(10)), TokenTtl::default());

        parser.initialize().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.work_calls(), 1);

        parser.shutdown().await;
        parser.shutdown().await;

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(h.work_calls(), 1);
        assert!(parser.loop_task.lock().await.is_none());
    }

    #[tokio::test]
    async fn handle_refuses_to_run_after_shutdown() {
        let h = Harness::new(&["alice"]).await;
        let parser = h.parser(WorkerTimeout::Disabled, TokenTtl::default());
        let handle = parser.initialize().await.unwrap().unwrap();

        parser.shutdown().await;

        assert!(matches!(handle.run(()).await, Err(Error::ShutDown)));
        assert!(matches!(parser.initialize().await, Err(Error::ShutDown)));
    }

    #[tokio::test]
    async fn run_cycle_refuses_after_shutdown() {
        let h = Harness::new(&["alice"]).await;
        h.transport.respond(AUTH_URL, Ok(json!({ "token": "tok-1" })));
        h.transport.respond(WORK_URL, Ok(json!({})));
        let parser = h.parser(WorkerTimeout::Disabled, TokenTtl::default());

        parser.shutdown().await;

        assert!(matches!(parser.run_cycle(()).await, Err(Error::ShutDown)));
        assert_eq!(h.auth_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_still_expire_for_a_parser_started_after_another_shut_down() {
        let h = Harness::new(&["alice"]).await;
        h.transport.respond(AUTH_URL, Ok(json!({ "token": "tok-1" })));
        h.transport.respond(AUTH_URL, Ok(json!({ "token": "tok-2" })));
        h.transport.respond(WORK_URL, Ok(json!({})));
        let ttl = TokenTtl::Expires(Duration::from_secs(60));

        let first = h.parser(WorkerTimeout::Disabled, ttl);
        let handle = first.initialize().await.unwrap().unwrap();
        handle.run(()).await.unwrap().unwrap();
        first.shutdown().await;

        tokio::time::sleep(Duration::from_secs(3600)).await;

        let second = h.parser(WorkerTimeout::Disabled, ttl);
        let handle = second.initialize().await.unwrap().unwrap();
        handle.run(()).await.unwrap().unwrap();
        assert_eq!(h.auth_calls(), 2);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        tokio::task::yield_now().await;

        handle.run(()).await.unwrap().unwrap();
        assert_eq!(h.auth_calls(), 3);
        assert_eq!(h.strategy.seen(), ["tok-1", "tok-2", "tok-2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_worker_fails_its_cycle_and_the_loop_goes_on() {
        let strategy = TaskStrategy {
            panic_on_work: true,
            ..TaskStrategy::default()
        };
        let h = Harness::with_strategy(&["alice"], strategy).await;
        h.transport.respond(AUTH_URL, Ok(json!({ "token": "tok-1" })));
        let parser = h.parser(WorkerTimeout::Fixed(Duration::from_secs(10)), TokenTtl::default());

        parser.initialize().await.unwrap();
        tokio::time::sleep(Duration::from_secs(25)).await;

        assert_eq!(h.recorder.failures(), 3);
        assert_eq!(
            h.recorder.events(),
            ["token:alice", "fail:-:worker", "fail:-:worker", "fail:-:worker"]
        );
        assert!(
            parser
                .loop_task
                .lock()
                .await
                .as_ref()
                .is_some_and(|task| !task.is_finished())
        );
        parser.shutdown().await;
    }

    #[tokio::test]
    async fn initialize_runs_once() {
        let h = Harness::new(&["alice"]).await;
        let parser = h.parser(WorkerTimeout::Disabled, TokenTtl::default());
        parser.initialize().await.unwrap();
        assert!(matches!(parser.initialize().await, Err(Error::AlreadyInitialized)));
    }

    #[tokio::test]
    async fn empty_pool_fails_the_cycle_without_stopping() {
        let h = Harness::new(&[]).await;
        let parser = h.parser(WorkerTimeout::Disabled, TokenTtl::default());
        let handle = parser.initialize().await.unwrap().unwrap();

        assert!(handle.run(()).await.unwrap().is_none());
        assert!(handle.run(()).await.unwrap().is_none());
        assert_eq!(h.recorder.events(), ["fail:-:no_identity", "fail:-:no_identity"]);
    }

    #[tokio::test]
    async fn run_cycle_surfaces_the_error() {
        let h = Harness::new(&["alice"]).await;
        h.transport.respond(AUTH_URL, Ok(json!({ "token": "tok-1" })));
        let parser = h.parser(WorkerTimeout::Disabled, TokenTtl::default());

        let err = parser.run_cycle(()).await.unwrap_err();
        assert_eq!(err.status(), Some(404));
    }
}

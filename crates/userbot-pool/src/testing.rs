//! In-memory fakes for the session client and HTTP transport.
//!
//! Compiled for this crate's tests and for dependents that enable the
//! `testing` feature in their dev-dependencies.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use common::Secret;
use requester::{ApiRequest, RequestBody, Transport, TransportFuture};
use reqwest::header::HeaderMap;
use serde_json::json;
use url::form_urlencoded;

use crate::identity::{ProxyCredential, UserBot};
use crate::proxy::PROXY_CHECK_URL;
use crate::session::{
    PeerRef, SessionClient, SessionConfig, SessionConnector, SessionError, SessionFuture,
    WebViewRequest, WebViewResult,
};

/// Web-view redirect URL carrying signed launch data for `username`.
pub fn launch_url(query_id: &str, user_id: i64, username: &str) -> String {
    let user = json!({
        "id": user_id,
        "first_name": username,
        "username": username,
        "language_code": "en",
        "allows_write_to_pm": true,
        "added_to_attachment_menu": false,
    })
    .to_string();
    let init_data = format!(
        "query_id={query_id}&user={}&auth_date=1700000000&hash=5f1c0e",
        form_urlencoded::byte_serialize(user.as_bytes()).collect::<String>()
    );
    format!(
        "https://app.example.com/#tgWebAppData={}&tgWebAppVersion=8.0&tgWebAppPlatform=web",
        form_urlencoded::byte_serialize(init_data.as_bytes()).collect::<String>()
    )
}

/// Well-formed user-bot routed through `ip:1080`.
pub fn user_bot(username: &str, ip: &str) -> UserBot {
    UserBot {
        username: username.to_string(),
        string_session: Secret::from("1BVtsOKABu0-session"),
        api_id: 2040,
        api_hash: Secret::from("b18441a1ff607e10a989891a5462e627"),
        proxy: ProxyCredential {
            ip: ip.to_string(),
            port: 1080,
            username: "proxy".into(),
            password: Secret::from("secret"),
        },
    }
}

/// A request as seen by `FakeTransport`.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<RequestBody>,
    pub proxy: Option<String>,
}

#[derive(Default)]
struct TransportState {
    exit_ips: HashMap<String, String>,
    failing_proxies: Vec<String>,
    routes: HashMap<String, VecDeque<requester::Result<serde_json::Value>>>,
    recorded: Vec<RecordedRequest>,
}

/// Scriptable transport.
///
/// The IP-echo URL echoes the proxy's own IP (unless overridden);
/// other URLs replay scripted responses, the last one repeating forever.
/// Unscripted URLs fail with a 404.
#[derive(Default)]
pub struct FakeTransport {
    state: Mutex<TransportState>,
    calls: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the IP check through `proxy_label` report `ip` instead.
    pub fn override_exit_ip(&self, proxy_label: &str, ip: &str) {
        let mut state = self.state.lock().unwrap();
        state.exit_ips.insert(proxy_label.to_string(), ip.to_string());
    }

    /// Every request through `proxy_label` fails at the transport level.
    pub fn fail_proxy(&self, proxy_label: &str) {
        self.state.lock().unwrap().failing_proxies.push(proxy_label.to_string());
    }

    /// Queue a response for `url`.
    pub fn respond(&self, url: &str, response: requester::Result<serde_json::Value>) {
        self.state
            .lock()
            .unwrap()
            .routes
            .entry(url.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests sent to `url`, oldest first.
    pub fn requests_to(&self, url: &str) -> Vec<RecordedRequest> {
        self.state
            .lock()
            .unwrap()
            .recorded
            .iter()
            .filter(|r| r.url == url)
            .cloned()
            .collect()
    }

    fn answer(&self, url: &str, request: &ApiRequest) -> requester::Result<serde_json::Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let label = request.proxy().map(|p| p.label().to_string());
        let mut state = self.state.lock().unwrap();
        state.recorded.push(RecordedRequest {
            url: url.to_string(),
            headers: request.header_map().clone(),
            body: request.payload().cloned(),
            proxy: label.clone(),
        });

        if let Some(label) = &label {
            if state.failing_proxies.contains(label) {
                return Err(requester::Error::Http(format!("proxy {label} unreachable")));
            }
        }

        if url == PROXY_CHECK_URL {
            let label = label.unwrap_or_default();
            let ip = state
                .exit_ips
                .get(&label)
                .cloned()
                .unwrap_or_else(|| label.split(':').next().unwrap_or_default().to_string());
            return Ok(json!({ "ip": ip }));
        }

        match state.routes.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => match queue.front() {
                Some(Ok(value)) => Ok(value.clone()),
                Some(Err(e)) => Err(requester::Error::Http(e.to_string())),
                None => Err(not_found(url)),
            },
            None => Err(not_found(url)),
        }
    }
}

fn not_found(url: &str) -> requester::Error {
    requester::Error::Status {
        status: 404,
        body: format!("no route for {url}"),
    }
}

impl Transport for FakeTransport {
    fn execute<'a>(&'a self, url: &'a str, request: &'a ApiRequest) -> TransportFuture<'a> {
        let outcome = self.answer(url, request);
        Box::pin(async move { outcome })
    }
}

#[derive(Clone)]
struct SessionBehaviour {
    authorized: bool,
    fail_connect: bool,
    redirect_url: Option<String>,
}

impl Default for SessionBehaviour {
    fn default() -> Self {
        Self {
            authorized: true,
            fail_connect: false,
            redirect_url: None,
        }
    }
}

/// Connector whose sessions are authorized and return valid launch data
/// unless told otherwise.
#[derive(Default)]
pub struct FakeConnector {
    behaviour: Mutex<HashMap<String, SessionBehaviour>>,
    opened: Mutex<Vec<SessionConfig>>,
    web_views: Arc<Mutex<HashMap<String, usize>>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn unauthorized(&self, username: &str) {
        self.behaviour
            .lock()
            .unwrap()
            .entry(username.to_string())
            .or_default()
            .authorized = false;
    }

    pub fn fail_connect(&self, username: &str) {
        self.behaviour
            .lock()
            .unwrap()
            .entry(username.to_string())
            .or_default()
            .fail_connect = true;
    }

    pub fn redirect_to(&self, username: &str, url: &str) {
        self.behaviour
            .lock()
            .unwrap()
            .entry(username.to_string())
            .or_default()
            .redirect_url = Some(url.to_string());
    }

    /// Session configs passed to `open`, in call order.
    pub fn opened(&self) -> Vec<SessionConfig> {
        self.opened.lock().unwrap().clone()
    }

    pub fn web_view_calls(&self, username: &str) -> usize {
        self.web_views
            .lock()
            .unwrap()
            .get(username)
            .copied()
            .unwrap_or(0)
    }
}

impl SessionConnector for FakeConnector {
    fn open(&self, config: SessionConfig) -> Result<Arc<dyn SessionClient>, SessionError> {
        let behaviour = self
            .behaviour
            .lock()
            .unwrap()
            .get(&config.username)
            .cloned()
            .unwrap_or_default();
        let username = config.username.clone();
        self.opened.lock().unwrap().push(config);
        Ok(Arc::new(FakeSession {
            username,
            behaviour,
            web_views: self.web_views.clone(),
        }))
    }
}

struct FakeSession {
    username: String,
    behaviour: SessionBehaviour,
    web_views: Arc<Mutex<HashMap<String, usize>>>,
}

impl SessionClient for FakeSession {
    fn connect(&self) -> SessionFuture<'_, ()> {
        let result = if self.behaviour.fail_connect {
            Err(SessionError("connection refused by data center".into()))
        } else {
            Ok(())
        };
        Box::pin(async move { result })
    }

    fn is_authorized(&self) -> SessionFuture<'_, bool> {
        let authorized = self.behaviour.authorized;
        Box::pin(async move { Ok(authorized) })
    }

    fn resolve_entity<'a>(&'a self, name: &'a str) -> SessionFuture<'a, PeerRef> {
        Box::pin(async move {
            Ok(PeerRef {
                id: 7_000_000_001,
                access_hash: -42,
                username: name.to_string(),
            })
        })
    }

    fn request_web_view(&self, request: WebViewRequest) -> SessionFuture<'_, WebViewResult> {
        *self
            .web_views
            .lock()
            .unwrap()
            .entry(self.username.clone())
            .or_default() += 1;
        let url = self.behaviour.redirect_url.clone().unwrap_or_else(|| {
            launch_url(
                &format!("AAE-{}", self.username),
                self.username.len() as i64,
                &self.username,
            )
        });
        Box::pin(async move {
            if request.platform != "web" {
                return Err(SessionError(format!("unexpected platform {}", request.platform)));
            }
            Ok(WebViewResult { url })
        })
    }
}

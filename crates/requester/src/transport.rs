//! reqwest-backed transport

use std::time::Duration;

use tracing::trace;

use crate::error::{Error, Result};
use crate::request::ApiRequest;
use crate::{Transport, TransportFuture};

/// Sends requests with reqwest.
///
/// Requests carrying a `ProxyHandle` use the handle's client; others use the
/// transport's direct client.
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(format!("building direct client: {e}")))?;
        Ok(Self { client, timeout })
    }

    async fn send(&self, url: &str, request: &ApiRequest) -> Result<serde_json::Value> {
        let client = request
            .proxy()
            .map(|proxy| proxy.client())
            .unwrap_or(&self.client);

        let mut builder = client
            .request(request.method().clone(), url)
            .headers(request.header_map().clone())
            .timeout(self.timeout);
        if let Some(body) = request.payload() {
            builder = builder.body(body.to_bytes()?);
        }

        trace!(
            url,
            method = %request.method(),
            proxy = request.proxy().map(|p| p.label()),
            "sending request"
        );

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Http(format!("{e}")))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Http(format!("reading response body: {e}")))?;

        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        serde_json::from_slice(&bytes).map_err(|e| Error::Decode(e.to_string()))
    }
}

impl Transport for ReqwestTransport {
    fn execute<'a>(&'a self, url: &'a str, request: &'a ApiRequest) -> TransportFuture<'a> {
        Box::pin(self.send(url, request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve exactly one canned HTTP response on a random local port.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "{status_line}\r\ncontent-type: application/json\r\n\
                 content-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn parses_json_body_on_success() {
        let url = serve_once("HTTP/1.1 200 OK", r#"{"ip":"203.0.113.7"}"#).await;
        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        let value = transport.execute(&url, &ApiRequest::get()).await.unwrap();
        assert_eq!(value, json!({"ip": "203.0.113.7"}));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let url = serve_once("HTTP/1.1 401 Unauthorized", r#"{"error":"expired"}"#).await;
        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        let err = transport
            .execute(&url, &ApiRequest::get())
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(401));
    }

    #[tokio::test]
    async fn non_json_body_is_an_error() {
        let url = serve_once("HTTP/1.1 200 OK", "<html>captcha</html>").await;
        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        let err = transport
            .execute(&url, &ApiRequest::get())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Decode(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn connection_refused_is_http_error() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let transport = ReqwestTransport::new(Duration::from_secs(2)).unwrap();
        let url = format!("http://127.0.0.1:{port}/");
        let err = transport
            .execute(&url, &ApiRequest::get())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Http(_)), "got: {err:?}");
    }
}

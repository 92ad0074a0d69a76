//! Backend request plumbing.
//!
//! `Transport` is the seam between the session manager and the network.
//! The manager only ever sees `ApiRequest`/`ApiResponse`, so tests can
//! script the backend without a socket.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use rootcause::Report;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::error::TransportError;

/// HTTP method of a backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

/// A backend call, relative to the API base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    method: Method,
    path: String,
    body: Option<Value>,
    authorization: Option<String>,
}

impl ApiRequest {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            authorization: None,
        }
    }

    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    #[must_use]
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn method(&self) -> Method {
        self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// The `Authorization` header value, if one is attached.
    #[must_use]
    pub fn authorization(&self) -> Option<&str> {
        self.authorization.as_deref()
    }

    pub fn set_authorization(&mut self, value: String) {
        self.authorization = Some(value);
    }

    pub fn clear_authorization(&mut self) {
        self.authorization = None;
    }
}

/// A backend answer. Non-2xx statuses are responses, not errors.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    #[must_use]
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    /// The backend's `detail` message, when it sent one.
    #[must_use]
    pub fn detail(&self) -> Option<String> {
        match &self.body {
            Value::Object(map) => map.get("detail").and_then(Value::as_str).map(str::to_string),
            Value::String(text) if !text.is_empty() => Some(text.clone()),
            _ => None,
        }
    }
}

/// Executes backend calls.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends the request and returns whatever status the backend answered.
    ///
    /// # Errors
    ///
    /// Returns an error only if no response was obtained.
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, Report<TransportError>>;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Creates a transport rooted at `base_url` (e.g. `https://rava.example.edu/api`).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, Report<TransportError>> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::InvalidRequest {
                details: e.to_string(),
            })?;
        Ok(Self::with_client(client, base_url))
    }

    /// Wraps an already configured client (custom roots, proxy rules).
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, request), fields(method = ?request.method(), path = %request.path()))]
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, Report<TransportError>> {
        let mut builder = self
            .client
            .request(request.method().as_reqwest(), self.url_for(request.path()))
            .header(CONTENT_TYPE, "application/json");

        if let Some(value) = request.authorization() {
            builder = builder.header(AUTHORIZATION, value);
        }
        if let Some(body) = request.body() {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout {
                    path: request.path().to_string(),
                }
            } else {
                TransportError::ConnectionFailed {
                    details: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::ConnectionFailed {
                details: e.to_string(),
            })?;

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            match serde_json::from_str(&text) {
                Ok(value) => value,
                // Error pages from proxies are often HTML; keep them as text.
                Err(_) if !(200..300).contains(&status) => Value::String(text),
                Err(e) => {
                    return Err(TransportError::InvalidBody {
                        details: e.to_string(),
                    }
                    .into());
                }
            }
        };

        debug!(status, "backend responded");
        Ok(ApiResponse::new(status, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn request_builders() {
        let mut request = ApiRequest::post("/token/", json!({"username": "alice"}));
        assert_eq!(request.method(), Method::Post);
        assert_eq!(request.path(), "/token/");
        assert_eq!(request.body(), Some(&json!({"username": "alice"})));
        assert!(request.authorization().is_none());

        request.set_authorization("Bearer abc".to_string());
        assert_eq!(request.authorization(), Some("Bearer abc"));
        request.clear_authorization();
        assert!(request.authorization().is_none());
    }

    #[test]
    fn response_detail_extraction() {
        let response = ApiResponse::new(403, json!({"detail": "Developer privileges required."}));
        assert_eq!(
            response.detail().as_deref(),
            Some("Developer privileges required.")
        );
        assert!(!response.is_success());

        let response = ApiResponse::new(502, Value::String("<html>bad gateway</html>".into()));
        assert!(response.detail().is_some());

        assert_eq!(ApiResponse::new(204, Value::Null).detail(), None);
        assert!(ApiResponse::new(401, Value::Null).is_unauthorized());
    }

    #[test]
    fn url_joining() {
        let transport =
            HttpTransport::new("http://localhost:8000/api/", Duration::from_secs(1)).expect("client");
        assert_eq!(transport.base_url(), "http://localhost:8000/api");
        assert_eq!(
            transport.url_for("/users/me/"),
            "http://localhost:8000/api/users/me/"
        );
        assert_eq!(
            transport.url_for("token/"),
            "http://localhost:8000/api/token/"
        );
    }

    /// Serves one canned HTTP response on a local port and hands back the
    /// raw request it received.
    async fn serve_once(response: String) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let request = read_request(&mut socket).await;
            socket.write_all(response.as_bytes()).await.expect("write");
            let _ = socket.shutdown().await;
            request
        });
        (format!("http://{addr}/api"), handle)
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.expect("read");
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn http_response(status: &str, content_type: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    fn local_transport(base_url: &str, timeout: Duration) -> HttpTransport {
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .expect("client");
        HttpTransport::with_client(client, base_url)
    }

    fn transport(base_url: &str) -> HttpTransport {
        local_transport(base_url, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn sends_bearer_and_json_body() {
        let (base_url, server) =
            serve_once(http_response("200 OK", "application/json", r#"{"access":"a1"}"#)).await;
        let mut request = ApiRequest::post("/token/refresh/", json!({"refresh": "r1"}));
        request.set_authorization("Bearer t0".to_string());

        let response = transport(&base_url).execute(&request).await.expect("execute");

        assert_eq!(response.status, 200);
        assert_eq!(response.body, json!({"access": "a1"}));
        let raw = server.await.expect("server").to_lowercase();
        assert!(raw.starts_with("post /api/token/refresh/ http/1.1"));
        assert!(raw.contains("authorization: bearer t0"));
        assert!(raw.contains("content-type: application/json"));
        assert!(raw.ends_with(r#"{"refresh":"r1"}"#));
    }

    #[tokio::test]
    async fn omits_authorization_when_unset() {
        let (base_url, server) = serve_once(http_response("200 OK", "application/json", "[]")).await;

        transport(&base_url)
            .execute(&ApiRequest::get("/protocols/"))
            .await
            .expect("execute");

        let raw = server.await.expect("server").to_lowercase();
        assert!(raw.starts_with("get /api/protocols/ http/1.1"));
        assert!(!raw.contains("authorization:"));
    }

    #[tokio::test]
    async fn empty_body_is_null() {
        let (base_url, _server) = serve_once(http_response("204 No Content", "text/plain", "")).await;

        let response = transport(&base_url)
            .execute(&ApiRequest::get("/protocols/1/"))
            .await
            .expect("execute");

        assert_eq!(response.status, 204);
        assert_eq!(response.body, Value::Null);
    }

    #[tokio::test]
    async fn error_page_is_kept_as_text() {
        let (base_url, _server) = serve_once(http_response(
            "502 Bad Gateway",
            "text/html",
            "<html>bad gateway</html>",
        ))
        .await;

        let response = transport(&base_url)
            .execute(&ApiRequest::get("/protocols/"))
            .await
            .expect("execute");

        assert_eq!(response.status, 502);
        assert_eq!(
            response.body,
            Value::String("<html>bad gateway</html>".to_string())
        );
    }

    #[tokio::test]
    async fn success_with_non_json_body_is_invalid() {
        let (base_url, _server) = serve_once(http_response("200 OK", "text/html", "<html/>")).await;

        let err = transport(&base_url)
            .execute(&ApiRequest::get("/users/me/"))
            .await
            .unwrap_err();

        assert!(matches!(
            err.current_context(),
            TransportError::InvalidBody { .. }
        ));
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let _server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let _ = read_request(&mut socket).await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        let transport = local_transport(&format!("http://{addr}/api"), Duration::from_millis(100));

        let err = transport
            .execute(&ApiRequest::get("/users/me/"))
            .await
            .unwrap_err();

        assert_eq!(
            err.current_context(),
            &TransportError::Timeout {
                path: "/users/me/".to_string()
            }
        );
    }

    #[tokio::test]
    async fn refused_connection_is_connection_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        drop(listener);

        let err = transport(&format!("http://{addr}/api"))
            .execute(&ApiRequest::get("/users/me/"))
            .await
            .unwrap_err();

        assert!(matches!(
            err.current_context(),
            TransportError::ConnectionFailed { .. }
        ));
    }
}

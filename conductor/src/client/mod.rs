//! Typed client for the controller's HTTP API.

pub mod sse;
pub mod transport;

use bytes::Bytes;
use http_body_util::{BodyStream, Full};
use hyper::header::{ACCEPT, CONTENT_TYPE};
use hyper::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;

pub use transport::{Deadline, Endpoint, Transport, TransportError};

/// Inner deadline for `GET /v1/ping`
pub const PING_TIMEOUT: Duration = Duration::from_secs(2);
/// Deadline for health and version fetches
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);
/// Deadline for generic API calls
pub const API_TIMEOUT: Duration = Duration::from_secs(30);

pub const EVENT_STREAM: &str = "text/event-stream";

/// Body chunks of a streaming response
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ClientError>> + Send>>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("controller is not running at {endpoint}")]
    ControllerNotRunning { endpoint: String },

    #[error("request to {endpoint} timed out after {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    #[error("not found: {message}")]
    NotFound { path: String, message: String },

    #[error("controller returned {status} for {path}: {message}")]
    Status {
        status: u16,
        path: String,
        message: String,
    },

    #[error("invalid response from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("stream from controller failed: {0}")]
    Stream(#[source] hyper::Error),

    #[error(transparent)]
    Transport(TransportError),
}

impl ClientError {
    /// True when nothing is listening on the endpoint; callers exit with 10
    pub fn is_controller_not_running(&self) -> bool {
        matches!(self, ClientError::ControllerNotRunning { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Timeout { .. })
    }
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::ControllerNotRunning { endpoint, .. } => {
                ClientError::ControllerNotRunning { endpoint }
            }
            TransportError::Timeout { endpoint, timeout } => {
                ClientError::Timeout { endpoint, timeout }
            }
            other => ClientError::Transport(other),
        }
    }
}

/// `GET /v1/health`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthReport {
    pub status: String,
    #[serde(default)]
    pub uptime: Value,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub checks: BTreeMap<String, Value>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        matches!(self.status.to_ascii_lowercase().as_str(), "ok" | "healthy")
    }
}

/// `GET /v1/version`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VersionInfo {
    pub version: String,
    pub commit: String,
    pub build_date: String,
    pub runtime_version: String,
    pub os: String,
    pub arch: String,
}

#[derive(Debug, Clone)]
pub struct DaemonClient {
    transport: Transport,
}

impl DaemonClient {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            transport: Transport::new(endpoint),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.transport.endpoint()
    }

    pub async fn ping(&self) -> Result<(), ClientError> {
        self.ping_with(Deadline::after(PING_TIMEOUT)).await
    }

    pub async fn ping_with(&self, deadline: Deadline) -> Result<(), ClientError> {
        self.call(Method::GET, "/v1/ping", None, deadline)
            .await
            .map(|_| ())
    }

    pub async fn health(&self) -> Result<HealthReport, ClientError> {
        let path = "/v1/health";
        let value = self
            .call(Method::GET, path, None, Deadline::after(HEALTH_TIMEOUT))
            .await?;
        decode(path, value)
    }

    pub async fn version(&self) -> Result<VersionInfo, ClientError> {
        let path = "/v1/version";
        let value = self
            .call(Method::GET, path, None, Deadline::after(HEALTH_TIMEOUT))
            .await?;
        decode(path, value)
    }

    pub async fn get(&self, path: &str) -> Result<Value, ClientError> {
        self.call(Method::GET, path, None, Deadline::after(API_TIMEOUT))
            .await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value, ClientError> {
        self.call(Method::POST, path, Some(body), Deadline::after(API_TIMEOUT))
            .await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ClientError> {
        self.call(Method::DELETE, path, None, Deadline::after(API_TIMEOUT))
            .await
            .map(|_| ())
    }

    /// Open a streaming GET; only the response head is bounded by a deadline
    pub async fn get_stream(&self, path: &str, accept: &str) -> Result<ByteStream, ClientError> {
        let deadline = Deadline::after(API_TIMEOUT);
        let request = self
            .transport
            .request(Method::GET, path)
            .header(ACCEPT, accept)
            .body(Full::new(Bytes::new()))
            .map_err(TransportError::from)?;

        let response = self.transport.send(request, &deadline).await?;
        if !response.status.is_success() {
            let bytes = self.transport.read_body(response.body, &deadline).await?;
            return Err(status_error(path, response.status, &bytes));
        }

        let chunks = BodyStream::new(response.body).filter_map(|frame| match frame {
            Ok(frame) => frame.into_data().ok().map(Ok),
            Err(e) => Some(Err(ClientError::Stream(e))),
        });
        Ok(Box::pin(chunks))
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        deadline: Deadline,
    ) -> Result<Value, ClientError> {
        let mut builder = self
            .transport
            .request(method, path)
            .header(ACCEPT, "application/json");
        let payload = match body {
            Some(body) => {
                builder = builder.header(CONTENT_TYPE, "application/json");
                Bytes::from(serde_json::to_vec(body).map_err(ClientError::Encode)?)
            }
            None => Bytes::new(),
        };
        let request = builder
            .body(Full::new(payload))
            .map_err(TransportError::from)?;

        let response = self.transport.send(request, &deadline).await?;
        let status = response.status;
        let bytes = self.transport.read_body(response.body, &deadline).await?;
        debug!(path, status = status.as_u16(), len = bytes.len(), "controller response");

        if !status.is_success() {
            return Err(status_error(path, status, &bytes));
        }
        if bytes.is_empty() || status == StatusCode::NO_CONTENT {
            return Ok(Value::Object(Map::new()));
        }
        serde_json::from_slice(&bytes).map_err(|source| ClientError::Decode {
            path: path.to_string(),
            source,
        })
    }
}

fn decode<T: serde::de::DeserializeOwned>(path: &str, value: Value) -> Result<T, ClientError> {
    serde_json::from_value(value).map_err(|source| ClientError::Decode {
        path: path.to_string(),
        source,
    })
}

/// Turn a non-2xx response into an error, preferring the daemon's own message
fn status_error(path: &str, status: StatusCode, body: &[u8]) -> ClientError {
    let message = error_message(body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    });
    if status == StatusCode::NOT_FOUND {
        return ClientError::NotFound {
            path: path.to_string(),
            message,
        };
    }
    ClientError::Status {
        status: status.as_u16(),
        path: path.to_string(),
        message,
    }
}

fn error_message(body: &[u8]) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(value) => {
            let field = value.get("error").or_else(|| value.get("message"))?;
            match field {
                Value::String(s) => Some(s.clone()),
                Value::Object(obj) => obj
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                other => Some(other.to_string()),
            }
        }
        Err(_) => Some(String::from_utf8_lossy(body).trim().to_string()),
    }
}

/// Append `key=value` pairs for every present value
pub fn path_with_query(path: &str, params: &[(&str, Option<&str>)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    let mut any = false;
    for (key, value) in params {
        if let Some(value) = value {
            serializer.append_pair(key, value);
            any = true;
        }
    }
    if any {
        format!("{}?{}", path, serializer.finish())
    } else {
        path.to_string()
    }
}

#[cfg(all(test, unix))]
pub(crate) mod test_support {
    //! A canned-response HTTP/1.1 server on a Unix socket.

    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixListener;
    use tokio::task::JoinHandle;

    pub struct CannedRoute {
        pub request_line: String,
        pub response: String,
    }

    pub fn json_response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    pub fn sse_response(body: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n{body}"
        )
    }

    pub struct FakeController {
        pub socket: PathBuf,
        pub requests: Arc<Mutex<Vec<String>>>,
        handle: JoinHandle<()>,
    }

    impl FakeController {
        /// Serve each route whose request line prefix matches; 404 otherwise
        pub fn spawn(socket: &Path, routes: Vec<CannedRoute>) -> Self {
            let listener = UnixListener::bind(socket).unwrap();
            let requests = Arc::new(Mutex::new(Vec::new()));
            let seen = requests.clone();
            let routes = Arc::new(routes);
            let handle = tokio::spawn(async move {
                loop {
                    let Ok((mut stream, _)) = listener.accept().await else {
                        break;
                    };
                    let routes = routes.clone();
                    let seen = seen.clone();
                    tokio::spawn(async move {
                        let mut buf = vec![0u8; 8192];
                        let mut read = 0;
                        loop {
                            let n = stream.read(&mut buf[read..]).await.unwrap_or(0);
                            if n == 0 {
                                break;
                            }
                            read += n;
                            if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                                break;
                            }
                        }
                        let head = String::from_utf8_lossy(&buf[..read]).to_string();
                        let request_line = head.lines().next().unwrap_or_default().to_string();
                        seen.lock().unwrap().push(head);
                        let response = routes
                            .iter()
                            .find(|r| request_line.starts_with(&r.request_line))
                            .map(|r| r.response.clone())
                            .unwrap_or_else(|| {
                                json_response("404 Not Found", r#"{"error":"no such route"}"#)
                            });
                        let _ = stream.write_all(response.as_bytes()).await;
                        let _ = stream.shutdown().await;
                    });
                }
            });
            Self {
                socket: socket.to_path_buf(),
                requests,
                handle,
            }
        }
    }

    impl Drop for FakeController {
        fn drop(&mut self) {
            self.handle.abort();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::test_support::*;
    use super::*;

    fn route(request_line: &str, response: String) -> CannedRoute {
        CannedRoute {
            request_line: request_line.to_string(),
            response,
        }
    }

    #[tokio::test]
    async fn test_ping_and_health() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("c.sock");
        let _server = FakeController::spawn(
            &socket,
            vec![
                route("GET /v1/ping", json_response("200 OK", "{}")),
                route(
                    "GET /v1/health",
                    json_response(
                        "200 OK",
                        r#"{"status":"healthy","uptime":"3m","timestamp":"2026-01-01T00:00:00Z","checks":{"storage":"ok"}}"#,
                    ),
                ),
            ],
        );

        let client = DaemonClient::new(Endpoint::Unix(socket));
        client.ping().await.unwrap();
        let health = client.health().await.unwrap();
        assert!(health.is_healthy());
        assert_eq!(health.checks["storage"], "ok");
    }

    #[tokio::test]
    async fn test_not_found_carries_daemon_message() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("c.sock");
        let _server = FakeController::spawn(
            &socket,
            vec![route(
                "GET /v1/runs/nope",
                json_response("404 Not Found", r#"{"error":"run nope not found"}"#),
            )],
        );

        let client = DaemonClient::new(Endpoint::Unix(socket));
        match client.get("/v1/runs/nope").await.unwrap_err() {
            ClientError::NotFound { message, .. } => assert_eq!(message, "run nope not found"),
            other => panic!("expected not found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delete_accepts_no_content_and_post_sends_json() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("c.sock");
        let server = FakeController::spawn(
            &socket,
            vec![
                route(
                    "DELETE /v1/runs/abc",
                    "HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n".to_string(),
                ),
                route(
                    "POST /v1/runs/abc/replay",
                    json_response("200 OK", r#"{"run_id":"def"}"#),
                ),
            ],
        );

        let client = DaemonClient::new(Endpoint::Unix(socket));
        client.delete("/v1/runs/abc").await.unwrap();
        let replay = client
            .post("/v1/runs/abc/replay", &serde_json::json!({"from_step": "s2"}))
            .await
            .unwrap();
        assert_eq!(replay["run_id"], "def");

        let requests = server.requests.lock().unwrap();
        let post = requests.iter().find(|r| r.starts_with("POST")).unwrap();
        assert!(post.to_ascii_lowercase().contains("content-type: application/json"));
        assert!(post.contains("host: localhost") || post.contains("Host: localhost"));
    }

    #[tokio::test]
    async fn test_stream_yields_body_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("c.sock");
        let _server = FakeController::spawn(
            &socket,
            vec![route(
                "GET /v1/events/stream",
                sse_response("data: {\"a\":1}\n\nevent: done\ndata: {}\n\n"),
            )],
        );

        let client = DaemonClient::new(Endpoint::Unix(socket));
        let mut stream = client
            .get_stream("/v1/events/stream", EVENT_STREAM)
            .await
            .unwrap();
        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk.unwrap());
        }
        assert!(String::from_utf8(body).unwrap().contains("event: done"));
    }

    #[test]
    fn test_path_with_query_skips_missing_values() {
        assert_eq!(path_with_query("/v1/runs", &[("status", None)]), "/v1/runs");
        assert_eq!(
            path_with_query(
                "/v1/runs",
                &[("status", Some("failed")), ("workflow", Some("daily report"))]
            ),
            "/v1/runs?status=failed&workflow=daily+report"
        );
    }

    #[test]
    fn test_error_message_prefers_error_field() {
        assert_eq!(
            error_message(br#"{"error":{"message":"boom"}}"#).as_deref(),
            Some("boom")
        );
        assert_eq!(error_message(b"plain failure\n").as_deref(), Some("plain failure"));
        assert_eq!(error_message(b""), None);
    }
}

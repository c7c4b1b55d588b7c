//! HTTP/1.1 transport to the controller over a Unix socket or TCP.
//!
//! Every exchange opens a fresh connection, performs the hyper handshake and
//! hands the response body back to the caller. Dial, handshake and header
//! read are bounded by a [`Deadline`].

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderMap, HOST};
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use std::fmt;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::{error::Elapsed, Instant};
use tracing::debug;

/// Host header sent over Unix sockets, where there is no real authority
const UNIX_HOST_PLACEHOLDER: &str = "localhost";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("controller is not running at {endpoint}")]
    ControllerNotRunning {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("timed out after {timeout:?} talking to {endpoint}")]
    Timeout { endpoint: String, timeout: Duration },

    #[error("failed to connect to {endpoint}: {source}")]
    Dial {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("HTTP exchange with {endpoint} failed: {source}")]
    Http {
        endpoint: String,
        #[source]
        source: hyper::Error,
    },

    #[error("invalid request: {0}")]
    Request(#[from] hyper::http::Error),

    #[error("invalid endpoint '{0}': expected unix:<path> or tcp:<host:port>")]
    InvalidEndpoint(String),

    #[error("unix sockets are not supported on this platform")]
    Unsupported,
}

/// Where the controller listens: `unix:<path>` or `tcp:<host:port>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp(String),
}

impl Endpoint {
    fn host_header(&self) -> String {
        match self {
            Endpoint::Unix(_) => UNIX_HOST_PLACEHOLDER.to_string(),
            Endpoint::Tcp(addr) => addr.clone(),
        }
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if let Some(path) = value.strip_prefix("unix:") {
            if !path.is_empty() {
                return Ok(Endpoint::Unix(PathBuf::from(path)));
            }
        } else if let Some(addr) = value.strip_prefix("tcp:") {
            if is_host_port(addr) {
                return Ok(Endpoint::Tcp(addr.to_string()));
            }
        }
        Err(TransportError::InvalidEndpoint(value.to_string()))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
            Endpoint::Tcp(addr) => write!(f, "tcp:{}", addr),
        }
    }
}

/// Check that `addr` looks like `host:port` with a numeric port
pub fn is_host_port(addr: &str) -> bool {
    match addr.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

/// Absolute point in time after which a request is abandoned
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    /// The total time this deadline was created with
    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Drive `future` until it completes or the deadline passes
    pub async fn run<F: Future>(&self, future: F) -> Result<F::Output, Elapsed> {
        tokio::time::timeout_at(self.at, future).await
    }
}

/// Status, headers and an unread body
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Incoming,
}

#[derive(Debug, Clone)]
pub struct Transport {
    endpoint: Endpoint,
}

impl Transport {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Start a request for `path_and_query` with the right Host header
    pub fn request(&self, method: Method, path_and_query: &str) -> hyper::http::request::Builder {
        Request::builder()
            .method(method)
            .uri(path_and_query)
            .header(HOST, self.endpoint.host_header())
    }

    /// Dial the endpoint, send `request` and wait for the response head
    pub async fn send(
        &self,
        request: Request<Full<Bytes>>,
        deadline: &Deadline,
    ) -> Result<Response, TransportError> {
        let endpoint = self.endpoint.to_string();
        debug!(%endpoint, method = %request.method(), uri = %request.uri(), "sending request");

        let attempt = async {
            match &self.endpoint {
                #[cfg(unix)]
                Endpoint::Unix(path) => {
                    let stream = tokio::net::UnixStream::connect(path)
                        .await
                        .map_err(|e| classify_dial_error(&endpoint, e))?;
                    exchange(stream, request, &endpoint).await
                }
                #[cfg(not(unix))]
                Endpoint::Unix(_) => Err(TransportError::Unsupported),
                Endpoint::Tcp(addr) => {
                    let stream = TcpStream::connect(addr.as_str())
                        .await
                        .map_err(|e| classify_dial_error(&endpoint, e))?;
                    exchange(stream, request, &endpoint).await
                }
            }
        };

        match deadline.run(attempt).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                endpoint: endpoint.clone(),
                timeout: deadline.budget(),
            }),
        }
    }

    /// Read a whole response body within the deadline
    pub async fn read_body(
        &self,
        body: Incoming,
        deadline: &Deadline,
    ) -> Result<Bytes, TransportError> {
        let endpoint = self.endpoint.to_string();
        match deadline.run(body.collect()).await {
            Ok(Ok(collected)) => Ok(collected.to_bytes()),
            Ok(Err(source)) => Err(TransportError::Http { endpoint, source }),
            Err(_) => Err(TransportError::Timeout {
                endpoint,
                timeout: deadline.budget(),
            }),
        }
    }
}

async fn exchange<S>(
    stream: S,
    request: Request<Full<Bytes>>,
    endpoint: &str,
) -> Result<Response, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let http_error = |source| TransportError::Http {
        endpoint: endpoint.to_string(),
        source,
    };

    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(http_error)?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("controller connection closed: {e}");
        }
    });

    let response = sender.send_request(request).await.map_err(http_error)?;
    let (parts, body) = response.into_parts();
    Ok(Response {
        status: parts.status,
        headers: parts.headers,
        body,
    })
}

/// Refused connections and missing socket files mean nobody is listening
fn classify_dial_error(endpoint: &str, source: io::Error) -> TransportError {
    match source.kind() {
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => {
            TransportError::ControllerNotRunning {
                endpoint: endpoint.to_string(),
                source,
            }
        }
        _ => TransportError::Dial {
            endpoint: endpoint.to_string(),
            source,
        },
    }
}

//! Requests, responses and the transport that carries them
use crate::batch::BatchExecutor;
use crate::context;
use futures_util::future::BoxFuture;
use std::borrow::Cow;
use std::time::Duration;
use thiserror::Error;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};
use volley_core::Tags;

pub use reqwest::Method;

/// Failure to obtain a response. Never fatal to the run.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RequestError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("no response within {}", humantime::format_duration(*.0))]
    Timeout(Duration),

    #[error("invalid request: {0}")]
    Request(String),

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for RequestError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            RequestError::Connect(err.to_string())
        } else if err.is_builder() {
            RequestError::Request(err.to_string())
        } else if err.is_body() || err.is_decode() {
            RequestError::Body(err.to_string())
        } else {
            RequestError::Other(err.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    /// Value of the `name` tag; defaults to the URL
    pub name: Option<String>,
    /// Overrides the run's request timeout
    pub timeout: Option<Duration>,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: vec![],
            body: None,
            name: None,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self::new(Method::POST, url).body(body)
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name_tag(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.url)
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub method: Method,
    pub url: String,
    pub name: String,
    /// `0` when no response was received
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub duration: Duration,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub error: Option<RequestError>,
}

impl Response {
    /// An empty response for `request`, to be filled in by a transport.
    pub fn for_request(request: &Request) -> Self {
        Self {
            method: request.method.clone(),
            url: request.url.clone(),
            name: request.name_tag().to_string(),
            status: 0,
            headers: vec![],
            body: vec![],
            duration: Duration::ZERO,
            bytes_sent: 0,
            bytes_received: 0,
            error: None,
        }
    }

    pub fn with_error(mut self, error: RequestError) -> Self {
        self.status = 0;
        self.error = Some(error);
        self
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// A response was received with a status in `200..=399`.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && (200..400).contains(&self.status)
    }

    /// Tags attached to every request sample.
    pub fn tags(&self) -> Tags {
        let mut tags = Tags::new();
        tags.insert("method".to_string(), self.method.to_string());
        tags.insert("name".to_string(), self.name.clone());
        tags.insert("status".to_string(), self.status.to_string());
        tags
    }
}

/// Sends a single request. Implementations must be cheap to share between virtual users.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, request: Request) -> BoxFuture<'_, Result<Response, RequestError>>;
}

/// [`Transport`] over a shared `reqwest` client.
#[derive(Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: Request) -> BoxFuture<'_, Result<Response, RequestError>> {
        Box::pin(async move {
            let mut builder = self
                .client
                .request(request.method.clone(), request.url.as_str());
            for (key, value) in &request.headers {
                builder = builder.header(key.as_str(), value.as_str());
            }

            let bytes_sent = request.body.as_ref().map_or(0, |b| b.len() as u64);
            if let Some(body) = &request.body {
                builder = builder.body(body.clone());
            }

            let res = builder.send().await?;
            let status = res.status().as_u16();
            let headers = res
                .headers()
                .iter()
                .map(|(k, v)| {
                    (
                        k.to_string(),
                        String::from_utf8_lossy(v.as_bytes()).into_owned(),
                    )
                })
                .collect();
            let body = res
                .bytes()
                .await
                .map_err(|e| RequestError::Body(e.to_string()))?;

            Ok(Response {
                status,
                headers,
                bytes_sent,
                bytes_received: body.len() as u64,
                body: body.to_vec(),
                ..Response::for_request(&request)
            })
        })
    }
}

/// Issue `requests` concurrently from the current virtual user and wait for all of them.
///
/// Responses are returned in submission order, one per request.
pub async fn batch(requests: Vec<Request>) -> Vec<Response> {
    match context::current() {
        Some(vu) => vu.run.executor().execute(requests).await,
        None => {
            warn!("http::batch called outside of a scenario, metrics are discarded");
            BatchExecutor::standalone().execute(requests).await
        }
    }
}

/// Issue a single request from the current virtual user.
pub async fn request(request: Request) -> Response {
    match context::current() {
        Some(vu) => vu.run.executor().execute_one(request).await,
        None => {
            warn!("http::request called outside of a scenario, metrics are discarded");
            BatchExecutor::standalone().execute_one(request).await
        }
    }
}

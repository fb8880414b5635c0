//! Network access shared by the intermediary and the forecast agent
//!
//! Requests and responses are plain owned values so they can be captured into
//! snapshots and replayed without holding on to any transport state. The
//! [`Network`] trait is the seam the intermediary forwards through; production
//! code uses [`HttpNetwork`], tests script their own implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

use crate::store::RequestKey;

/// Errors raised when a request cannot be answered by the network at all
///
/// A non-2xx status is not an error here: it is a normal [`Response`] and is
/// passed through untouched.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// No connectivity, DNS failure, timeout, or the body could not be read
    #[error("network unreachable for {url}: {reason}")]
    Unreachable { url: String, reason: String },

    /// The HTTP client could not be constructed
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// An outgoing resource request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub url: Url,
}

impl Request {
    /// Creates a GET request for the given locator
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
        }
    }

    /// Resolves a manifest-style locator against an origin
    ///
    /// Absolute locators are kept as they are, relative ones (`/`, `/a.css`)
    /// are joined onto `origin`.
    pub fn resolve(origin: &Url, locator: &str) -> Result<Url, url::ParseError> {
        origin.join(locator)
    }

    /// The normalized key this request is stored under
    pub fn key(&self) -> RequestKey {
        RequestKey::new(&self.method, &self.url)
    }
}

/// A response as delivered to the requesting page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Locator the response answers
    pub url: Url,
    /// HTTP status code
    pub status: u16,
    /// Response headers in arrival order
    pub headers: Vec<(String, String)>,
    /// Raw body bytes
    pub body: Vec<u8>,
}

impl Response {
    /// Whether the status is in the 2xx range
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Parses the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Something that can answer requests from the real network
#[async_trait]
pub trait Network: Send + Sync {
    /// Performs the request and returns whatever comes back
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

/// [`Network`] backed by a reqwest client
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    client: Client,
}

impl HttpNetwork {
    /// Creates a client with the given user agent and per-request timeout
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, NetworkError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(NetworkError::Client)?;
        Ok(Self { client })
    }

    /// Creates a network with a custom HTTP client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        let unreachable = |e: reqwest::Error| NetworkError::Unreachable {
            url: request.url.to_string(),
            reason: e.to_string(),
        };

        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .send()
            .await
            .map_err(unreachable)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(unreachable)?.to_vec();

        tracing::debug!(url = %request.url, status, bytes = body.len(), "network response");

        Ok(Response {
            url: request.url.clone(),
            status,
            headers,
            body,
        })
    }
}

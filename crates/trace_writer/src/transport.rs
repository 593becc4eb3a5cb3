//! Publish transport collaborator.
//!
//! The writer describes each outbound call as a [`TransportRequest`] and
//! hands it to a [`Transport`]. The transport owns everything below the
//! request description: connection management, TLS, credentials,
//! timeouts. It reports back a status code or an error and nothing else —
//! retry policy is deliberately not its concern, nor the writer's.
//!
//! Uses native async signatures with an object-safe [`TransportBoxed`]
//! twin for dynamic dispatch, like the metadata collaborator.

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Description of one outbound call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    /// HTTP method.
    pub method: String,
    /// Absolute request URI.
    pub uri: String,
    /// Request body.
    pub body: String,
    /// Request headers as (name, value) pairs.
    pub headers: Vec<(String, String)>,
}

/// Error types for transport calls.
#[derive(Debug, Error, Clone)]
pub enum TransportError {
    /// The request could not be constructed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The call failed below the HTTP layer.
    #[error("network error: {0}")]
    Network(String),
}

/// Trait for sending publish requests to the collection endpoint.
pub trait Transport: Send + Sync {
    /// Sends one request, returning the response status code.
    fn send(
        &self,
        request: TransportRequest,
    ) -> impl Future<Output = Result<u16, TransportError>> + Send;

    /// Returns the transport name for debugging.
    fn name(&self) -> &str;
}

/// Object-safe version of [`Transport`] for dynamic dispatch.
pub trait TransportBoxed: Send + Sync {
    /// Boxed-future version of [`Transport::send`].
    fn send_boxed(
        &self,
        request: TransportRequest,
    ) -> Pin<Box<dyn Future<Output = Result<u16, TransportError>> + Send + '_>>;

    /// Returns the transport name for debugging.
    fn name(&self) -> &str;
}

/// Blanket implementation: any Transport can be used boxed.
impl<T: Transport> TransportBoxed for T {
    fn send_boxed(
        &self,
        request: TransportRequest,
    ) -> Pin<Box<dyn Future<Output = Result<u16, TransportError>> + Send + '_>> {
        Box::pin(self.send(request))
    }

    fn name(&self) -> &str {
        Transport::name(self)
    }
}

/// HTTP transport backed by a shared reqwest client.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport with a default client.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Creates a transport over a caller-configured client (proxies,
    /// custom TLS, credential-injecting middleware).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<u16, TransportError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|error| TransportError::InvalidRequest(error.to_string()))?;

        let mut builder = self.client.request(method, &request.uri).body(request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|error| TransportError::Network(error.to_string()))?;
        Ok(response.status().as_u16())
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Null transport that accepts every request (for benchmarking and the
/// demo binary).
pub struct NullTransport;

impl NullTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NullTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for NullTransport {
    async fn send(&self, _request: TransportRequest) -> Result<u16, TransportError> {
        Ok(200)
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Test transport that records every request for verification.
#[cfg(test)]
pub struct RecordingTransport {
    status: u16,
    requests: std::sync::Mutex<Vec<TransportRequest>>,
}

#[cfg(test)]
impl RecordingTransport {
    pub fn new() -> Self {
        Self::with_status(200)
    }

    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl Transport for RecordingTransport {
    async fn send(&self, request: TransportRequest) -> Result<u16, TransportError> {
        self.requests.lock().unwrap().push(request);
        Ok(self.status)
    }

    fn name(&self) -> &str {
        "recording"
    }
}

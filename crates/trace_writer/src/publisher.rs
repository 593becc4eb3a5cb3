//! Batch publication.
//!
//! [`Publisher`] turns a drained buffer into the single wire payload
//! `{"traces":[…]}` and issues exactly one transport call for it. The
//! outcome is logged — info on 2xx, error otherwise — and the batch is
//! gone either way: delivery is best effort, traces are a diagnostic
//! signal, not a system of record.

use crate::transport::{TransportBoxed, TransportError, TransportRequest};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

/// Error types for a publish attempt. Never propagated to span writers;
/// recorded in metrics and logs only.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The endpoint answered outside the 2xx range.
    #[error("collection endpoint returned status {0}")]
    Status(u16),
    /// The transport could not complete the call.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Publishes trace batches to the collection endpoint.
pub struct Publisher {
    transport: Arc<dyn TransportBoxed>,
    endpoint: String,
}

impl Publisher {
    /// Creates a publisher for the given endpoint base URI.
    pub fn new(transport: Arc<dyn TransportBoxed>, endpoint: impl Into<String>) -> Self {
        let mut endpoint = endpoint.into();
        while endpoint.ends_with('/') {
            endpoint.pop();
        }
        Self {
            transport,
            endpoint,
        }
    }

    /// Sends one batch of already-serialized traces as a single payload.
    ///
    /// Exactly one outbound call per invocation, no internal retries. The
    /// batch is consumed regardless of the outcome.
    pub async fn publish(&self, project_id: &str, batch: Vec<String>) -> Result<u16, PublishError> {
        let count = batch.len();
        let body = format!("{{\"traces\":[{}]}}", batch.join(","));
        let request = TransportRequest {
            method: "POST".to_string(),
            uri: format!("{}/projects/{}/traces", self.endpoint, project_id),
            body,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
        };

        match self.transport.send_boxed(request).await {
            Ok(status) if (200..300).contains(&status) => {
                info!(traces = count, status, "published trace batch");
                Ok(status)
            }
            Ok(status) => {
                error!(traces = count, status, "trace publish rejected by collection endpoint");
                Err(PublishError::Status(status))
            }
            Err(err) => {
                error!(traces = count, error = %err, "trace publish failed");
                Err(PublishError::Transport(err))
            }
        }
    }
}

//! Metadata collaborator.
//!
//! The writer learns its environment (project id, host name, instance id)
//! from a [`MetadataClient`]. Project-id lookups may fail — that failure
//! is the one error the writer treats as fatal to initialization. Host
//! and instance lookups are best-effort: the label builder falls back to
//! local values when they are unavailable.
//!
//! The trait uses native async signatures (`impl Future` return types).
//! For dynamic dispatch, use [`MetadataClientBoxed`]; any `MetadataClient`
//! implements it via the blanket impl.

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Error types for metadata lookups.
#[derive(Debug, Error, Clone)]
pub enum MetadataError {
    /// The metadata service could not be reached.
    #[error("metadata service unreachable: {0}")]
    Unreachable(String),
    /// The requested attribute is not present in this environment.
    #[error("metadata attribute unavailable: {0}")]
    Unavailable(&'static str),
}

/// Async metadata collaborator.
pub trait MetadataClient: Send + Sync {
    /// Looks up the project/tenant identifier. May fail.
    fn project_id(&self) -> impl Future<Output = Result<String, MetadataError>> + Send;

    /// Looks up the host name of this instance.
    fn hostname(&self) -> impl Future<Output = Result<String, MetadataError>> + Send;

    /// Looks up the numeric instance id. `Ok(None)` means the environment
    /// has no instance id, which is not an error.
    fn instance_id(&self) -> impl Future<Output = Result<Option<u64>, MetadataError>> + Send;

    /// Returns the client name for debugging.
    fn name(&self) -> &str;
}

/// Object-safe version of [`MetadataClient`] for dynamic dispatch.
pub trait MetadataClientBoxed: Send + Sync {
    /// Boxed-future version of [`MetadataClient::project_id`].
    fn project_id_boxed(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<String, MetadataError>> + Send + '_>>;

    /// Boxed-future version of [`MetadataClient::hostname`].
    fn hostname_boxed(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<String, MetadataError>> + Send + '_>>;

    /// Boxed-future version of [`MetadataClient::instance_id`].
    fn instance_id_boxed(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<u64>, MetadataError>> + Send + '_>>;

    /// Returns the client name for debugging.
    fn name(&self) -> &str;
}

/// Blanket implementation: any MetadataClient can be used boxed.
impl<T: MetadataClient> MetadataClientBoxed for T {
    fn project_id_boxed(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<String, MetadataError>> + Send + '_>> {
        Box::pin(self.project_id())
    }

    fn hostname_boxed(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<String, MetadataError>> + Send + '_>> {
        Box::pin(self.hostname())
    }

    fn instance_id_boxed(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<u64>, MetadataError>> + Send + '_>> {
        Box::pin(self.instance_id())
    }

    fn name(&self) -> &str {
        MetadataClient::name(self)
    }
}

/// Fixed metadata for environments without a metadata service: explicit
/// deployments, the demo binary, and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticMetadata {
    /// Project id to report, if any.
    pub project_id: Option<String>,
    /// Host name to report, if any.
    pub hostname: Option<String>,
    /// Instance id to report, if any.
    pub instance_id: Option<u64>,
}

impl MetadataClient for StaticMetadata {
    async fn project_id(&self) -> Result<String, MetadataError> {
        self.project_id
            .clone()
            .ok_or(MetadataError::Unavailable("project-id"))
    }

    async fn hostname(&self) -> Result<String, MetadataError> {
        self.hostname
            .clone()
            .ok_or(MetadataError::Unavailable("hostname"))
    }

    async fn instance_id(&self) -> Result<Option<u64>, MetadataError> {
        Ok(self.instance_id)
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Best-effort local host name. Never fails to produce a value.
pub fn local_hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_metadata_reports_configured_values() {
        let metadata = StaticMetadata {
            project_id: Some("proj".to_string()),
            hostname: Some("host-1".to_string()),
            instance_id: Some(42),
        };
        assert_eq!(metadata.project_id().await.unwrap(), "proj");
        assert_eq!(metadata.hostname().await.unwrap(), "host-1");
        assert_eq!(metadata.instance_id().await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn missing_project_id_is_an_error_missing_instance_is_not() {
        let metadata = StaticMetadata::default();
        assert!(metadata.project_id().await.is_err());
        assert_eq!(metadata.instance_id().await.unwrap(), None);
    }

    #[tokio::test]
    async fn boxed_blanket_impl_dispatches() {
        let metadata: Box<dyn MetadataClientBoxed> = Box::new(StaticMetadata {
            project_id: Some("proj".to_string()),
            ..Default::default()
        });
        assert_eq!(metadata.project_id_boxed().await.unwrap(), "proj");
        assert_eq!(metadata.name(), "static");
    }

    #[test]
    fn local_hostname_always_yields_a_value() {
        assert!(!local_hostname().is_empty());
    }
}

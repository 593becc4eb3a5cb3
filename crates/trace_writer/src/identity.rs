//! Project identity resolution.
//!
//! The writer cannot label or route traces until it knows the
//! project/tenant id. [`IdentityResolver`] memoizes that lookup: an
//! explicitly configured id short-circuits without any external call,
//! otherwise the metadata collaborator is queried once and the answer is
//! cached for the life of the instance.

use crate::metadata::MetadataClientBoxed;
use thiserror::Error;
use tokio::sync::OnceCell;

/// Identity resolution failed; the writer stays inert.
#[derive(Debug, Error, Clone)]
pub enum IdentityError {
    /// No explicit id was configured and the metadata lookup failed.
    #[error("project id unavailable: {0}")]
    Unavailable(String),
}

/// Memoizing async project-id lookup.
pub struct IdentityResolver {
    configured: Option<String>,
    resolved: OnceCell<String>,
}

impl IdentityResolver {
    /// Creates a resolver, optionally seeded with an explicit id.
    pub fn new(configured: Option<String>) -> Self {
        Self {
            configured,
            resolved: OnceCell::new(),
        }
    }

    /// Resolves the project id, caching the first successful answer.
    ///
    /// Concurrent callers share one in-flight lookup; once an id has been
    /// obtained the metadata collaborator is never queried again.
    pub async fn resolve(
        &self,
        metadata: &dyn MetadataClientBoxed,
    ) -> Result<&str, IdentityError> {
        self.resolved
            .get_or_try_init(|| async {
                if let Some(id) = &self.configured {
                    return Ok(id.clone());
                }
                metadata
                    .project_id_boxed()
                    .await
                    .map_err(|error| IdentityError::Unavailable(error.to_string()))
            })
            .await
            .map(String::as_str)
    }

    /// Returns the resolved id without blocking, if resolution has
    /// completed.
    pub fn get(&self) -> Option<&str> {
        self.resolved.get().map(String::as_str)
    }
}

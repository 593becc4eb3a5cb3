//! Default span labels.
//!
//! Host/agent/service metadata auto-attached to server-kind spans. The
//! map is built exactly once during writer initialization and handed out
//! behind an `Arc` afterwards — nothing ever mutates it again. Label keys
//! are exported so instrumentation and tests can reference them.
//!
//! Host-name and instance-id metadata lookups run concurrently; either
//! may fail without failing label construction, which always produces a
//! complete map from local fallbacks.

use crate::config::Config;
use crate::metadata::{local_hostname, MetadataClientBoxed};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Agent identity (`name/version`).
pub const AGENT: &str = "trace.agent";
/// Host name of the emitting instance.
pub const HOSTNAME: &str = "trace.hostname";
/// Numeric instance id, when the environment provides one.
pub const INSTANCE_ID: &str = "trace.instance.id";
/// Deployed module (service) name.
pub const MODULE_NAME: &str = "trace.module.name";
/// Deployed module version.
pub const MODULE_VERSION: &str = "trace.module.version";
/// Composite `module:version.minor` version.
pub const VERSION: &str = "trace.version";

/// Module name whose prefix is omitted from the composite version label.
const DEFAULT_MODULE: &str = "default";

const AGENT_NAME: &str = env!("CARGO_PKG_NAME");
const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Builds the frozen default-label map.
///
/// Never fails: metadata lookups that error fall back to local values.
/// Runs both metadata queries concurrently and settles only once both
/// have.
pub async fn build_default_labels(
    config: &Config,
    metadata: &dyn MetadataClientBoxed,
) -> Arc<HashMap<String, String>> {
    let (host_result, instance_result) =
        tokio::join!(metadata.hostname_boxed(), metadata.instance_id_boxed());

    let hostname = match host_result {
        Ok(host) => host,
        Err(error) => {
            debug!(client = metadata.name(), %error, "hostname lookup failed, using local host name");
            local_hostname()
        }
    };

    let mut labels = HashMap::new();
    labels.insert(AGENT.to_string(), format!("{AGENT_NAME}/{AGENT_VERSION}"));
    labels.insert(HOSTNAME.to_string(), hostname.clone());

    match instance_result {
        Ok(Some(id)) => {
            labels.insert(INSTANCE_ID.to_string(), id.to_string());
        }
        Ok(None) => {}
        Err(error) => {
            debug!(client = metadata.name(), %error, "instance-id lookup failed, label omitted");
        }
    }

    let module_name = config
        .service_context
        .service
        .clone()
        .unwrap_or_else(|| hostname.clone());
    labels.insert(MODULE_NAME.to_string(), module_name.clone());

    if let Some(version) = &config.service_context.version {
        labels.insert(MODULE_VERSION.to_string(), version.clone());
        if let Some(minor) = &config.service_context.minor_version {
            let prefix = if module_name == DEFAULT_MODULE {
                String::new()
            } else {
                format!("{module_name}:")
            };
            labels.insert(VERSION.to_string(), format!("{prefix}{version}.{minor}"));
        }
    }

    Arc::new(labels)
}

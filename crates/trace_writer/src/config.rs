//! Writer configuration.
//!
//! [`Config`] is immutable for the lifetime of a writer instance. It
//! deserializes from camelCase keys so a JSON/TOML config file maps onto
//! it directly; every field has a default so partial configs work. The
//! `on_uncaught_exception` policy arrives as a string and is validated at
//! writer construction — an unrecognized value is fatal there.

use serde::Deserialize;
use std::str::FromStr;
use thiserror::Error;

/// Configuration errors surfaced synchronously at writer construction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The `onUncaughtException` option holds an unrecognized value.
    #[error("unrecognized onUncaughtException policy {0:?} (expected \"ignore\", \"flush\" or \"flushAndExit\")")]
    UnknownPolicy(String),
    /// The buffer-size threshold must be at least 1.
    #[error("bufferSize must be at least 1")]
    InvalidBufferSize,
    /// The flush interval must be at least 1 second.
    #[error("flushDelaySeconds must be at least 1")]
    InvalidFlushDelay,
}

/// What to do when an uncaught panic reaches the process-wide hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionPolicy {
    /// Leave panic handling alone.
    Ignore,
    /// Trigger an immediate flush, then let the panic proceed.
    Flush,
    /// Flush, wait a short grace period for the publish to leave the
    /// process, then exit.
    FlushAndExit,
}

impl FromStr for ExceptionPolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ignore" => Ok(Self::Ignore),
            "flush" => Ok(Self::Flush),
            "flushAndExit" => Ok(Self::FlushAndExit),
            other => Err(ConfigError::UnknownPolicy(other.to_string())),
        }
    }
}

/// Descriptors for the service emitting spans.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceContext {
    /// Deployed service (module) name.
    pub service: Option<String>,
    /// Deployed service version.
    pub version: Option<String>,
    /// Minor version, combined with `version` into a composite label.
    pub minor_version: Option<String>,
}

/// Trace writer configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Explicitly configured project id. When set, identity resolution
    /// needs no metadata lookup.
    pub project_id: Option<String>,
    /// Buffer length at which a flush is scheduled.
    pub buffer_size: usize,
    /// Seconds between periodic flush attempts.
    pub flush_delay_seconds: u64,
    /// Panic-hook policy: `"ignore"`, `"flush"` or `"flushAndExit"`.
    pub on_uncaught_exception: String,
    /// Service name/version descriptors folded into the default labels.
    pub service_context: ServiceContext,
    /// Stack-frame limit for instrumentation capturing call sites. The
    /// writer itself does not capture stacks; instrumentation reads this.
    pub stack_trace_limit: usize,
    /// Longest label value kept when decorating spans; 0 disables
    /// truncation.
    pub maximum_label_value_size: usize,
    /// Collection endpoint base URI.
    pub endpoint: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_id: None,
            buffer_size: 1000,
            flush_delay_seconds: 30,
            on_uncaught_exception: "ignore".to_string(),
            service_context: ServiceContext::default(),
            stack_trace_limit: 10,
            maximum_label_value_size: 512,
            endpoint: "http://localhost:4318".to_string(),
        }
    }
}

impl Config {
    /// Parses and validates the uncaught-exception policy.
    pub fn exception_policy(&self) -> Result<ExceptionPolicy, ConfigError> {
        self.on_uncaught_exception.parse()
    }

    /// Validates option combinations that cannot be represented by the
    /// scheduler, returning the parsed policy on success.
    pub fn validate(&self) -> Result<ExceptionPolicy, ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::InvalidBufferSize);
        }
        if self.flush_delay_seconds == 0 {
            return Err(ConfigError::InvalidFlushDelay);
        }
        self.exception_policy()
    }
}

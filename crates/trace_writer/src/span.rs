//! Trace and span data model.
//!
//! A [`Trace`] is one request/operation unit: an ordered sequence of
//! [`Span`]s sharing a trace id, stamped with the project id at enqueue
//! time. Timestamps are ISO-8601 strings; an empty `end_time` marks a span
//! that has not been closed yet. The serde wire form uses camelCase field
//! names, matching the collection endpoint's payload schema.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Span kind as understood by the collection endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpanKind {
    /// Server side of an RPC; receives the default labels on write.
    #[serde(rename = "RPC_SERVER")]
    RpcServer,
    /// Client side of an RPC.
    #[serde(rename = "RPC_CLIENT")]
    RpcClient,
    /// Anything else (internal work, unannotated spans).
    #[serde(rename = "SPAN_KIND_UNSPECIFIED")]
    Unspecified,
}

/// A timed segment of work with labels, identified by span id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    /// Span identifier, unique within the trace.
    pub span_id: String,
    /// Operation name.
    pub name: String,
    /// Span kind.
    pub kind: SpanKind,
    /// ISO-8601 start time.
    pub start_time: String,
    /// ISO-8601 end time; empty until the span is closed.
    pub end_time: String,
    /// Span labels. Insertion order is irrelevant.
    pub labels: HashMap<String, String>,
}

/// A set of related spans sharing a trace id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    /// Project/tenant identifier; empty until stamped at enqueue time.
    pub project_id: String,
    /// Trace identifier.
    pub trace_id: String,
    /// Ordered spans belonging to this trace.
    pub spans: Vec<Span>,
}

/// Current wall-clock time in the wire timestamp format.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl Span {
    /// Creates an open span starting now.
    pub fn new(span_id: impl Into<String>, name: impl Into<String>, kind: SpanKind) -> Self {
        Self {
            span_id: span_id.into(),
            name: name.into(),
            kind,
            start_time: now_timestamp(),
            end_time: String::new(),
            labels: HashMap::new(),
        }
    }

    /// Closes the span, stamping the end time.
    pub fn close(&mut self) {
        self.end_time = now_timestamp();
    }

    /// Whether the span has been closed.
    pub fn is_closed(&self) -> bool {
        !self.end_time.is_empty()
    }

    /// Sets a label on the span.
    pub fn set_label(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.labels.insert(key.into(), value.into());
    }
}

impl Trace {
    /// Creates an empty trace with no project id stamped yet.
    pub fn new(trace_id: impl Into<String>) -> Self {
        Self {
            project_id: String::new(),
            trace_id: trace_id.into(),
            spans: Vec::new(),
        }
    }

    /// Adds a span to the trace.
    pub fn add(&mut self, span: Span) {
        self.spans.push(span);
    }

    /// Returns the number of spans in the trace.
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    /// Returns true if the trace has no spans.
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use trace_writer::{
    labels, Config, ServiceContext, Span, SpanKind, StaticMetadata, Trace, TraceWriter, Transport,
    TransportError, TransportRequest,
};

/// What the recording transport answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Status(u16),
    NetworkError,
}

/// Transport double that records every publish request.
struct RecordingTransport {
    outcome: Mutex<Outcome>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl RecordingTransport {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(Outcome::Status(200)),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn set_outcome(&self, outcome: Outcome) {
        *self.outcome.lock().unwrap() = outcome;
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Traces carried by the n-th recorded publish payload.
    fn traces_in(&self, index: usize) -> Vec<serde_json::Value> {
        let requests = self.requests.lock().unwrap();
        let payload: serde_json::Value = serde_json::from_str(&requests[index].body).unwrap();
        payload["traces"].as_array().unwrap().clone()
    }
}

impl Transport for RecordingTransport {
    async fn send(&self, request: TransportRequest) -> Result<u16, TransportError> {
        self.requests.lock().unwrap().push(request);
        match *self.outcome.lock().unwrap() {
            Outcome::Status(status) => Ok(status),
            Outcome::NetworkError => Err(TransportError::Network("connection refused".to_string())),
        }
    }

    fn name(&self) -> &str {
        "recording"
    }
}

fn test_metadata() -> Arc<StaticMetadata> {
    Arc::new(StaticMetadata {
        project_id: Some("test-project".to_string()),
        hostname: Some("test-host".to_string()),
        instance_id: Some(7),
    })
}

fn writer_with(config: Config, transport: Arc<RecordingTransport>) -> TraceWriter {
    TraceWriter::new(config, test_metadata(), transport).unwrap()
}

fn server_trace(trace_id: &str) -> Trace {
    let mut trace = Trace::new(trace_id);
    let mut span = Span::new("1", "handle-request", SpanKind::RpcServer);
    span.set_label("http.method", "GET");
    trace.add(span);
    trace
}

/// Lets spawned scheduler/publish tasks run without reaching any timer
/// deadline.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn threshold_write_publishes_project_id_and_default_labels() {
    let transport = Arc::new(RecordingTransport::new());
    let config = Config {
        buffer_size: 1,
        service_context: ServiceContext {
            service: Some("web".to_string()),
            version: Some("3".to_string()),
            minor_version: Some("1".to_string()),
        },
        ..Default::default()
    };
    let writer = writer_with(config, transport.clone());
    writer.initialize().await.unwrap();
    settle().await;

    let mut trace = server_trace("t-1");
    // Caller-set default key must survive the merge.
    trace.spans[0].set_label(labels::HOSTNAME, "caller-host");
    let mut client_span = Span::new("2", "db.query", SpanKind::RpcClient);
    client_span.set_label("db.system", "postgresql");
    trace.add(client_span);
    writer.write_span(trace);
    settle().await;

    assert_eq!(transport.request_count(), 1);
    let traces = transport.traces_in(0);
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0]["projectId"], "test-project");
    assert_eq!(
        transport.requests()[0].uri,
        "http://localhost:4318/projects/test-project/traces"
    );

    let spans = traces[0]["spans"].as_array().unwrap();
    let server_labels = spans[0]["labels"].as_object().unwrap();
    assert!(server_labels.contains_key(labels::AGENT));
    assert_eq!(server_labels[labels::MODULE_NAME], "web");
    assert_eq!(server_labels[labels::MODULE_VERSION], "3");
    assert_eq!(server_labels[labels::VERSION], "web:3.1");
    assert_eq!(server_labels[labels::INSTANCE_ID], "7");
    // Caller wins on collision.
    assert_eq!(server_labels[labels::HOSTNAME], "caller-host");
    assert_eq!(server_labels["http.method"], "GET");

    // Non-server spans keep only their own labels.
    let client_labels = spans[1]["labels"].as_object().unwrap();
    assert!(!client_labels.contains_key(labels::AGENT));
    assert_eq!(client_labels["db.system"], "postgresql");
}

#[tokio::test(start_paused = true)]
async fn buffer_threshold_triggers_exactly_one_publish() {
    let transport = Arc::new(RecordingTransport::new());
    let config = Config {
        buffer_size: 5,
        ..Default::default()
    };
    let writer = writer_with(config, transport.clone());
    writer.initialize().await.unwrap();
    settle().await;

    for i in 0..4 {
        writer.write_span(server_trace(&format!("t-{i}")));
    }
    settle().await;
    assert_eq!(transport.request_count(), 0);

    writer.write_span(server_trace("t-4"));
    settle().await;
    assert_eq!(transport.request_count(), 1);
    assert_eq!(transport.traces_in(0).len(), 5);
    assert_eq!(writer.metrics().batches_published(), 1);
}

#[tokio::test(start_paused = true)]
async fn periodic_flush_fires_on_each_interval() {
    let transport = Arc::new(RecordingTransport::new());
    let config = Config {
        flush_delay_seconds: 1,
        ..Default::default()
    };
    let writer = writer_with(config, transport.clone());
    writer.initialize().await.unwrap();
    settle().await;

    writer.write_span(server_trace("t-1"));
    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(transport.request_count(), 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(transport.request_count(), 1);
    assert_eq!(transport.traces_in(0).len(), 1);

    writer.write_span(server_trace("t-2"));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(transport.request_count(), 2);
    assert_eq!(transport.traces_in(1).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn no_flush_after_stop() {
    let transport = Arc::new(RecordingTransport::new());
    let config = Config {
        buffer_size: 3,
        flush_delay_seconds: 1,
        ..Default::default()
    };
    let writer = writer_with(config, transport.clone());
    writer.initialize().await.unwrap();
    settle().await;

    writer.write_span(server_trace("t-1"));
    writer.stop();

    // Neither elapsed time nor buffer length flushes a stopped writer.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(transport.request_count(), 0);

    for i in 0..5 {
        writer.write_span(server_trace(&format!("late-{i}")));
    }
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(transport.request_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn identity_failure_makes_writer_inert() {
    let transport = Arc::new(RecordingTransport::new());
    let writer = TraceWriter::new(
        Config::default(),
        // No project id anywhere: resolution must fail.
        Arc::new(StaticMetadata {
            hostname: Some("test-host".to_string()),
            ..Default::default()
        }),
        transport.clone(),
    )
    .unwrap();

    writer.write_span(server_trace("before"));
    assert!(writer.initialize().await.is_err());
    writer.write_span(server_trace("after"));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.request_count(), 0);
    assert_eq!(writer.metrics().traces_written(), 0);
    assert_eq!(writer.metrics().traces_dropped(), 2);
    assert_eq!(writer.project_id(), None);
}

#[tokio::test(start_paused = true)]
async fn failed_publish_is_not_requeued() {
    let transport = Arc::new(RecordingTransport::new());
    transport.set_outcome(Outcome::NetworkError);
    let config = Config {
        buffer_size: 1,
        ..Default::default()
    };
    let writer = writer_with(config, transport.clone());
    writer.initialize().await.unwrap();
    settle().await;

    writer.write_span(server_trace("lost"));
    settle().await;
    assert_eq!(transport.request_count(), 1);
    assert_eq!(writer.metrics().publish_failures(), 1);
    assert_eq!(writer.metrics().batches_published(), 0);

    // The next publish carries only the new trace; the failed batch is
    // gone for good.
    transport.set_outcome(Outcome::Status(200));
    writer.write_span(server_trace("fresh"));
    settle().await;
    assert_eq!(transport.request_count(), 2);
    let traces = transport.traces_in(1);
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0]["traceId"], "fresh");
}

#[tokio::test(start_paused = true)]
async fn rejected_status_counts_as_failure() {
    let transport = Arc::new(RecordingTransport::new());
    transport.set_outcome(Outcome::Status(503));
    let config = Config {
        buffer_size: 1,
        ..Default::default()
    };
    let writer = writer_with(config, transport.clone());
    writer.initialize().await.unwrap();
    settle().await;

    writer.write_span(server_trace("t-1"));
    settle().await;
    assert_eq!(transport.request_count(), 1);
    assert_eq!(writer.metrics().publish_failures(), 1);
}

#[tokio::test(start_paused = true)]
async fn published_trace_round_trips() {
    let transport = Arc::new(RecordingTransport::new());
    let config = Config {
        buffer_size: 1,
        ..Default::default()
    };
    let writer = writer_with(config, transport.clone());
    writer.initialize().await.unwrap();
    settle().await;

    let mut trace = Trace::new("round-trip");
    let mut closed = Span::new("1", "outer", SpanKind::RpcServer);
    closed.close();
    trace.add(closed);
    // Left open on purpose: the writer must stamp the end time.
    trace.add(Span::new("2", "inner", SpanKind::Unspecified));
    writer.write_span(trace);
    settle().await;

    let published: Trace = serde_json::from_value(transport.traces_in(0)[0].clone()).unwrap();
    assert_eq!(published.trace_id, "round-trip");
    assert_eq!(published.project_id, "test-project");
    assert_eq!(published.spans.len(), 2);
    for span in &published.spans {
        assert!(span.is_closed(), "span {} has no end time", span.span_id);
    }
}

#[tokio::test(start_paused = true)]
async fn traces_deferred_during_initialization_are_published() {
    let transport = Arc::new(RecordingTransport::new());
    let writer = writer_with(Config::default(), transport.clone());

    // Written while identity is still unresolved.
    writer.write_span(server_trace("early"));
    assert_eq!(transport.request_count(), 0);

    writer.initialize().await.unwrap();
    settle().await;

    // The activation flush carries the deferred trace.
    assert_eq!(transport.request_count(), 1);
    let traces = transport.traces_in(0);
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0]["traceId"], "early");
    assert_eq!(traces[0]["projectId"], "test-project");
    let span_labels = traces[0]["spans"][0]["labels"].as_object().unwrap();
    assert!(span_labels.contains_key(labels::AGENT));
}

#[tokio::test(start_paused = true)]
async fn long_label_values_are_truncated() {
    let transport = Arc::new(RecordingTransport::new());
    let config = Config {
        buffer_size: 1,
        maximum_label_value_size: 8,
        ..Default::default()
    };
    let writer = writer_with(config, transport.clone());
    writer.initialize().await.unwrap();
    settle().await;

    let mut trace = Trace::new("t-1");
    let mut span = Span::new("1", "op", SpanKind::RpcClient);
    span.set_label("sql", "SELECT * FROM users WHERE id = 1");
    trace.add(span);
    writer.write_span(trace);
    settle().await;

    let traces = transport.traces_in(0);
    let spans = traces[0]["spans"].as_array().unwrap();
    assert_eq!(spans[0]["labels"]["sql"], "SELECT *");
}

#[tokio::test(start_paused = true)]
async fn default_labels_are_frozen_and_shared() {
    let transport = Arc::new(RecordingTransport::new());
    let writer = writer_with(Config::default(), transport.clone());
    writer.initialize().await.unwrap();

    let first = writer.default_labels().unwrap();
    let second = writer.default_labels().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    let expected: HashMap<String, String> = (*first).clone();
    assert_eq!(*second, expected);
    writer.stop();
}

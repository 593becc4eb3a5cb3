//! Trace writer orchestrator.
//!
//! [`TraceWriter`] owns the span buffer and wires the flush scheduler to
//! the publisher. Instrumentation hands finished traces to
//! [`TraceWriter::write_span`]; the writer stamps end times, merges the
//! default labels onto server-kind spans, stamps the resolved project id
//! and appends the serialized trace to the buffer. Three triggers
//! converge on the same flush routine: the periodic timer, the
//! buffer-size threshold and the process panic hook. A flush drains the
//! buffer in one synchronous swap and publishes the batch from a spawned
//! task, so producers are never blocked on network I/O.
//!
//! One writer instance per process is the expected convention; share it
//! behind an `Arc` wherever instrumentation needs to emit spans. Runtime
//! failures after a successful `initialize` are absorbed and logged —
//! they never reach `write_span` callers.

use crate::config::{Config, ConfigError, ExceptionPolicy};
use crate::identity::{IdentityError, IdentityResolver};
use crate::labels;
use crate::metadata::MetadataClientBoxed;
use crate::publisher::Publisher;
use crate::span::{now_timestamp, SpanKind, Trace};
use crate::transport::TransportBoxed;
use std::collections::HashMap;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Grace period before `flushAndExit` terminates the process, allowing
/// the in-flight publish to leave it.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Error types for writer lifecycle operations.
#[derive(Debug, Error)]
pub enum TraceWriterError {
    /// Identity resolution failed; the writer is inert.
    #[error(transparent)]
    Identity(#[from] IdentityError),
    /// The writer was stopped before initialization completed.
    #[error("trace writer already stopped")]
    Stopped,
}

/// Writer counters.
///
/// Statistical only — no control flow depends on them, so `Relaxed`
/// ordering is sufficient.
#[derive(Debug, Default)]
pub struct WriterMetrics {
    traces_written: AtomicU64,
    traces_dropped: AtomicU64,
    batches_published: AtomicU64,
    publish_failures: AtomicU64,
}

impl WriterMetrics {
    /// Traces accepted into the buffer.
    pub fn traces_written(&self) -> u64 {
        self.traces_written.load(Ordering::Relaxed)
    }

    /// Traces dropped because identity resolution failed.
    pub fn traces_dropped(&self) -> u64 {
        self.traces_dropped.load(Ordering::Relaxed)
    }

    /// Batches acknowledged by the collection endpoint.
    pub fn batches_published(&self) -> u64 {
        self.batches_published.load(Ordering::Relaxed)
    }

    /// Publish attempts that failed (network, auth, non-2xx).
    pub fn publish_failures(&self) -> u64 {
        self.publish_failures.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    /// Constructed; identity and labels not resolved yet.
    Initializing,
    /// Initialized; the scheduler is armed and writes flow to the buffer.
    Active,
    /// Identity resolution failed; all writes are dropped.
    Failed,
    /// `stop()` was called; no further flush will ever run.
    Stopped,
}

/// State shared between producers, the scheduler and the panic hook.
/// Guarded by one mutex whose critical sections never span an await, so
/// enqueue and drain are atomic with respect to each other.
struct Shared {
    state: WriterState,
    /// Serialized traces awaiting publication.
    buffer: Vec<String>,
    /// Traces written before identity resolution completed.
    pending: Vec<Trace>,
}

struct Inner {
    config: Config,
    metadata: Arc<dyn MetadataClientBoxed>,
    publisher: Publisher,
    identity: IdentityResolver,
    default_labels: OnceLock<Arc<HashMap<String, String>>>,
    shared: Mutex<Shared>,
    flush_wake: Notify,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    metrics: WriterMetrics,
    drop_notice_logged: AtomicBool,
}

impl Inner {
    /// Decorates a trace for publication: default labels onto server
    /// spans (caller keys win), label-value truncation, project-id stamp.
    fn decorate(&self, trace: &mut Trace) {
        if let Some(project_id) = self.identity.get() {
            trace.project_id = project_id.to_string();
        }
        let defaults = self.default_labels.get();
        let limit = self.config.maximum_label_value_size;
        for span in &mut trace.spans {
            if span.kind == SpanKind::RpcServer {
                if let Some(defaults) = defaults {
                    for (key, value) in defaults.iter() {
                        span.labels
                            .entry(key.clone())
                            .or_insert_with(|| value.clone());
                    }
                }
            }
            if limit > 0 {
                for value in span.labels.values_mut() {
                    truncate_label_value(value, limit);
                }
            }
        }
    }

    /// Serializes and appends a trace to the buffer. Caller holds the
    /// shared lock.
    fn push_locked(&self, shared: &mut Shared, mut trace: Trace) {
        self.decorate(&mut trace);
        match serde_json::to_string(&trace) {
            Ok(serialized) => {
                shared.buffer.push(serialized);
                self.metrics.traces_written.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.metrics.traces_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(trace_id = %trace.trace_id, error = %err, "failed to serialize trace, dropping");
            }
        }
    }
}

/// Drains the buffer in one synchronous swap and spawns the publish.
/// No-op when the buffer is empty; completion of the publish is observed
/// for logging and metrics only.
fn flush(inner: &Arc<Inner>) {
    let batch = {
        let mut shared = inner.shared.lock().unwrap();
        mem::take(&mut shared.buffer)
    };
    if batch.is_empty() {
        return;
    }

    let project_id = inner.identity.get().unwrap_or_default().to_string();
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        match inner.publisher.publish(&project_id, batch).await {
            Ok(_) => {
                inner
                    .metrics
                    .batches_published
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                inner
                    .metrics
                    .publish_failures
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    });
}

/// Installs the process-wide panic observer. The hook chains the
/// previously installed one, holds the writer only weakly and stays
/// installed for the life of the process — `stop()` does not remove it.
fn install_panic_hook(inner: &Arc<Inner>, policy: ExceptionPolicy) {
    let weak = Arc::downgrade(inner);
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        previous(panic_info);
        if let Some(inner) = weak.upgrade() {
            inner.flush_wake.notify_one();
        }
        if policy == ExceptionPolicy::FlushAndExit {
            // Let the in-flight publish leave the process first.
            std::thread::sleep(EXIT_GRACE);
            std::process::exit(1);
        }
    }));
}

/// Buffered, batching trace writer. See the module docs for the overall
/// data flow.
pub struct TraceWriter {
    inner: Arc<Inner>,
}

impl TraceWriter {
    /// Creates a writer.
    ///
    /// Validates the configuration (an unrecognized
    /// `onUncaughtException` policy is fatal here) and installs the panic
    /// hook when the policy asks for one. The writer stays inert until
    /// [`initialize`](Self::initialize) completes.
    pub fn new(
        config: Config,
        metadata: Arc<dyn MetadataClientBoxed>,
        transport: Arc<dyn TransportBoxed>,
    ) -> Result<Self, ConfigError> {
        let policy = config.validate()?;
        let publisher = Publisher::new(transport, config.endpoint.clone());
        let identity = IdentityResolver::new(config.project_id.clone());

        let inner = Arc::new(Inner {
            config,
            metadata,
            publisher,
            identity,
            default_labels: OnceLock::new(),
            shared: Mutex::new(Shared {
                state: WriterState::Initializing,
                buffer: Vec::new(),
                pending: Vec::new(),
            }),
            flush_wake: Notify::new(),
            shutdown: Mutex::new(None),
            metrics: WriterMetrics::default(),
            drop_notice_logged: AtomicBool::new(false),
        });

        if policy != ExceptionPolicy::Ignore {
            install_panic_hook(&inner, policy);
        }

        Ok(Self { inner })
    }

    /// Resolves identity and builds the default labels, then activates
    /// the writer: traces deferred during initialization are enqueued,
    /// the first periodic flush runs and the recurring timer is armed.
    ///
    /// Identity resolution and label construction run concurrently; this
    /// returns once both have settled. On identity failure the writer
    /// becomes inert: deferred traces are discarded behind a single log
    /// line and every later write is dropped.
    pub async fn initialize(&self) -> Result<(), TraceWriterError> {
        {
            let shared = self.inner.shared.lock().unwrap();
            match shared.state {
                WriterState::Initializing => {}
                WriterState::Active => return Ok(()),
                WriterState::Failed => {
                    return Err(TraceWriterError::Identity(IdentityError::Unavailable(
                        "identity resolution previously failed".to_string(),
                    )));
                }
                WriterState::Stopped => return Err(TraceWriterError::Stopped),
            }
        }

        let inner = &self.inner;
        // Explicit barrier over exactly the two initialization results.
        let (identity_result, default_labels) = tokio::join!(
            inner.identity.resolve(inner.metadata.as_ref()),
            labels::build_default_labels(&inner.config, inner.metadata.as_ref()),
        );

        match identity_result {
            Ok(project_id) => {
                let project_id = project_id.to_string();
                let _ = inner.default_labels.set(default_labels);

                {
                    let mut shared = inner.shared.lock().unwrap();
                    shared.state = WriterState::Active;
                    let pending = mem::take(&mut shared.pending);
                    for trace in pending {
                        inner.push_locked(&mut shared, trace);
                    }
                }

                self.spawn_scheduler();
                // First periodic flush: publishes anything deferred
                // during initialization, no-op otherwise.
                flush(inner);
                info!(project_id = %project_id, "trace writer initialized");
                Ok(())
            }
            Err(err) => {
                let discarded = {
                    let mut shared = inner.shared.lock().unwrap();
                    shared.state = WriterState::Failed;
                    mem::take(&mut shared.pending).len()
                };
                if discarded > 0 {
                    inner
                        .metrics
                        .traces_dropped
                        .fetch_add(discarded as u64, Ordering::Relaxed);
                    warn!(
                        discarded,
                        "discarding traces buffered before identity resolution failed"
                    );
                }
                error!(
                    error = %err,
                    "could not resolve the project id; tracing is disabled. Configure an \
                     explicit project id or check network access to the metadata service"
                );
                Err(TraceWriterError::Identity(err))
            }
        }
    }

    /// Accepts a finished trace for publication. Never blocks and never
    /// fails to the caller.
    ///
    /// Spans without an end time are stamped with the current time.
    /// Before identity resolution completes the trace is deferred; after
    /// a resolution failure it is dropped (counted, logged once).
    pub fn write_span(&self, mut trace: Trace) {
        for span in &mut trace.spans {
            if span.end_time.is_empty() {
                span.end_time = now_timestamp();
            }
        }

        let mut shared = self.inner.shared.lock().unwrap();
        match shared.state {
            WriterState::Initializing => {
                debug!(trace_id = %trace.trace_id, "identity not resolved yet, deferring trace");
                shared.pending.push(trace);
            }
            WriterState::Active => {
                self.inner.push_locked(&mut shared, trace);
                if shared.buffer.len() >= self.inner.config.buffer_size {
                    // Scheduled, not run inline: the scheduler task picks
                    // this up, so a producer never publishes re-entrantly.
                    self.inner.flush_wake.notify_one();
                }
            }
            WriterState::Stopped => {
                // Buffered, but no trigger will ever flush it.
                self.inner.push_locked(&mut shared, trace);
            }
            WriterState::Failed => {
                drop(shared);
                self.inner
                    .metrics
                    .traces_dropped
                    .fetch_add(1, Ordering::Relaxed);
                if !self.inner.drop_notice_logged.swap(true, Ordering::Relaxed) {
                    warn!("dropping traces: project id could not be resolved");
                }
            }
        }
    }

    /// Stops the writer: no flush will run after this returns, whatever
    /// the timer or buffer length do. An in-flight publish completes on
    /// its own and is only logged.
    pub fn stop(&self) {
        {
            let mut shared = self.inner.shared.lock().unwrap();
            if matches!(shared.state, WriterState::Stopped | WriterState::Failed) {
                return;
            }
            shared.state = WriterState::Stopped;
        }
        if let Some(tx) = self.inner.shutdown.lock().unwrap().take() {
            let _ = tx.send(());
        }
        info!("trace writer stopped");
    }

    /// Resolved project id, once identity resolution has completed.
    pub fn project_id(&self) -> Option<&str> {
        self.inner.identity.get()
    }

    /// The frozen default-label map, once initialization has completed.
    pub fn default_labels(&self) -> Option<Arc<HashMap<String, String>>> {
        self.inner.default_labels.get().cloned()
    }

    /// Writer counters.
    pub fn metrics(&self) -> &WriterMetrics {
        &self.inner.metrics
    }

    /// Writer configuration.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Arms the periodic timer and the size-trigger wake. The task is
    /// background work only; it never keeps the process alive and exits
    /// as soon as the shutdown signal fires or the writer is dropped.
    fn spawn_scheduler(&self) {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        *self.inner.shutdown.lock().unwrap() = Some(shutdown_tx);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let period = Duration::from_secs(inner.config.flush_delay_seconds);
            // The activation flush already ran; first tick one full
            // period from now.
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            // Skip missed ticks instead of queueing catch-up flushes.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => flush(&inner),
                    _ = inner.flush_wake.notified() => flush(&inner),
                    _ = &mut shutdown_rx => break,
                }
            }
            debug!("flush scheduler stopped");
        });
    }
}

impl Drop for TraceWriter {
    fn drop(&mut self) {
        // The scheduler task holds its own Arc; tell it to exit.
        if let Some(tx) = self.inner.shutdown.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }
}

/// Truncates a label value to `limit` bytes on a char boundary.
fn truncate_label_value(value: &mut String, limit: usize) {
    if value.len() <= limit {
        return;
    }
    let mut end = limit;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value.truncate(end);
}

//! Buffered Trace Writer
//!
//! A distributed-tracing agent core: instrumentation hands finished
//! traces to the writer, which resolves the project/tenant identity they
//! must be labeled with, batches them in an in-memory buffer and
//! publishes batches asynchronously to a collection endpoint. Delivery is
//! best effort — publish failures are logged and the batch is discarded,
//! never retried, so the host application's request path is never blocked
//! or faulted by tracing infrastructure.
//!
//! Three independent triggers converge on one flush routine: a periodic
//! timer, the buffer-size threshold and the process panic hook. The
//! buffer is drained by a single synchronous swap, so producers keep
//! appending to a fresh buffer while a batch is in flight.
//!
//! The metadata service and the outbound HTTP call are both behind
//! injectable collaborator traits ([`MetadataClient`], [`Transport`]),
//! which keeps the writer testable without a network.

pub mod config;
pub mod identity;
pub mod labels;
pub mod metadata;
pub mod publisher;
pub mod span;
pub mod transport;
pub mod writer;

// Re-export main types
pub use config::{Config, ConfigError, ExceptionPolicy, ServiceContext};
pub use identity::{IdentityError, IdentityResolver};
pub use metadata::{MetadataClient, MetadataClientBoxed, MetadataError, StaticMetadata};
pub use publisher::{PublishError, Publisher};
pub use span::{Span, SpanKind, Trace};
pub use transport::{
    HttpTransport, NullTransport, Transport, TransportBoxed, TransportError, TransportRequest,
};
pub use writer::{TraceWriter, TraceWriterError, WriterMetrics};

//! # Trace Writer Demo
//!
//! End-to-end demonstration of the trace writer: four concurrent
//! producer tasks generate randomized traces through the public
//! `write_span` API while the writer batches and "publishes" them to the
//! null transport. Structured logs show the flush/publish cadence; a
//! final statistics block summarizes the run.
//!
//! ## Running
//!
//! ```bash
//! cargo run -p trace_writer --bin demo
//!
//! # Fewer traces per producer
//! cargo run -p trace_writer --bin demo -- --quick
//! ```

use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use trace_writer::{
    Config, NullTransport, ServiceContext, Span, SpanKind, StaticMetadata, Trace, TraceWriter,
};

const NUM_PRODUCERS: usize = 4;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let quick = std::env::args().any(|arg| arg == "--quick");
    let traces_per_producer = if quick { 25 } else { 100 };

    let config = Config {
        project_id: Some("demo-project".to_string()),
        buffer_size: 64,
        flush_delay_seconds: 1,
        service_context: ServiceContext {
            service: Some("demo".to_string()),
            version: Some("1".to_string()),
            minor_version: None,
        },
        ..Default::default()
    };

    let metadata = Arc::new(StaticMetadata {
        project_id: None,
        hostname: Some("demo-host".to_string()),
        instance_id: Some(1),
    });

    let writer = Arc::new(TraceWriter::new(
        config,
        metadata,
        Arc::new(NullTransport::new()),
    )?);
    writer.initialize().await?;

    println!(
        "Producing {} traces across {} producers...",
        traces_per_producer * NUM_PRODUCERS,
        NUM_PRODUCERS
    );
    let start = Instant::now();

    let mut tasks = Vec::new();
    for producer_id in 0..NUM_PRODUCERS {
        let writer = Arc::clone(&writer);
        tasks.push(tokio::spawn(async move {
            run_producer(producer_id, traces_per_producer, &writer).await;
        }));
    }
    for task in tasks {
        task.await?;
    }

    // Let the final periodic flush drain what the producers left behind.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    writer.stop();

    let elapsed = start.elapsed();
    let metrics = writer.metrics();
    println!();
    println!("Demo finished in {elapsed:?}");
    println!("  traces written:    {}", metrics.traces_written());
    println!("  traces dropped:    {}", metrics.traces_dropped());
    println!("  batches published: {}", metrics.batches_published());
    println!("  publish failures:  {}", metrics.publish_failures());

    Ok(())
}

async fn run_producer(producer_id: usize, traces: usize, writer: &TraceWriter) {
    let operations = [
        ("http.request", SpanKind::RpcServer),
        ("db.query", SpanKind::RpcClient),
        ("cache.get", SpanKind::RpcClient),
        ("render.template", SpanKind::Unspecified),
    ];

    for i in 0..traces {
        let mut trace = Trace::new(random_id());
        let (name, kind) = operations[i % operations.len()];

        let mut span = Span::new(random_span_id(), name, kind);
        span.set_label("producer", producer_id.to_string());
        span.set_label("sequence", i.to_string());
        if kind == SpanKind::RpcServer {
            span.set_label("http.method", "GET");
            span.set_label("http.path", format!("/api/resource/{i}"));
        }

        // Simulated work, so spans carry a real duration.
        let work_ms = rand::thread_rng().gen_range(1..10);
        tokio::time::sleep(Duration::from_millis(work_ms)).await;
        span.close();
        trace.add(span);

        writer.write_span(trace);
    }
}

fn random_id() -> String {
    format!("{:032x}", rand::thread_rng().gen::<u128>())
}

fn random_span_id() -> String {
    format!("{}", rand::thread_rng().gen::<u64>())
}

/*
    Measures the producer side of `on_emit` on a BatchProcessor with the
    default queue size. The queue stays saturated and the excess is dropped,
    so the reported drop count grows with the producer thread count.

    Run with `cargo run --release --bin batch -- <threads>`.
*/

use opentelemetry_pipeline::testing::NoopExporter;
use opentelemetry_pipeline::{BatchConfigBuilder, BatchProcessor, Processor, Signal};
use std::sync::Arc;
use std::time::Duration;

mod throughput;

#[allow(dead_code)]
#[derive(Debug)]
struct LogRecord {
    severity: u8,
    body: &'static str,
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .init();

    let config = BatchConfigBuilder::for_signal(Signal::Log)
        .with_scheduled_delay(Duration::from_millis(100))
        .build()
        .expect("valid batch configuration");
    let processor = Arc::new(
        BatchProcessor::builder(NoopExporter::new(), Signal::Log)
            .with_batch_config(config)
            .build()
            .expect("batch processor should start"),
    );

    let emitter = processor.clone();
    let reporter = processor.clone();
    throughput::test_throughput(
        move || {
            emitter.on_emit(LogRecord {
                severity: 9,
                body: "Unable to process checkout.",
            })
        },
        move || {
            let stats = reporter.stats();
            format!(
                "exported: {} dropped: {} queued: {}",
                stats.exported,
                stats.dropped,
                reporter.queue_len()
            )
        },
    );

    let _ = processor.shutdown().join(Duration::from_secs(5));
}

/*
    Measures the synchronous path: every `on_emit` exports one record on the
    calling thread, serialized by the processor's exporter lock.
*/

use opentelemetry_pipeline::testing::NoopExporter;
use opentelemetry_pipeline::{Processor, SimpleProcessor};
use std::sync::Arc;

mod throughput;

#[allow(dead_code)]
#[derive(Debug)]
struct SpanRecord {
    span_id: u64,
    name: &'static str,
}

fn main() {
    let processor = Arc::new(SimpleProcessor::new(NoopExporter::new()));

    let emitter = processor.clone();
    throughput::test_throughput(
        move || {
            emitter.on_emit(SpanRecord {
                span_id: 12,
                name: "GET /checkout",
            })
        },
        || String::from("synchronous export"),
    );

    let _ = processor.shutdown().wait();
}

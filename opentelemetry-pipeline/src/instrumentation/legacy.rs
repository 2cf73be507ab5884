//! Pre-semantic-conventions metric names.
use super::{InstrumentationStrategy, Outcome};
use crate::instrumentation::sink::MetricsSink;
use crate::queue::QueueOccupancy;
use crate::signal::Signal;
use opentelemetry::KeyValue;

const PROCESSOR_TYPE: &str = "processorType";
const DROPPED: &str = "dropped";
const QUEUE_SIZE: &str = "queueSize";

#[derive(Debug)]
pub(crate) struct LegacyInstrumentation {
    processed: &'static str,
    kept: [KeyValue; 2],
    dropped: [KeyValue; 2],
    processor_type: KeyValue,
}

impl LegacyInstrumentation {
    pub(crate) fn new(signal: Signal) -> Self {
        let (processed, processor_type) = match signal {
            Signal::Span => ("processedSpans", "BatchSpanProcessor"),
            Signal::Log => ("processedLogs", "BatchLogRecordProcessor"),
            Signal::Metric => ("processedMetrics", "BatchMetricProcessor"),
        };
        let processor_type = KeyValue::new(PROCESSOR_TYPE, processor_type);
        LegacyInstrumentation {
            processed,
            kept: [processor_type.clone(), KeyValue::new(DROPPED, false)],
            dropped: [processor_type.clone(), KeyValue::new(DROPPED, true)],
            processor_type,
        }
    }
}

impl InstrumentationStrategy for LegacyInstrumentation {
    fn record(&self, sink: &dyn MetricsSink, count: u64, outcome: Outcome) {
        // Export failures are reported as dropped; this scheme has no error
        // dimension.
        let attributes = match outcome {
            Outcome::Exported => &self.kept,
            _ => &self.dropped,
        };
        sink.add_to_counter(self.processed, count, attributes);
    }

    fn register_gauges(&self, sink: &dyn MetricsSink, occupancy: QueueOccupancy, _capacity: usize) {
        sink.register_gauge(
            QUEUE_SIZE,
            vec![self.processor_type.clone()],
            Box::new(move || occupancy.len() as i64),
        );
    }
}

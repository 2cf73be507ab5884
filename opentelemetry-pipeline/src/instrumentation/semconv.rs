//! Metric names following the OpenTelemetry SDK self-observability
//! semantic conventions.
use super::{InstrumentationStrategy, Outcome};
use crate::instrumentation::sink::MetricsSink;
use crate::queue::QueueOccupancy;
use crate::signal::Signal;
use opentelemetry::KeyValue;
use std::sync::atomic::{AtomicUsize, Ordering};

const COMPONENT_TYPE: &str = "otel.component.type";
const COMPONENT_NAME: &str = "otel.component.name";
const ERROR_TYPE: &str = "error.type";

// Component names are `<type>/<n>`, unique within the process.
static COMPONENT_INDEX: AtomicUsize = AtomicUsize::new(0);

struct Names {
    processed: &'static str,
    queue_size: &'static str,
    queue_capacity: &'static str,
    component_type: &'static str,
}

fn names(signal: Signal) -> Names {
    match signal {
        Signal::Span => Names {
            processed: "otel.sdk.processor.span.processed",
            queue_size: "otel.sdk.processor.span.queue.size",
            queue_capacity: "otel.sdk.processor.span.queue.capacity",
            component_type: "batching_span_processor",
        },
        Signal::Log => Names {
            processed: "otel.sdk.processor.log.processed",
            queue_size: "otel.sdk.processor.log.queue.size",
            queue_capacity: "otel.sdk.processor.log.queue.capacity",
            component_type: "batching_log_processor",
        },
        Signal::Metric => Names {
            processed: "otel.sdk.processor.metric.processed",
            queue_size: "otel.sdk.processor.metric.queue.size",
            queue_capacity: "otel.sdk.processor.metric.queue.capacity",
            component_type: "batching_metric_processor",
        },
    }
}

#[derive(Debug)]
pub(crate) struct SemconvInstrumentation {
    processed: &'static str,
    queue_size: &'static str,
    queue_capacity: &'static str,
    component: [KeyValue; 2],
}

impl SemconvInstrumentation {
    pub(crate) fn new(signal: Signal) -> Self {
        let names = names(signal);
        let index = COMPONENT_INDEX.fetch_add(1, Ordering::Relaxed);
        SemconvInstrumentation {
            processed: names.processed,
            queue_size: names.queue_size,
            queue_capacity: names.queue_capacity,
            component: [
                KeyValue::new(COMPONENT_TYPE, names.component_type),
                KeyValue::new(
                    COMPONENT_NAME,
                    format!("{}/{}", names.component_type, index),
                ),
            ],
        }
    }

    #[cfg(test)]
    pub(crate) fn component_name(&self) -> String {
        self.component[1].value.as_str().into_owned()
    }
}

impl InstrumentationStrategy for SemconvInstrumentation {
    fn record(&self, sink: &dyn MetricsSink, count: u64, outcome: Outcome) {
        match outcome.error_type() {
            None => sink.add_to_counter(self.processed, count, &self.component),
            Some(error_type) => {
                let [component_type, component_name] = &self.component;
                sink.add_to_counter(
                    self.processed,
                    count,
                    &[
                        component_type.clone(),
                        component_name.clone(),
                        KeyValue::new(ERROR_TYPE, error_type),
                    ],
                );
            }
        }
    }

    fn register_gauges(&self, sink: &dyn MetricsSink, occupancy: QueueOccupancy, capacity: usize) {
        sink.register_gauge(
            self.queue_size,
            self.component.to_vec(),
            Box::new(move || occupancy.len() as i64),
        );
        let capacity = capacity as i64;
        sink.register_gauge(
            self.queue_capacity,
            self.component.to_vec(),
            Box::new(move || capacity),
        );
    }
}

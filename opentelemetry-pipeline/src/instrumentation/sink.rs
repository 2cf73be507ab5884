use opentelemetry::KeyValue;
use std::fmt::Debug;

/// Callback polled by a gauge each time it is collected.
pub type GaugeCallback = Box<dyn Fn() -> i64 + Send + Sync>;

/// Generic metrics-reporting interface used by processors to report their
/// own health.
///
/// Implementations must be cheap and must not fail: a sink that cannot
/// record a value drops it.
pub trait MetricsSink: Send + Sync + Debug {
    /// Adds `value` to the counter `name` for the given attribute set.
    fn add_to_counter(&self, name: &'static str, value: u64, attributes: &[KeyValue]);

    /// Registers a gauge whose value is obtained by calling `callback` at
    /// collection time. Called once per gauge when a processor is built.
    fn register_gauge(&self, name: &'static str, attributes: Vec<KeyValue>, callback: GaugeCallback);
}

/// A sink that discards everything. Used when no sink is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl NoopMetricsSink {
    /// Creates a new sink.
    pub fn new() -> Self {
        NoopMetricsSink
    }
}

impl MetricsSink for NoopMetricsSink {
    fn add_to_counter(&self, _name: &'static str, _value: u64, _attributes: &[KeyValue]) {}

    fn register_gauge(&self, _name: &'static str, _attributes: Vec<KeyValue>, _callback: GaugeCallback) {}
}

#[cfg(feature = "metrics")]
pub use meter::MeterSink;

#[cfg(feature = "metrics")]
mod meter {
    use super::{GaugeCallback, MetricsSink};
    use opentelemetry::metrics::{Counter, Meter, ObservableGauge};
    use opentelemetry::KeyValue;
    use std::collections::HashMap;
    use std::fmt;
    use std::sync::{Mutex, PoisonError, RwLock};

    /// A [`MetricsSink`] backed by an OpenTelemetry [`Meter`].
    ///
    /// Counters are created lazily on first use and cached by name. Gauges
    /// are registered as observable gauges and kept alive for the lifetime
    /// of the sink.
    pub struct MeterSink {
        meter: Meter,
        counters: RwLock<HashMap<&'static str, Counter<u64>>>,
        gauges: Mutex<Vec<ObservableGauge<i64>>>,
    }

    impl MeterSink {
        /// Creates a sink reporting through `meter`.
        pub fn new(meter: Meter) -> Self {
            MeterSink {
                meter,
                counters: RwLock::new(HashMap::new()),
                gauges: Mutex::new(Vec::new()),
            }
        }
    }

    impl fmt::Debug for MeterSink {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let counters = self
                .counters
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .len();
            f.debug_struct("MeterSink")
                .field("counters", &counters)
                .finish()
        }
    }

    impl MetricsSink for MeterSink {
        fn add_to_counter(&self, name: &'static str, value: u64, attributes: &[KeyValue]) {
            if let Some(counter) = self
                .counters
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(name)
            {
                counter.add(value, attributes);
                return;
            }

            let mut counters = self.counters.write().unwrap_or_else(PoisonError::into_inner);
            let counter = counters
                .entry(name)
                .or_insert_with(|| self.meter.u64_counter(name).build());
            counter.add(value, attributes);
        }

        fn register_gauge(
            &self,
            name: &'static str,
            attributes: Vec<KeyValue>,
            callback: GaugeCallback,
        ) {
            let gauge = self
                .meter
                .i64_observable_gauge(name)
                .with_callback(move |observer| observer.observe(callback(), &attributes))
                .build();
            self.gauges
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(gauge);
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn meter_sink_caches_counters_by_name() {
            let meter = opentelemetry::global::meter("opentelemetry_pipeline.tests");
            let sink = MeterSink::new(meter);

            sink.add_to_counter("processed", 1, &[]);
            sink.add_to_counter("processed", 2, &[KeyValue::new("dropped", true)]);
            sink.add_to_counter("other", 1, &[]);
            sink.register_gauge("size", vec![], Box::new(|| 5));

            assert_eq!(sink.counters.read().unwrap().len(), 2);
            assert_eq!(sink.gauges.lock().unwrap().len(), 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_sink_accepts_everything() {
        let sink = NoopMetricsSink::new();
        sink.add_to_counter("processed", 3, &[KeyValue::new("dropped", false)]);
        sink.register_gauge("size", vec![], Box::new(|| 1));
    }
}

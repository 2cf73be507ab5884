use crate::instrumentation::{GaugeCallback, MetricsSink};
use opentelemetry::KeyValue;
use std::fmt;
use std::sync::{Mutex, PoisonError};

struct CounterPoint {
    name: &'static str,
    attributes: Vec<KeyValue>,
    value: u64,
}

struct Gauge {
    name: &'static str,
    attributes: Vec<KeyValue>,
    callback: GaugeCallback,
}

/// A [`MetricsSink`] that keeps counters and gauges in memory so tests can
/// assert on processor instrumentation.
///
/// Counter points are keyed by name and attribute set; attribute order does
/// not matter. Gauges are evaluated when read.
#[derive(Default)]
pub struct InMemoryMetricsSink {
    counters: Mutex<Vec<CounterPoint>>,
    gauges: Mutex<Vec<Gauge>>,
}

fn same_attributes(left: &[KeyValue], right: &[KeyValue]) -> bool {
    left.len() == right.len() && left.iter().all(|kv| right.contains(kv))
}

impl InMemoryMetricsSink {
    /// Value of the counter `name` for exactly this attribute set, or zero.
    pub fn counter_value(&self, name: &str, attributes: &[KeyValue]) -> u64 {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|point| point.name == name && same_attributes(&point.attributes, attributes))
            .map(|point| point.value)
            .sum()
    }

    /// Sum of the counter `name` across all attribute sets.
    pub fn counter_total(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|point| point.name == name)
            .map(|point| point.value)
            .sum()
    }

    /// Current value of the first gauge registered as `name`.
    pub fn gauge_value(&self, name: &str) -> Option<i64> {
        self.gauges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|gauge| gauge.name == name)
            .map(|gauge| (gauge.callback)())
    }

    /// Attributes of the first gauge registered as `name`.
    pub fn gauge_attributes(&self, name: &str) -> Option<Vec<KeyValue>> {
        self.gauges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|gauge| gauge.name == name)
            .map(|gauge| gauge.attributes.clone())
    }

    /// Names of every registered gauge, in registration order.
    pub fn gauge_names(&self) -> Vec<&'static str> {
        self.gauges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|gauge| gauge.name)
            .collect()
    }
}

impl MetricsSink for InMemoryMetricsSink {
    fn add_to_counter(&self, name: &'static str, value: u64, attributes: &[KeyValue]) {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        match counters
            .iter_mut()
            .find(|point| point.name == name && same_attributes(&point.attributes, attributes))
        {
            Some(point) => point.value += value,
            None => counters.push(CounterPoint {
                name,
                attributes: attributes.to_vec(),
                value,
            }),
        }
    }

    fn register_gauge(&self, name: &'static str, attributes: Vec<KeyValue>, callback: GaugeCallback) {
        self.gauges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Gauge {
                name,
                attributes,
                callback,
            });
    }
}

impl fmt::Debug for InMemoryMetricsSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let mut map = f.debug_map();
        for point in counters.iter() {
            map.entry(&(point.name, &point.attributes), &point.value);
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_keyed_by_unordered_attributes() {
        let sink = InMemoryMetricsSink::default();
        let a = KeyValue::new("a", 1);
        let b = KeyValue::new("b", "x");

        sink.add_to_counter("c", 1, &[a.clone(), b.clone()]);
        sink.add_to_counter("c", 2, &[b.clone(), a.clone()]);
        sink.add_to_counter("c", 4, &[a.clone()]);

        assert_eq!(sink.counter_value("c", &[a.clone(), b]), 3);
        assert_eq!(sink.counter_value("c", &[a]), 4);
        assert_eq!(sink.counter_total("c"), 7);
        assert_eq!(sink.counter_total("missing"), 0);
    }

    #[test]
    fn gauges_are_evaluated_on_read() {
        let sink = InMemoryMetricsSink::default();
        let value = std::sync::Arc::new(std::sync::atomic::AtomicI64::new(1));
        let observed = value.clone();
        sink.register_gauge(
            "g",
            vec![KeyValue::new("k", "v")],
            Box::new(move || observed.load(std::sync::atomic::Ordering::SeqCst)),
        );

        assert_eq!(sink.gauge_value("g"), Some(1));
        value.store(9, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(sink.gauge_value("g"), Some(9));
        assert_eq!(sink.gauge_attributes("g"), Some(vec![KeyValue::new("k", "v")]));
        assert_eq!(sink.gauge_names(), vec!["g"]);
        assert_eq!(sink.gauge_value("missing"), None);
    }
}

use super::Processor;
use crate::async_result::AsyncResult;
use std::fmt;

/// A [`Processor`] that hands every record to several processors.
///
/// Destinations are independent: a slow or failing child does not affect
/// what the others receive. `force_flush` and `shutdown` reach every child
/// and succeed only if all children succeed.
pub struct MultiProcessor<R> {
    processors: Vec<Box<dyn Processor<R>>>,
}

impl<R> MultiProcessor<R> {
    /// Creates a processor fanning out to `processors`.
    pub fn new(processors: Vec<Box<dyn Processor<R>>>) -> Self {
        MultiProcessor { processors }
    }

    /// Adds another destination.
    pub fn with_processor<P>(mut self, processor: P) -> Self
    where
        P: Processor<R> + 'static,
    {
        self.processors.push(Box::new(processor));
        self
    }

    /// Number of destinations.
    pub fn len(&self) -> usize {
        self.processors.len()
    }

    /// Returns `true` if there is no destination.
    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

impl<R> Default for MultiProcessor<R> {
    fn default() -> Self {
        MultiProcessor::new(Vec::new())
    }
}

impl<R> fmt::Debug for MultiProcessor<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiProcessor")
            .field("processors", &self.processors)
            .finish()
    }
}

impl<R: Clone> Processor<R> for MultiProcessor<R> {
    fn on_emit(&self, record: R) {
        if let Some((last, rest)) = self.processors.split_last() {
            for processor in rest {
                processor.on_emit(record.clone());
            }
            last.on_emit(record);
        }
    }

    fn force_flush(&self) -> AsyncResult {
        AsyncResult::of_all(self.processors.iter().map(|p| p.force_flush()))
    }

    fn shutdown(&self) -> AsyncResult {
        AsyncResult::of_all(self.processors.iter().map(|p| p.shutdown()))
    }
}

//! Bounded multi-producer, single-consumer record queue.
//!
//! Producers never block: [`QueueSender::try_enqueue`] either accepts the
//! record or hands it back. The consumer drains records in FIFO order
//! without blocking; waiting for work is the worker's concern. Once the
//! consumer closes the queue, producers are refused and the consumer can
//! still collect every record accepted before.
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError, TrySendError};
use std::sync::Arc;

/// Creates a queue holding at most `capacity` records.
///
/// `capacity` must be greater than zero; [`BatchConfigBuilder::build`]
/// guarantees this for processor queues.
///
/// [`BatchConfigBuilder::build`]: crate::BatchConfigBuilder::build
pub(crate) fn bounded<R>(capacity: usize) -> (QueueSender<R>, QueueReceiver<R>) {
    debug_assert!(capacity > 0, "queue capacity must be greater than zero");
    let (sender, receiver) = mpsc::sync_channel(capacity);
    let shared = Arc::new(Shared {
        len: AtomicUsize::new(0),
        capacity,
    });
    (
        QueueSender {
            sender,
            shared: shared.clone(),
        },
        QueueReceiver { receiver, shared },
    )
}

// High bit of `Shared::len`, set once the consumer closed the queue.
const CLOSED: usize = 1 << (usize::BITS - 1);

struct Shared {
    // Reserved slots, including records still in flight inside `try_send`,
    // plus the `CLOSED` bit.
    len: AtomicUsize,
    capacity: usize,
}

impl Shared {
    fn reserved(&self) -> usize {
        self.len.load(Ordering::Acquire) & !CLOSED
    }

    fn len(&self) -> usize {
        self.reserved().min(self.capacity)
    }
}

/// A record the queue refused, handed back to the caller.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum EnqueueError<R> {
    /// The queue already holds `capacity` records.
    Full(R),
    /// The consumer is gone.
    Closed(R),
}

/// Producer half. Cheap to clone, safe to use from any thread.
pub(crate) struct QueueSender<R> {
    sender: SyncSender<R>,
    shared: Arc<Shared>,
}

impl<R> Clone for QueueSender<R> {
    fn clone(&self) -> Self {
        QueueSender {
            sender: self.sender.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<R> QueueSender<R> {
    /// Appends `record` if there is room, without blocking.
    pub(crate) fn try_enqueue(&self, record: R) -> Result<(), EnqueueError<R>> {
        // Reserve a slot first so concurrent producers can never overshoot
        // the capacity, and the consumer never decrements below zero.
        let reserved = self.shared.len.fetch_add(1, Ordering::AcqRel);
        if reserved & CLOSED != 0 {
            self.shared.len.fetch_sub(1, Ordering::AcqRel);
            return Err(EnqueueError::Closed(record));
        }
        if reserved >= self.shared.capacity {
            self.shared.len.fetch_sub(1, Ordering::AcqRel);
            return Err(EnqueueError::Full(record));
        }
        match self.sender.try_send(record) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(record)) => {
                self.shared.len.fetch_sub(1, Ordering::AcqRel);
                Err(EnqueueError::Full(record))
            }
            Err(TrySendError::Disconnected(record)) => {
                self.shared.len.fetch_sub(1, Ordering::AcqRel);
                Err(EnqueueError::Closed(record))
            }
        }
    }

    /// Number of records currently queued.
    pub(crate) fn len(&self) -> usize {
        self.shared.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// A handle observing the queue size, for gauges.
    pub(crate) fn occupancy(&self) -> QueueOccupancy {
        QueueOccupancy {
            shared: self.shared.clone(),
        }
    }
}

impl<R> fmt::Debug for QueueSender<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueSender")
            .field("len", &self.len())
            .field("capacity", &self.shared.capacity)
            .finish()
    }
}

/// Consumer half. Owned by the worker thread.
pub(crate) struct QueueReceiver<R> {
    receiver: Receiver<R>,
    shared: Arc<Shared>,
}

impl<R> QueueReceiver<R> {
    /// Moves up to `max` records into `into`, oldest first. Returns how many
    /// records were moved.
    pub(crate) fn drain_into(&self, into: &mut Vec<R>, max: usize) -> usize {
        let mut taken = 0;
        while taken < max {
            match self.receiver.try_recv() {
                Ok(record) => {
                    into.push(record);
                    taken += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        if taken > 0 {
            self.shared.len.fetch_sub(taken, Ordering::AcqRel);
        }
        taken
    }

    /// Removes up to `max` records, oldest first.
    #[cfg(test)]
    pub(crate) fn drain_up_to(&self, max: usize) -> Vec<R> {
        let mut records = Vec::with_capacity(max.min(self.shared.capacity));
        self.drain_into(&mut records, max);
        records
    }

    /// Number of records currently queued.
    pub(crate) fn len(&self) -> usize {
        self.shared.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refuses every later `try_enqueue` with [`EnqueueError::Closed`].
    ///
    /// Records accepted before stay counted by [`len`](Self::len) until
    /// drained, including those a producer is still handing over.
    pub(crate) fn close(&self) {
        self.shared.len.fetch_or(CLOSED, Ordering::AcqRel);
    }
}

/// Read-only view of a queue's size, usable after the queue halves move
/// to other threads.
#[derive(Clone)]
pub(crate) struct QueueOccupancy {
    shared: Arc<Shared>,
}

impl QueueOccupancy {
    pub(crate) fn len(&self) -> usize {
        self.shared.len()
    }
}

impl fmt::Debug for QueueOccupancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueOccupancy")
            .field("len", &self.len())
            .finish()
    }
}

//! Batches: grouped work with a shared results stream and group cancel.

use std::{sync::Arc, thread};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use crossbeam_utils::sync::WaitGroup;

use crate::{
    error::{PoolError, WorkResult},
    pool::Pool,
    sync::Mutex,
    unit::{UnitShared, WorkUnit},
};

/// A single-use grouping of work units queued onto one [`Pool`].
///
/// Units queued through a batch complete on the shared stream returned by
/// [`Batch::results`], in the order they finish (not the order they were
/// submitted), and can be cancelled together with [`Batch::cancel`] without
/// affecting anything else running on the pool.
///
/// A batch is sealed by [`Batch::queue_complete`]; once sealed it accepts no
/// further work, and the results stream ends after the already-queued units
/// have been delivered. A consumer that never seals the batch will wait on
/// the stream forever; that is the documented contract, not a deadlock bug.
///
/// `Batch` is a cheaply cloneable handle; clones refer to the same batch, so
/// one thread can queue while another cancels.
pub struct Batch<T: Send + 'static> {
    inner: Arc<BatchInner<T>>,
}

impl<T: Send + 'static> Clone for Batch<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct BatchInner<T: Send + 'static> {
    pool: Pool<T>,
    state: Mutex<BatchState<T>>,
}

struct BatchState<T> {
    /// Submission order, kept for [`Batch::cancel`].
    units: Vec<Arc<UnitShared<T>>>,
    closed: bool,
    /// Sender side of the results stream. Forwarders clone it; the closer
    /// drops the original to end the stream.
    results: Option<Sender<WorkUnit<T>>>,
    /// Receiver side, taken by the first `results()` call.
    stream: Option<Receiver<WorkUnit<T>>>,
    /// Dropped by `queue_complete` to signal the closer.
    sealed_tx: Option<Sender<()>>,
    sealed_rx: Receiver<()>,
    /// One guard per forwarder still waiting on its unit.
    forwarders: Option<WaitGroup>,
}

impl<T: Send + 'static> Batch<T> {
    pub(crate) fn new(pool: Pool<T>) -> Self {
        let (results_tx, results_rx) = unbounded();
        let (sealed_tx, sealed_rx) = bounded(0);
        Self {
            inner: Arc::new(BatchInner {
                pool,
                state: Mutex::new(BatchState {
                    units: Vec::new(),
                    closed: false,
                    results: Some(results_tx),
                    stream: Some(results_rx),
                    sealed_tx: Some(sealed_tx),
                    sealed_rx,
                    forwarders: Some(WaitGroup::new()),
                }),
            }),
        }
    }

    /// Queues `work` on the underlying pool as part of this batch.
    ///
    /// The resulting unit is recorded for [`Batch::cancel`] and forwarded to
    /// the results stream when it completes. On a batch that is already
    /// sealed the work is dropped silently.
    pub fn queue<F>(&self, work: F)
    where
        F: FnOnce() -> WorkResult<T> + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }

        let unit = self.inner.pool.queue(work);
        state.units.push(unit.shared().clone());
        // A batch that is not sealed still has its stream plumbing.
        let results = state.results.as_ref().unwrap().clone();
        let guard = state.forwarders.as_ref().unwrap().clone();
        drop(state);

        thread::spawn(move || {
            unit.wait();
            let _ = results.send(unit);
            drop(results);
            drop(guard);
        });
    }

    /// Seals the batch: no more work will be queued.
    ///
    /// This is what allows the results stream to end once the already-queued
    /// units have all been delivered. Idempotent.
    pub fn queue_complete(&self) {
        let mut state = self.inner.state.lock();
        state.closed = true;
        state.sealed_tx.take();
    }

    /// Seals the batch and cancels its queued units.
    ///
    /// Units are cancelled in reverse submission order, so the units least
    /// likely to have been picked up by a worker are cancelled first. Units
    /// already being executed run to completion; the rest of the pool is
    /// unaffected.
    pub fn cancel(&self) {
        self.queue_complete();

        let state = self.inner.state.lock();
        for unit in state.units.iter().rev() {
            unit.cancel_with(PoolError::Cancelled);
        }
    }

    /// Returns the stream of completed units.
    ///
    /// Every unit queued on this batch is delivered exactly once, in
    /// completion order; the stream ends once the batch is sealed and every
    /// unit has been delivered.
    ///
    /// # Panics
    ///
    /// Panics when called a second time; a batch has exactly one results
    /// stream.
    pub fn results(&self) -> BatchResults<T> {
        let mut state = self.inner.state.lock();
        let stream = state
            .stream
            .take()
            .expect("batch results can only be taken once");
        let sealed = state.sealed_rx.clone();
        drop(state);

        // The closer: once the batch is sealed and the last forwarder has
        // delivered its unit, drop the stream's sender so the iterator ends.
        let inner = self.inner.clone();
        thread::spawn(move || {
            let _ = sealed.recv();
            let mut state = inner.state.lock();
            let forwarders = state.forwarders.take();
            let results = state.results.take();
            drop(state);
            if let Some(forwarders) = forwarders {
                forwarders.wait();
            }
            drop(results);
        });

        BatchResults { stream }
    }
}

/// Blocking iterator over a batch's completed units.
///
/// Returned by [`Batch::results`].
pub struct BatchResults<T> {
    stream: Receiver<WorkUnit<T>>,
}

impl<T> Iterator for BatchResults<T> {
    type Item = WorkUnit<T>;

    fn next(&mut self) -> Option<WorkUnit<T>> {
        self.stream.recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crossbeam_channel::bounded;

    use super::*;

    #[test]
    fn delivers_every_queued_unit() {
        let pool: Pool<usize> = Pool::new(4).unwrap();
        let batch = pool.batch();

        for i in 0..4 {
            batch.queue(move || {
                thread::sleep(Duration::from_millis(20));
                Ok(i)
            });
        }
        batch.queue_complete();

        let mut values: Vec<usize> = batch
            .results()
            .map(|unit| unit.into_result().unwrap())
            .collect();
        values.sort_unstable();
        assert_eq!(values, [0, 1, 2, 3]);
        pool.close();
    }

    #[test]
    fn cancel_while_queueing_drops_the_tail() {
        let pool: Pool<usize> = Pool::new(4).unwrap();
        let batch = pool.batch();

        // Rendezvous with the producer a few units in, then cancel. Everything
        // the producer queues after the cancel is dropped silently.
        let (part_way_tx, part_way) = bounded::<()>(0);
        let producer = batch.clone();
        let feeder = thread::spawn(move || {
            for i in 0..75 {
                if i == 10 {
                    part_way_tx.send(()).unwrap();
                }
                producer.queue(move || {
                    thread::sleep(Duration::from_millis(20));
                    Ok(1)
                });
            }
        });

        part_way.recv().unwrap();
        batch.cancel();

        let mut delivered = 0;
        for unit in batch.results() {
            delivered += 1;
            match unit.into_result() {
                Ok(1) | Err(PoolError::Cancelled) => {}
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
        assert!(delivered < 75, "cancel dropped nothing ({delivered} delivered)");

        feeder.join().unwrap();
        pool.close();
    }

    #[test]
    fn cancel_after_completion_delivers_everything() {
        let pool: Pool<usize> = Pool::new(4).unwrap();
        let batch = pool.batch();

        let producer = batch.clone();
        let feeder = thread::spawn(move || {
            for _ in 0..75 {
                producer.queue(|| {
                    thread::sleep(Duration::from_millis(5));
                    Ok(1)
                });
            }
        });
        feeder.join().unwrap();

        // Give the whole batch time to drain before cancelling.
        thread::sleep(Duration::from_millis(500));
        batch.cancel();

        assert_eq!(batch.results().count(), 75);
        pool.close();
    }

    #[test]
    fn queueing_after_queue_complete_is_dropped() {
        let pool: Pool<usize> = Pool::new(2).unwrap();
        let batch = pool.batch();

        batch.queue(|| Ok(1));
        batch.queue(|| Ok(2));
        batch.queue_complete();
        batch.queue(|| unreachable!("sealed batches must drop new work"));

        assert_eq!(batch.results().count(), 2);
        pool.close();
    }

    #[test]
    fn batch_cancel_leaves_the_pool_running() {
        let pool: Pool<usize> = Pool::new(2).unwrap();
        let batch = pool.batch();
        batch.queue(|| Ok(1));
        batch.cancel();
        batch.results().count();

        let unit = pool.queue(|| Ok(7));
        assert_eq!(unit.into_result().unwrap(), 7);
        pool.close();
    }
}

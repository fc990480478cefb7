//! The pool: a fixed set of workers fed by a bounded dispatch channel.

use std::{io, sync::Arc, thread};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::{
    batch::Batch,
    error::{PoolError, WorkResult},
    sync::RwLock,
    unit::{UnitShared, WorkUnit},
    worker::{self, WorkerContext},
};

/// A bounded worker pool.
///
/// A pool owns a fixed number of worker threads and a dispatch channel of
/// capacity `2 * workers` feeding them. Work is submitted with
/// [`Pool::queue`], which hands back a [`WorkUnit`] to observe, and can be
/// grouped with [`Pool::batch`].
///
/// The pool is constructed running. [`Pool::cancel`] and [`Pool::close`] move
/// it to closed, rejecting further work; [`Pool::reset`] returns a closed
/// pool to service with fresh channels and workers.
///
/// `Pool` is a cheaply cloneable handle; clones refer to the same pool.
pub struct Pool<T: Send + 'static> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Send + 'static> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct PoolInner<T: Send + 'static> {
    workers: usize,
    state: RwLock<PoolState<T>>,
}

/// The channel halves of a running pool. `dispatch` and `cancel` are taken
/// (and thereby closed) on shutdown; `backlog` is the receiver kept for the
/// shutdown drain and carried across `reset`.
struct PoolState<T> {
    dispatch: Option<Sender<Arc<UnitShared<T>>>>,
    backlog: Receiver<Arc<UnitShared<T>>>,
    cancel: Option<Sender<()>>,
    closed: bool,
}

impl<T: Send + 'static> PoolState<T> {
    fn start(workers: usize) -> io::Result<Self> {
        let (dispatch, backlog) = bounded(workers * 2);
        let (cancel_tx, cancel_rx) = bounded(0);
        for i in 0..workers {
            worker::spawn(WorkerContext {
                name: format!("pool-worker-{i}"),
                work: backlog.clone(),
                cancel: cancel_rx.clone(),
            })?;
        }
        Ok(Self {
            dispatch: Some(dispatch),
            backlog,
            cancel: Some(cancel_tx),
            closed: false,
        })
    }
}

impl<T: Send + 'static> Pool<T> {
    /// Creates a pool with `workers` worker threads.
    ///
    /// # Panics
    ///
    /// Panics if `workers` is zero; a pool without workers is a programming
    /// error.
    pub fn new(workers: usize) -> io::Result<Self> {
        if workers == 0 {
            panic!("invalid workers '{workers}'");
        }
        Ok(Self {
            inner: Arc::new(PoolInner {
                workers,
                state: RwLock::new(PoolState::start(workers)?),
            }),
        })
    }

    /// Submits `work` to the pool and returns the unit observing it.
    ///
    /// This returns immediately: admission to the dispatch channel happens on
    /// a short-lived publisher thread, so the caller can begin waiting on the
    /// unit before it has entered the queue. If the pool is closed at
    /// publication time the unit resolves with [`PoolError::Closed`] and
    /// never touches the channel.
    pub fn queue<F>(&self, work: F) -> WorkUnit<T>
    where
        F: FnOnce() -> WorkResult<T> + Send + 'static,
    {
        let shared = Arc::new(UnitShared::new(Box::new(work)));
        let publisher = shared.clone();
        let inner = self.inner.clone();
        thread::spawn(move || {
            // Publication holds the read side of the state lock: a cancel or
            // close cannot drain the channel until every admission that saw
            // `closed == false` has landed on it.
            let state = inner.state.read();
            if state.closed {
                publisher.cancel_with(PoolError::Closed);
                return;
            }
            // A running pool always has its dispatch sender.
            let dispatch = state.dispatch.as_ref().unwrap();
            if let Err(rejected) = dispatch.send(publisher) {
                rejected.into_inner().cancel_with(PoolError::Closed);
            }
        });
        WorkUnit::new(shared)
    }

    /// Cancels the pool.
    ///
    /// Workers are signalled to exit, the dispatch channel is closed, and
    /// every unit still queued on it resolves with [`PoolError::Cancelled`].
    /// Units already being executed run to completion. Idempotent, and safe
    /// to call while other threads are queueing.
    pub fn cancel(&self) {
        self.shutdown(|| PoolError::Cancelled);
    }

    /// Closes the pool.
    ///
    /// Identical to [`Pool::cancel`] except that drained units resolve with
    /// [`PoolError::Closed`]. A closed pool rejects new work until
    /// [`Pool::reset`].
    pub fn close(&self) {
        self.shutdown(|| PoolError::Closed);
    }

    /// Returns a closed pool to service.
    ///
    /// Reallocates the dispatch channel and cancel signal and spawns a fresh
    /// worker set of the originally configured size. On a pool that is not
    /// closed this is a no-op.
    ///
    /// `reset` is for lifecycle management after a quiesced cancel; do not
    /// call it concurrently with [`Pool::queue`] from the same caller.
    pub fn reset(&self) -> io::Result<()> {
        let mut state = self.inner.state.write();
        if !state.closed {
            return Ok(());
        }
        *state = PoolState::start(self.inner.workers)?;
        Ok(())
    }

    /// Creates a new, single-use [`Batch`] riding on this pool.
    pub fn batch(&self) -> Batch<T> {
        Batch::new(self.clone())
    }

    fn shutdown(&self, reject: fn() -> PoolError) {
        let mut state = self.inner.state.write();
        if state.closed {
            return;
        }
        state.closed = true;
        // Dropping the only cancel sender broadcasts shutdown to the workers;
        // dropping the dispatch sender ends admission.
        state.cancel.take();
        state.dispatch.take();
        for unit in state.backlog.try_iter() {
            unit.cancel_with(reject());
        }
    }
}

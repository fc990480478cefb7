//! Work units: one submitted function call and its eventual outcome.

use std::{
    mem,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
};

use crate::{
    error::{PoolError, WorkResult},
    sync::{Condvar, Mutex},
};

/// The boxed form of a work function, consumed exactly once.
pub(crate) type WorkFn<T> = Box<dyn FnOnce() -> WorkResult<T> + Send>;

// Lifecycle states. `Fresh` is the only state a unit can leave; the gate is a
// single compare-and-swap, so exactly one of "a worker started it" and "a
// cancel took effect" can win.
const FRESH: u8 = 0;
const RUNNING: u8 = 1;
const CANCELLED: u8 = 2;
const DONE: u8 = 3;

/// A handle to one unit of work submitted to a [`Pool`][crate::Pool].
///
/// The handle resolves when a worker completes the unit, when the unit is
/// cancelled, or when a closed pool rejects it. Use [`WorkUnit::wait`] to
/// block until then, and [`WorkUnit::into_result`] to extract the outcome.
pub struct WorkUnit<T> {
    shared: Arc<UnitShared<T>>,
}

impl<T> WorkUnit<T> {
    pub(crate) fn new(shared: Arc<UnitShared<T>>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<UnitShared<T>> {
        &self.shared
    }

    /// Blocks the calling thread until the unit has resolved.
    ///
    /// Returns immediately if it already has; waiting after resolution never
    /// blocks.
    pub fn wait(&self) {
        self.shared.wait();
    }

    /// Whether the unit has resolved.
    pub fn is_done(&self) -> bool {
        self.shared.is_done()
    }

    /// Whether the unit was cancelled before a worker began executing it.
    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    /// Cancels the unit if no worker has begun executing it.
    ///
    /// An effective cancel resolves the unit with [`PoolError::Cancelled`];
    /// the work function will never be invoked. Once a worker has started the
    /// unit (or it has already resolved), this is a no-op. Idempotent.
    pub fn cancel(&self) {
        self.shared.cancel_with(PoolError::Cancelled);
    }

    /// Blocks until the unit has resolved, then returns its outcome.
    pub fn into_result(self) -> Result<T, PoolError> {
        self.shared.wait();
        self.shared.take()
    }
}

/// The record behind a [`WorkUnit`], shared between the caller's handle, the
/// dispatch channel, and any batch that recorded the unit for cancellation.
pub(crate) struct UnitShared<T> {
    lifecycle: AtomicU8,
    work: Mutex<Option<WorkFn<T>>>,
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

enum Slot<T> {
    Pending,
    Ready(Result<T, PoolError>),
    Taken,
}

impl<T> UnitShared<T> {
    pub(crate) fn new(work: WorkFn<T>) -> Self {
        Self {
            lifecycle: AtomicU8::new(FRESH),
            work: Mutex::new(Some(work)),
            slot: Mutex::new(Slot::Pending),
            ready: Condvar::new(),
        }
    }

    /// Claims the unit for execution, yielding its work function.
    ///
    /// Returns `None` if a cancel won the gate first; the cancel has already
    /// resolved the unit, so the caller must not touch it further.
    pub(crate) fn begin(&self) -> Option<WorkFn<T>> {
        self.lifecycle
            .compare_exchange(FRESH, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.work.lock().take()
    }

    /// Resolves a unit previously claimed with [`UnitShared::begin`].
    pub(crate) fn finish(&self, outcome: Result<T, PoolError>) {
        self.lifecycle.store(DONE, Ordering::Release);
        self.resolve(outcome);
    }

    /// Cancels the unit with `error` if it is still fresh; otherwise a no-op.
    pub(crate) fn cancel_with(&self, error: PoolError) {
        if self
            .lifecycle
            .compare_exchange(FRESH, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        // The function must never run; drop it along with anything it captured.
        self.work.lock().take();
        self.resolve(Err(error));
    }

    pub(crate) fn wait(&self) {
        let guard = self.slot.lock();
        drop(
            self.ready
                .wait_while(guard, |slot| matches!(slot, Slot::Pending)),
        );
    }

    pub(crate) fn is_done(&self) -> bool {
        !matches!(*self.slot.lock(), Slot::Pending)
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.lifecycle.load(Ordering::Acquire) == CANCELLED
    }

    fn resolve(&self, outcome: Result<T, PoolError>) {
        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Pending) {
            *slot = Slot::Ready(outcome);
            self.ready.notify_all();
        }
    }

    /// Extracts the outcome of a resolved unit.
    fn take(&self) -> Result<T, PoolError> {
        let mut slot = self.slot.lock();
        match mem::replace(&mut *slot, Slot::Taken) {
            Slot::Ready(outcome) => outcome,
            Slot::Pending | Slot::Taken => unreachable!("work unit resolved without an outcome"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>() {}

    fn unit(value: i32) -> (WorkUnit<i32>, Arc<UnitShared<i32>>) {
        let shared = Arc::new(UnitShared::new(Box::new(move || Ok(value))));
        (WorkUnit::new(shared.clone()), shared)
    }

    #[test]
    fn resolves_with_the_function_outcome() {
        let (handle, shared) = unit(7);
        let work = shared.begin().unwrap();
        shared.finish(work().map_err(PoolError::User));
        assert!(handle.is_done());
        assert_eq!(handle.into_result().unwrap(), 7);
    }

    #[test]
    fn cancel_before_start_skips_the_function() {
        let (handle, shared) = unit(7);
        handle.cancel();
        assert!(handle.is_cancelled());
        // The gate is closed; a worker draining this unit gets nothing to run.
        assert!(shared.begin().is_none());
        assert!(matches!(
            handle.into_result().unwrap_err(),
            PoolError::Cancelled
        ));
    }

    #[test]
    fn cancel_after_start_is_a_no_op() {
        let (handle, shared) = unit(7);
        let work = shared.begin().unwrap();
        handle.cancel();
        assert!(!handle.is_cancelled());
        shared.finish(work().map_err(PoolError::User));
        assert_eq!(handle.into_result().unwrap(), 7);
    }

    #[test]
    fn cancel_is_idempotent() {
        let (handle, _shared) = unit(7);
        handle.cancel();
        handle.cancel();
        handle.wait();
        assert!(matches!(
            handle.into_result().unwrap_err(),
            PoolError::Cancelled
        ));
    }

    #[test]
    fn wait_after_resolution_does_not_block() {
        let (handle, shared) = unit(7);
        let work = shared.begin().unwrap();
        shared.finish(work().map_err(PoolError::User));
        handle.wait();
        handle.wait();
    }

    #[test]
    fn unit_is_send() {
        assert_send::<WorkUnit<i32>>();
    }
}

//! The worker execution context.
//!
//! Each worker is an OS thread bound to the pool's dispatch channel and
//! cancel signal. A worker whose work function panics reports the panic
//! through the affected unit, spawns a replacement bound to the same
//! channels, and exits, so the pool's worker count holds steady.

use std::{
    any::Any,
    io,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread,
};

use crossbeam_channel::{select, Receiver};

use crate::{
    error::{PoolError, Recovery},
    unit::UnitShared,
};

/// Everything a worker needs to run, and to spawn its own replacement.
pub(crate) struct WorkerContext<T> {
    pub(crate) name: String,
    pub(crate) work: Receiver<Arc<UnitShared<T>>>,
    pub(crate) cancel: Receiver<()>,
}

impl<T> Clone for WorkerContext<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            work: self.work.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

pub(crate) fn spawn<T: Send + 'static>(ctx: WorkerContext<T>) -> io::Result<()> {
    thread::Builder::new()
        .name(ctx.name.clone())
        .spawn(move || run(ctx))?;
    Ok(())
}

fn run<T: Send + 'static>(ctx: WorkerContext<T>) {
    log::trace!("worker '{}' starting", ctx.name);
    loop {
        select! {
            recv(ctx.work) -> msg => match msg {
                Ok(unit) => {
                    if execute(&ctx, &unit) {
                        // The work function panicked; hand the channels to a
                        // replacement and let this thread die.
                        if let Err(err) = spawn(ctx.clone()) {
                            log::error!(
                                "worker '{}' could not spawn its replacement: {err}",
                                ctx.name,
                            );
                        }
                        break;
                    }
                }
                // The dispatch channel is gone: the pool was dropped or reset.
                Err(_) => break,
            },
            recv(ctx.cancel) -> _ => break,
        }
    }
    log::trace!("worker '{}' exiting", ctx.name);
}

/// Runs one drained unit. Returns `true` if the work function panicked.
fn execute<T>(ctx: &WorkerContext<T>, unit: &UnitShared<T>) -> bool {
    let Some(work) = unit.begin() else {
        // A cancel won the gate and already resolved the unit.
        return false;
    };

    match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(outcome) => {
            unit.finish(outcome.map_err(PoolError::User));
            false
        }
        Err(payload) => {
            let recovery = Recovery::capture(panic_message(payload.as_ref()));
            log::error!(
                "worker '{}' recovered from a panicking work unit: {}",
                ctx.name,
                recovery.cause(),
            );
            unit.finish(Err(PoolError::Recovered(recovery)));
            true
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use std::panic::resume_unwind;

    use crossbeam_channel::bounded;

    use crate::unit::WorkUnit;

    use super::*;

    fn context() -> WorkerContext<i32> {
        let (_work_tx, work) = bounded(1);
        let (_cancel_tx, cancel) = bounded(0);
        WorkerContext {
            name: "test-worker".into(),
            work,
            cancel,
        }
    }

    fn unit_of(work: impl FnOnce() -> crate::WorkResult<i32> + Send + 'static) -> WorkUnit<i32> {
        WorkUnit::new(Arc::new(UnitShared::new(Box::new(work))))
    }

    #[test]
    fn execute_resolves_the_unit() {
        let handle = unit_of(|| Ok(3));
        assert!(!execute(&context(), handle.shared()));
        assert_eq!(handle.into_result().unwrap(), 3);
    }

    #[test]
    fn execute_skips_a_cancelled_unit() {
        let handle = unit_of(|| unreachable!("cancelled units must not run"));
        handle.cancel();
        assert!(!execute(&context(), handle.shared()));
        assert!(matches!(
            handle.into_result().unwrap_err(),
            PoolError::Cancelled
        ));
    }

    #[test]
    fn execute_reports_a_panic_as_recovered() {
        let handle = unit_of(|| resume_unwind(Box::new("worker panic".to_owned())));
        assert!(execute(&context(), handle.shared()));
        let err = handle.into_result().unwrap_err();
        assert!(err
            .to_string()
            .starts_with("failed due to a recoverable error: worker panic"));
    }

    #[test]
    fn panic_messages_survive_both_payload_shapes() {
        assert_eq!(panic_message(&"static" as &(dyn Any + Send)), "static");
        assert_eq!(
            panic_message(&"owned".to_owned() as &(dyn Any + Send)),
            "owned"
        );
    }
}

//! A bounded worker pool with per-unit completion handles, cooperative
//! cancellation, and batch grouping.
//!
//! (if you're looking for homogeneous data parallelism with an iterator-like
//! interface, check out [`rayon`] instead; this library is for a long-lived,
//! fixed-size pool whose callers want to observe, and cancel, each submitted
//! call individually)
//!
//! # Overview
//!
//! A [`Pool`] owns a fixed set of worker threads fed by a bounded dispatch
//! channel. [`Pool::queue`] wraps a work function into a [`WorkUnit`] and
//! returns it immediately; the unit resolves when a worker completes it, when
//! it is cancelled, or when a closed pool rejects it. A [`Batch`] groups
//! units queued onto the same pool, delivers their completions on one stream,
//! and can be cancelled as a group without touching the rest of the pool.
//!
//! Work functions are treated as opaque, possibly panicking computations. A
//! panic is contained to the unit that caused it: the unit resolves with
//! [`PoolError::Recovered`], a replacement worker is spawned, and the pool
//! keeps its throughput. The error taxonomy ([`PoolError`]) keeps rejection,
//! cancellation, recovery, and plain user errors distinguishable.
//!
//! # Units
//!
//! ```
//! use puddle::Pool;
//!
//! let pool: Pool<String> = Pool::new(4).unwrap();
//!
//! let user = pool.queue(|| Ok("Joeybloggs".to_string()));
//! let other = pool.queue(|| Ok("other info".to_string()));
//!
//! assert_eq!(user.into_result().unwrap(), "Joeybloggs");
//! assert_eq!(other.into_result().unwrap(), "other info");
//! pool.close();
//! ```
//!
//! # Batches
//!
//! ```
//! use puddle::Pool;
//!
//! let pool: Pool<usize> = Pool::new(4).unwrap();
//! let batch = pool.batch();
//!
//! // Queueing from another thread is fine; just seal the batch once all
//! // work has been queued, or the results stream will never end.
//! for i in 0..10 {
//!     batch.queue(move || Ok(i));
//! }
//! batch.queue_complete();
//!
//! let total: usize = batch
//!     .results()
//!     .map(|unit| unit.into_result().unwrap())
//!     .sum();
//! assert_eq!(total, 45);
//! pool.close();
//! ```
//!
//! # Cancellation
//!
//! Cancellation is cooperative and race-free: a unit that a worker has
//! already started always runs to completion, and a unit cancelled first is
//! guaranteed never to run. [`WorkUnit::cancel`] targets one unit,
//! [`Batch::cancel`] a group, and [`Pool::cancel`] shuts the whole pool down,
//! draining whatever is still queued. A cancelled (or closed) pool can be
//! returned to service with [`Pool::reset`].
//!
//! [`rayon`]: https://crates.io/crates/rayon

mod batch;
mod error;
mod pool;
mod sync;
mod unit;
mod worker;

pub use batch::*;
pub use error::*;
pub use pool::*;
pub use unit::*;

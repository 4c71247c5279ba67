//! A reusable rendezvous barrier for a fixed party of threads, built on the standard library.
//!
//! The main type in this library is [`CyclicBarrier`]: a point where a fixed number of threads
//! wait for each other, optionally run a shared action once they're all there, and then continue
//! together. Unlike `std::sync::Barrier`, a round of a `CyclicBarrier` can be *broken*, by a
//! participant that gives up on the round, by a waiting participant being cancelled, or by a
//! failing action. A broken round wakes everyone in it with an error instead of leaving them
//! waiting for a thread that will never come.
//!
//! Supporting types:
//!
//! * [`Context`], a cancellation token with optional deadline, handed to [`CyclicBarrier::wait`]
//!   so a waiting thread can be interrupted.
//! * [`OnceSignal`], the single-fire broadcast each round uses to announce its outcome.
//! * [`BarrierError`] and [`CancelCause`], describing why a wait didn't succeed.
//!
//! Misusing a barrier (creating one with zero participants, or arriving from more threads than it
//! has participants) is a programming error, and panics.
//!
//! [`CyclicBarrier`]: barrier/struct.CyclicBarrier.html
//! [`CyclicBarrier::wait`]: barrier/struct.CyclicBarrier.html#method.wait
//! [`Context`]: context/struct.Context.html
//! [`OnceSignal`]: signal/struct.OnceSignal.html
//! [`BarrierError`]: error/enum.BarrierError.html
//! [`CancelCause`]: error/enum.CancelCause.html
//!
//! # Logging
//!
//! Round transitions are reported through the [`log`] facade: arrivals at `trace`, releases and
//! breaks at `debug`, failing or panicking actions at `warn`. Nothing is printed unless the
//! application installs a logger.
//!
//! [`log`]: https://docs.rs/log

#![deny(warnings, missing_docs)]

mod util;

pub mod barrier;
pub mod context;
pub mod error;
pub mod signal;

pub use barrier::{BarrierBuilder, CyclicBarrier, NONPOSITIVE_PARTICIPANTS, TOO_MANY_ARRIVALS};
pub use context::Context;
pub use error::{ActionError, ActionResult, BarrierError, CancelCause};
pub use signal::OnceSignal;

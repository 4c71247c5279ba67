//! The cyclic barrier itself, and the per-round state behind it.
//!
//! See the documentation of the [`CyclicBarrier`] struct for more information.
//!
//! [`CyclicBarrier`]: struct.CyclicBarrier.html

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::{Arc, RwLock};
use std::thread;

use log::{debug, trace, warn};

use crate::context::Context;
use crate::error::{ActionResult, BarrierError};
use crate::signal::OnceSignal;
use crate::util;

/// Panic message for a barrier constructed with zero participants.
pub const NONPOSITIVE_PARTICIPANTS: &str = "barrier participant count must be positive";

/// Panic message for a round that received more arrivals than the barrier has participants.
pub const TOO_MANY_ARRIVALS: &str =
    "more threads arrived at the barrier than it has participants; make sure they are equal";

type Action = dyn Fn(&CyclicBarrier) -> ActionResult + Send + Sync;

/// A reusable rendezvous point for a fixed number of threads.
///
/// A `CyclicBarrier` is created for a fixed number of *participants*. Each participant calls
/// [`wait`] when it reaches the rendezvous point, and blocks there until every other participant
/// of the same round has arrived too. The last one to arrive runs the barrier's *action*, if one
/// is set, and then releases everyone at once. The barrier then starts a new round on its own, so
/// the same barrier can be used again for the next rendezvous.
///
/// A round can also be *broken*, in which case nobody in it is released successfully:
///
/// * a participant that cannot finish its part of the work calls [`break_round`] instead of
///   `wait`. This counts as its arrival, but it doesn't block.
/// * a participant's [`Context`] is cancelled, or its deadline passes, while it waits.
/// * the action returns an error.
///
/// Every participant blocked in a broken round wakes up with [`BarrierError::Broken`], except for
/// the one that caused the break, which gets its own cancellation or action error instead. Anyone
/// who arrives in a round after it broke gets `Broken` straight away. The round still has to be
/// filled up before the barrier moves on: the broken round is replaced by a fresh one when its
/// last participant arrives, the same as a successful one.
///
/// The action receives the barrier itself, so it can tell the two kinds of round apart with
/// [`is_broken`]. It runs on the thread of the last arrival, before anyone else in the round
/// wakes up, and it runs for broken rounds as well.
///
/// Calling `wait` or `break_round` from more threads than there are participants in one round is
/// a bug in the calling code, and panics.
///
/// [`wait`]: #method.wait
/// [`break_round`]: #method.break_round
/// [`is_broken`]: #method.is_broken
/// [`Context`]: ../context/struct.Context.html
/// [`BarrierError::Broken`]: ../error/enum.BarrierError.html#variant.Broken
///
/// # Example
///
/// Five threads each run three rounds of "work", meeting at the barrier after every round. The
/// action counts completed rounds.
///
/// ```
/// use rendezvous_barrier::{Context, CyclicBarrier};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::thread;
/// use std::time::Duration;
///
/// let participants = 5;
/// let rounds = 3;
///
/// let count = Arc::new(AtomicUsize::new(0));
/// let barrier = CyclicBarrier::new(participants);
/// {
///     let count = count.clone();
///     barrier.set_action(move |_| {
///         let done = count.fetch_add(1, Ordering::SeqCst) + 1;
///         println!("round {} done", done);
///         Ok(())
///     });
/// }
///
/// thread::scope(|s| {
///     for id in 0..participants {
///         let barrier = &barrier;
///         s.spawn(move || {
///             let ctx = Context::new();
///             for _ in 0..rounds {
///                 thread::sleep(Duration::from_millis(10 * id as u64));
///                 println!("thread {} arrived", id);
///                 barrier.wait(&ctx).unwrap();
///             }
///         });
///     }
/// });
///
/// assert_eq!(count.load(Ordering::SeqCst), rounds);
/// ```
pub struct CyclicBarrier {
    participants: usize,
    name: Option<String>,
    state: RwLock<State>,
}

struct State {
    round: Round,
    action: Option<Arc<Action>>,
}

/// One cycle of the barrier. Replaced wholesale when its last participant arrives.
struct Round {
    arrivals: usize,
    signals: Arc<Signals>,
}

/// The outcome broadcasts of a round. Exactly one of them fires before the round is replaced.
///
/// Waiters hold on to these past the end of the round, which is why they live apart from the
/// arrival count.
#[derive(Debug, Default)]
struct Signals {
    release: OnceSignal,
    broken: OnceSignal,
}

impl Round {
    fn new() -> Round {
        Round {
            arrivals: 0,
            signals: Arc::new(Signals::default()),
        }
    }
}

/// Configuration for a [`CyclicBarrier`].
///
/// [`CyclicBarrier`]: struct.CyclicBarrier.html
///
/// # Example
///
/// ```
/// use rendezvous_barrier::CyclicBarrier;
///
/// let barrier = CyclicBarrier::builder(4)
///     .name("frame-sync")
///     .action(|b| {
///         if b.is_broken() {
///             println!("frame dropped");
///         }
///         Ok(())
///     })
///     .build();
///
/// assert_eq!(barrier.participants(), 4);
/// assert_eq!(barrier.name(), Some("frame-sync"));
/// ```
pub struct BarrierBuilder {
    participants: usize,
    name: Option<String>,
    action: Option<Arc<Action>>,
}

impl BarrierBuilder {
    /// Starts configuring a barrier for the given number of participants.
    pub fn new(participants: usize) -> BarrierBuilder {
        BarrierBuilder {
            participants,
            name: None,
            action: None,
        }
    }

    /// Sets a name for the barrier, used to tell barriers apart in log output.
    pub fn name<S: Into<String>>(mut self, name: S) -> BarrierBuilder {
        self.name = Some(name.into());
        self
    }

    /// Sets the action to run at the end of every round.
    ///
    /// See [`CyclicBarrier::set_action`] for how the action is run.
    ///
    /// [`CyclicBarrier::set_action`]: struct.CyclicBarrier.html#method.set_action
    pub fn action<F>(mut self, action: F) -> BarrierBuilder
    where
        F: Fn(&CyclicBarrier) -> ActionResult + Send + Sync + 'static,
    {
        self.action = Some(Arc::new(action));
        self
    }

    /// Creates the configured barrier.
    ///
    /// # Panics
    ///
    /// Panics if the participant count is zero.
    pub fn build(self) -> CyclicBarrier {
        if self.participants == 0 {
            panic!("{}", NONPOSITIVE_PARTICIPANTS);
        }

        CyclicBarrier {
            participants: self.participants,
            name: self.name,
            state: RwLock::new(State {
                round: Round::new(),
                action: self.action,
            }),
        }
    }
}

impl CyclicBarrier {
    /// Creates a new barrier for the given number of participants, with no action.
    ///
    /// # Panics
    ///
    /// Panics if `participants` is zero.
    pub fn new(participants: usize) -> CyclicBarrier {
        BarrierBuilder::new(participants).build()
    }

    /// Starts configuring a barrier for the given number of participants.
    pub fn builder(participants: usize) -> BarrierBuilder {
        BarrierBuilder::new(participants)
    }

    /// Returns the number of participants in every round.
    pub fn participants(&self) -> usize {
        self.participants
    }

    /// Returns the name given to this barrier by [`BarrierBuilder::name`], if any.
    ///
    /// [`BarrierBuilder::name`]: struct.BarrierBuilder.html#method.name
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns how many participants have arrived in the current round so far.
    pub fn arrived(&self) -> usize {
        util::guts(self.state.read()).round.arrivals
    }

    /// Returns whether the current round has been broken.
    ///
    /// Once the last participant of a broken round arrives, the barrier starts a fresh round and
    /// this goes back to `false`. Inside the action, it still describes the round that is ending.
    pub fn is_broken(&self) -> bool {
        util::guts(self.state.read()).round.signals.broken.is_fired()
    }

    /// Sets the action to run at the end of every round, replacing any previous one. Returns the
    /// barrier, so this can be chained after `new`.
    ///
    /// The action is run by the last participant to arrive in a round, on that participant's
    /// thread, before any other participant of the round is woken up. It runs whether or not the
    /// round was broken; call [`is_broken`] on the barrier it's given to find out. If the action
    /// returns an error, the round breaks: the participant that ran it gets the error back in a
    /// [`BarrierError::Action`], and everyone else gets `Broken`. If it panics, the round breaks
    /// and the panic continues on the thread that ran it.
    ///
    /// The new action takes effect for any round whose last participant hasn't arrived yet,
    /// including the current one.
    ///
    /// [`is_broken`]: #method.is_broken
    /// [`BarrierError::Action`]: ../error/enum.BarrierError.html#variant.Action
    pub fn set_action<F>(&self, action: F) -> &CyclicBarrier
    where
        F: Fn(&CyclicBarrier) -> ActionResult + Send + Sync + 'static,
    {
        util::guts(self.state.write()).action = Some(Arc::new(action));
        self
    }

    /// Removes the action, if one was set.
    pub fn clear_action(&self) {
        util::guts(self.state.write()).action = None;
    }

    /// Arrives at the barrier and blocks until every participant of this round has arrived.
    ///
    /// If this is the last participant of the round, this runs the action (if any) and then
    /// releases the round without blocking.
    ///
    /// # Errors
    ///
    /// * [`BarrierError::Broken`] if another participant broke this round, whether before or
    ///   after this one arrived. This includes the case where this is the last participant and
    ///   finds the round already broken.
    /// * [`BarrierError::Cancelled`] if `ctx` finished while this participant was waiting. This
    ///   breaks the round for everyone else. If the round had already been released by the time
    ///   the cancellation was noticed, the release wins and this returns `Ok(())`.
    /// * [`BarrierError::Action`] if this was the last participant and the action failed.
    ///
    /// # Panics
    ///
    /// Panics if more participants arrive in this round than the barrier was created for.
    ///
    /// [`BarrierError::Broken`]: ../error/enum.BarrierError.html#variant.Broken
    /// [`BarrierError::Cancelled`]: ../error/enum.BarrierError.html#variant.Cancelled
    /// [`BarrierError::Action`]: ../error/enum.BarrierError.html#variant.Action
    pub fn wait(&self, ctx: &Context) -> Result<(), BarrierError> {
        let (arrival, signals) = self.arrive();

        if arrival < self.participants {
            return self.await_outcome(&signals, ctx);
        }

        let action = self.run_action(&signals);
        let released = self.retire(&signals);

        match action {
            Err(err) => Err(BarrierError::Action(err)),
            Ok(()) if released => Ok(()),
            Ok(()) => Err(BarrierError::Broken),
        }
    }

    /// Arrives at the barrier without waiting, breaking the current round.
    ///
    /// This is what a participant calls instead of [`wait`] when it couldn't do its part of the
    /// round. It still counts as an arrival, so the round keeps its participant count straight
    /// and can be replaced once everyone has shown up. Participants already waiting are woken with
    /// `Broken`, and any later arrivals in the round get `Broken` immediately.
    ///
    /// If this is the last participant of the round, the action still runs here, seeing
    /// [`is_broken`] return `true`. An error from the action is logged and otherwise dropped,
    /// since there is nobody left to report it to.
    ///
    /// Because this returns right away, the caller is still counted in the current round. Arriving
    /// again before the rest of the round has shown up counts twice, and can overfill the round.
    ///
    /// # Panics
    ///
    /// Panics if more participants arrive in this round than the barrier was created for.
    ///
    /// [`wait`]: #method.wait
    /// [`is_broken`]: #method.is_broken
    pub fn break_round(&self) {
        let (arrival, signals) = self.arrive();
        self.break_signals(&signals);

        if arrival == self.participants {
            if let Err(err) = self.run_action(&signals) {
                warn!("{}: action failed in a round ended by break: {}", self.label(), err);
            }
            self.retire(&signals);
        }
    }

    /// Registers one arrival in the current round, returning its position and the round's
    /// outcome signals.
    fn arrive(&self) -> (usize, Arc<Signals>) {
        let (arrival, signals) = {
            let mut state = util::guts(self.state.write());
            state.round.arrivals += 1;
            (state.round.arrivals, state.round.signals.clone())
        };

        trace!("{}: arrival {}/{}", self.label(), arrival, self.participants);

        // the increment is serialized, but the round can't be replaced until its last arrival has
        // run the action, so a surplus caller lands here instead of in the next round
        if arrival > self.participants {
            panic!("{}", TOO_MANY_ARRIVALS);
        }

        (arrival, signals)
    }

    /// Blocks until the round behind `signals` releases or breaks, or `ctx` finishes.
    fn await_outcome(&self, signals: &Signals, ctx: &Context) -> Result<(), BarrierError> {
        let me = thread::current();
        let _registration = ctx.register(&me);

        loop {
            signals.release.watch(&me);
            signals.broken.watch(&me);

            if signals.release.is_fired() {
                return Ok(());
            }
            if signals.broken.is_fired() {
                return Err(BarrierError::Broken);
            }
            if let Some(cause) = ctx.cause() {
                debug!("{}: participant cancelled while waiting: {}", self.label(), cause);
                return if self.break_signals(signals) {
                    Err(BarrierError::Cancelled(cause))
                } else {
                    Ok(())
                };
            }

            ctx.park();
        }
    }

    /// Breaks the round behind `signals`, unless it already released. Returns whether the round
    /// ended up broken.
    ///
    /// Idempotent: only the first break of a round fires its signal.
    fn break_signals(&self, signals: &Signals) -> bool {
        let _state = util::guts(self.state.write());

        // release only fires under this lock, so this can't race with retirement
        if signals.release.is_fired() {
            return false;
        }

        if signals.broken.fire() {
            debug!("{}: round broken", self.label());
        }

        true
    }

    /// Runs the action for the round behind `signals`, breaking the round if it fails.
    fn run_action(&self, signals: &Signals) -> ActionResult {
        // clone it out so the action can call back into the barrier without deadlocking
        let action = match util::guts(self.state.read()).action.clone() {
            Some(action) => action,
            None => return Ok(()),
        };

        match panic::catch_unwind(AssertUnwindSafe(|| action(self))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                warn!("{}: action failed, breaking round: {}", self.label(), err);
                self.break_signals(signals);
                Err(err)
            }
            Err(payload) => {
                // wake the rest of the round before unwinding, or they'd wait forever
                warn!("{}: action panicked, breaking round", self.label());
                self.break_signals(signals);
                self.retire(signals);
                panic::resume_unwind(payload)
            }
        }
    }

    /// Ends the round behind `signals`, releasing it if it wasn't broken, and installs a fresh
    /// round. Returns whether the round was released.
    ///
    /// Only the last arrival of a round calls this, exactly once.
    fn retire(&self, signals: &Signals) -> bool {
        let mut state = util::guts(self.state.write());
        debug_assert!(ptr::eq(&*state.round.signals, signals));

        let released = !signals.broken.is_fired();
        if released {
            signals.release.fire();
        }
        state.round = Round::new();

        debug!(
            "{}: round {}",
            self.label(),
            if released { "released" } else { "retired broken" }
        );

        released
    }

    fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("barrier")
    }
}

impl fmt::Debug for CyclicBarrier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = util::guts(self.state.read());
        f.debug_struct("CyclicBarrier")
            .field("participants", &self.participants)
            .field("name", &self.name)
            .field("arrived", &state.round.arrivals)
            .field("broken", &state.round.signals.broken.is_fired())
            .field("has_action", &state.action.is_some())
            .finish()
    }
}

impl fmt::Debug for BarrierBuilder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BarrierBuilder")
            .field("participants", &self.participants)
            .field("name", &self.name)
            .field("has_action", &self.action.is_some())
            .finish()
    }
}

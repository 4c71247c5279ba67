//! Cancellation tokens that can interrupt a blocked [`CyclicBarrier::wait`].
//!
//! [`CyclicBarrier::wait`]: ../barrier/struct.CyclicBarrier.html#method.wait

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::CancelCause;
use crate::util;

/// A cancellation token with an optional deadline.
///
/// A `Context` is handed to blocking operations so the caller can give up on them: either by
/// calling [`cancel`] from another thread, or by letting a deadline pass. Cloning a `Context`
/// yields another handle to the same token, so one clone can be given to a worker while another
/// is kept around to cancel it.
///
/// Contexts form a tree. A child created with [`child`] (or one of its deadline variants) is
/// cancelled whenever its parent is, and its deadline is never later than its parent's.
/// Cancelling a child leaves the parent untouched.
///
/// Once a context is done, it stays done. The first reason it finished is the one reported by
/// [`cause`].
///
/// [`cancel`]: #method.cancel
/// [`child`]: #method.child
/// [`cause`]: #method.cause
///
/// # Example
///
/// ```
/// use rendezvous_barrier::{CancelCause, Context};
/// use std::time::Duration;
///
/// let root = Context::new();
/// let job = root.child_with_timeout(Duration::from_secs(60));
///
/// assert_eq!(job.cause(), None);
/// root.cancel();
/// assert_eq!(job.cause(), Some(CancelCause::Cancelled));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Context {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    parent: Option<Context>,
    deadline: Option<Instant>,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    cause: Option<CancelCause>,
    next_id: u64,
    waiting: Vec<(u64, thread::Thread)>,
}

impl Context {
    /// Creates a context that is only ever finished by calling `cancel`.
    pub fn new() -> Context {
        Context::default()
    }

    /// Creates a context that finishes on its own once `deadline` has passed.
    pub fn with_deadline(deadline: Instant) -> Context {
        Context::build(None, Some(deadline))
    }

    /// Creates a context that finishes on its own once `timeout` has elapsed.
    ///
    /// A timeout too large to represent as a point in time (such as `Duration::MAX`) means no
    /// deadline at all.
    pub fn with_timeout(timeout: Duration) -> Context {
        Context::build(None, Instant::now().checked_add(timeout))
    }

    /// Creates a child of this context, with the same deadline.
    pub fn child(&self) -> Context {
        Context::build(Some(self.clone()), None)
    }

    /// Creates a child of this context that also finishes once `deadline` has passed.
    ///
    /// If this context already has an earlier deadline, the child keeps that one.
    pub fn child_with_deadline(&self, deadline: Instant) -> Context {
        Context::build(Some(self.clone()), Some(deadline))
    }

    /// Creates a child of this context that also finishes once `timeout` has elapsed.
    ///
    /// As with `with_timeout`, an unrepresentably large timeout adds no deadline of its own.
    pub fn child_with_timeout(&self, timeout: Duration) -> Context {
        Context::build(Some(self.clone()), Instant::now().checked_add(timeout))
    }

    fn build(parent: Option<Context>, deadline: Option<Instant>) -> Context {
        let inherited = parent.as_ref().and_then(Context::deadline);
        let deadline = match (inherited, deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        Context {
            inner: Arc::new(Inner {
                parent,
                deadline,
                state: Mutex::default(),
            }),
        }
    }

    /// Returns the point in time after which this context is finished, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Cancels this context and all of its children, waking any thread blocked on them.
    ///
    /// Cancelling an already-finished context does nothing.
    pub fn cancel(&self) {
        self.finish(CancelCause::Cancelled);
    }

    /// Returns why this context finished, or `None` if it is still live.
    pub fn cause(&self) -> Option<CancelCause> {
        if let Some(cause) = util::guts(self.inner.state.lock()).cause {
            return Some(cause);
        }

        if let Some(cause) = self.inner.parent.as_ref().and_then(Context::cause) {
            return Some(cause);
        }

        match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Some(self.finish(CancelCause::DeadlineExceeded))
            }
            _ => None,
        }
    }

    /// Returns whether this context has finished, for any reason.
    pub fn is_cancelled(&self) -> bool {
        self.cause().is_some()
    }

    /// Blocks the current thread until this context finishes, returning the reason.
    pub fn wait(&self) -> CancelCause {
        let me = thread::current();
        let _registration = self.register(&me);

        loop {
            if let Some(cause) = self.cause() {
                return cause;
            }
            self.park();
        }
    }

    /// Parks the current thread until it is unparked, or until the deadline of this context.
    pub(crate) fn park(&self) {
        match self.inner.deadline {
            Some(deadline) => {
                let now = Instant::now();
                if deadline > now {
                    thread::park_timeout(deadline - now);
                }
            }
            None => thread::park(),
        }
    }

    /// Arranges for `thread` to be unparked when this context, or any of its ancestors, is
    /// cancelled. The registration is withdrawn when the returned guard drops.
    ///
    /// Register before checking `cause`, so a cancellation racing the check still wakes the
    /// thread.
    pub(crate) fn register(&self, thread: &thread::Thread) -> Registration {
        let mut entries = Vec::new();
        let mut current = Some(self);

        while let Some(ctx) = current {
            let mut state = util::guts(ctx.inner.state.lock());
            let id = state.next_id;
            state.next_id += 1;
            state.waiting.push((id, thread.clone()));
            entries.push((ctx.inner.clone(), id));

            current = ctx.inner.parent.as_ref();
        }

        Registration { entries }
    }

    /// Latches `cause` if nothing was latched yet, waking every registered thread. Returns the
    /// cause that ended up latched.
    fn finish(&self, cause: CancelCause) -> CancelCause {
        let mut state = util::guts(self.inner.state.lock());

        if let Some(prior) = state.cause {
            return prior;
        }

        state.cause = Some(cause);
        for (_, thread) in state.waiting.drain(..) {
            thread.unpark();
        }

        cause
    }
}

/// Guard that withdraws a thread's wakeup registration from a chain of contexts on drop.
#[derive(Debug)]
pub(crate) struct Registration {
    entries: Vec<(Arc<Inner>, u64)>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        for (inner, id) in self.entries.drain(..) {
            util::guts(inner.state.lock()).waiting.retain(|(other, _)| *other != id);
        }
    }
}

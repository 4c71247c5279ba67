//! A single-fire broadcast signal, used by [`CyclicBarrier`] rounds to announce their outcome.
//!
//! [`CyclicBarrier`]: ../barrier/struct.CyclicBarrier.html

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;

/// A signal that can be set exactly once, waking every thread waiting on it.
///
/// `OnceSignal` behaves like a manually-reset event that can never be reset: once `fire` has been
/// called, every current and future call to `wait` returns immediately. Only the first call to
/// `fire` does anything, and it reports that it was the one to set the signal, so a caller can
/// tell "I broadcast this" apart from "someone already had".
///
/// Threads that need to wait on more than one thing at once (a barrier participant waits on a
/// release signal, a break signal, and its own cancellation) can skip `wait` and `watch` each
/// source with their own handle instead, then park until one of them unparks it.
///
/// # Example
///
/// ```
/// use rendezvous_barrier::OnceSignal;
/// use std::sync::Arc;
/// use std::thread;
///
/// let go = Arc::new(OnceSignal::new());
///
/// let handles: Vec<_> = (0..3).map(|_| {
///     let go = go.clone();
///     thread::spawn(move || go.wait())
/// }).collect();
///
/// assert!(go.fire());
/// assert!(!go.fire());
///
/// for h in handles {
///     h.join().unwrap();
/// }
/// ```
#[derive(Debug, Default)]
pub struct OnceSignal {
    fired: AtomicBool,
    waiting: SegQueue<thread::Thread>,
}

impl OnceSignal {
    /// Creates a new, unset `OnceSignal`.
    pub fn new() -> OnceSignal {
        OnceSignal {
            fired: AtomicBool::new(false),
            waiting: SegQueue::new(),
        }
    }

    /// Returns whether this signal has been fired.
    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Sets the signal and wakes every thread waiting on it.
    ///
    /// Returns `true` if this call set the signal, or `false` if it was already set. Only the call
    /// that returns `true` wakes anyone.
    pub fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }

        while let Some(thread) = self.waiting.pop() {
            thread.unpark();
        }

        true
    }

    /// Registers a thread to be unparked when this signal fires.
    ///
    /// Register *before* checking `is_fired`: a `fire` that lands between the check and the
    /// registration would otherwise drain the queue without seeing this thread. If the signal has
    /// already fired the handle just sits in the queue until the signal is dropped, which is
    /// harmless.
    pub fn watch(&self, thread: &thread::Thread) {
        self.waiting.push(thread.clone());
    }

    /// Blocks the current thread until the signal fires. Returns immediately if it already has.
    pub fn wait(&self) {
        let me = thread::current();

        // loop on the park in case we spuriously wake up, or somebody else unparked us
        loop {
            self.watch(&me);
            if self.is_fired() {
                return;
            }
            thread::park();
        }
    }

    /// Blocks the current thread until the signal fires or the timeout elapses, returning whether
    /// the signal was set when it woke up.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let me = thread::current();
        let begin = Instant::now();

        loop {
            self.watch(&me);
            if self.is_fired() {
                return true;
            }

            let elapsed = begin.elapsed();
            if elapsed >= timeout {
                return self.is_fired();
            }

            thread::park_timeout(timeout - elapsed);
        }
    }
}

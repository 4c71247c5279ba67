//! Errors returned by [`CyclicBarrier`] and [`Context`].
//!
//! [`CyclicBarrier`]: ../barrier/struct.CyclicBarrier.html
//! [`Context`]: ../context/struct.Context.html

use thiserror::Error;

/// The error type a barrier action may fail with.
pub type ActionError = Box<dyn std::error::Error + Send + Sync>;

/// What a barrier action returns. `Ok(())` lets the round release; an error breaks it.
pub type ActionResult = Result<(), ActionError>;

/// Why a [`Context`] finished.
///
/// [`Context`]: ../context/struct.Context.html
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CancelCause {
    /// `cancel` was called on the context or one of its ancestors.
    #[error("context canceled")]
    Cancelled,
    /// The deadline of the context passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// The ways a round of a [`CyclicBarrier`] can fail to release a participant.
///
/// Every variant means the round this participant arrived in was broken: no participant of that
/// round was released successfully. The variant tells which participant is holding the cause.
///
/// [`CyclicBarrier`]: ../barrier/struct.CyclicBarrier.html
#[derive(Error, Debug)]
pub enum BarrierError {
    /// Another participant broke the round, by calling `break_round`, by being cancelled while
    /// waiting, or by running an action that failed.
    #[error("barrier is broken by another participant")]
    Broken,
    /// This participant's context finished while it waited, which broke the round for everyone.
    #[error("barrier is broken: {0}")]
    Cancelled(#[source] CancelCause),
    /// This participant arrived last and ran the round action, which failed and broke the round.
    #[error("barrier action failed: {0}")]
    Action(#[source] ActionError),
}

impl BarrierError {
    /// Returns whether this error came from another participant breaking the round.
    pub fn is_broken_by_other(&self) -> bool {
        matches!(self, BarrierError::Broken)
    }

    /// Returns the cancellation cause, if this participant's own context ended the wait.
    pub fn cancel_cause(&self) -> Option<CancelCause> {
        match self {
            BarrierError::Cancelled(cause) => Some(*cause),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn messages() {
        assert_eq!(
            BarrierError::Broken.to_string(),
            "barrier is broken by another participant"
        );
        assert_eq!(
            BarrierError::Cancelled(CancelCause::Cancelled).to_string(),
            "barrier is broken: context canceled"
        );
        assert_eq!(
            BarrierError::Cancelled(CancelCause::DeadlineExceeded).to_string(),
            "barrier is broken: context deadline exceeded"
        );
        assert_eq!(
            BarrierError::Action("disk full".into()).to_string(),
            "barrier action failed: disk full"
        );
    }

    #[test]
    fn sources() {
        assert!(BarrierError::Broken.source().is_none());

        let err = BarrierError::Cancelled(CancelCause::DeadlineExceeded);
        assert_eq!(err.cancel_cause(), Some(CancelCause::DeadlineExceeded));
        assert_eq!(
            err.source().map(|e| e.to_string()),
            Some("context deadline exceeded".to_string())
        );

        let err = BarrierError::Action("nope".into());
        assert_eq!(err.source().map(|e| e.to_string()), Some("nope".to_string()));
        assert!(!err.is_broken_by_other());
        assert_eq!(err.cancel_cause(), None);
    }
}

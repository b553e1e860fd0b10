//! Scheduling primitives consumed by the IPC core
//!
//! The scheduler itself lives outside this crate. The IPC core only needs
//! to learn who is running, suspend that context until a deadline, and wake
//! a specific context with a reason.

use alloc::sync::Arc;

use super::timer::{Deadline, Ticks};
use crate::types::ContextId;

// ============================================================================
// Wake Reasons
// ============================================================================

/// Why a suspended context resumed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// Something changed on the object being waited on
    Notified,
    /// The deadline passed
    TimedOut,
    /// The object was torn down
    Closed,
    /// The wait was explicitly cancelled
    Cancelled,
}

// ============================================================================
// Scheduler Interface
// ============================================================================

/// Blocking primitive provided by the scheduler.
///
/// `wake` must have permit semantics: a wake delivered to a context that
/// has not suspended yet makes its next `suspend_current` return at once.
/// The IPC core registers a waiter, drops its locks, then suspends, and
/// relies on this to never lose a wakeup.
pub trait Scheduler: Send + Sync {
    /// Monotonic tick counter
    fn now(&self) -> Ticks;

    /// Context that is currently executing the IPC call
    fn current_context(&self) -> ContextId;

    /// Suspend the current context until woken or `deadline` passes
    fn suspend_current(&self, deadline: Deadline) -> WakeReason;

    /// Wake `context`
    fn wake(&self, context: ContextId, reason: WakeReason);
}

impl<T: Scheduler + ?Sized> Scheduler for Arc<T> {
    fn now(&self) -> Ticks {
        (**self).now()
    }

    fn current_context(&self) -> ContextId {
        (**self).current_context()
    }

    fn suspend_current(&self, deadline: Deadline) -> WakeReason {
        (**self).suspend_current(deadline)
    }

    fn wake(&self, context: ContextId, reason: WakeReason) {
        (**self).wake(context, reason)
    }
}

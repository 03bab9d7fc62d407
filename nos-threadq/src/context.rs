//! Enqueue context
//!
//! Bundles everything a single enqueue operation needs beyond the
//! queue and the thread: the dispatch level the caller claims to hold,
//! the timeout configuration, and the reaction to a detected deadlock.
//! The context is built on the stack right before the operation, in
//! the same critical section that disabled dispatching.

use alloc::boxed::Box;

use crate::dispatch::DispatchGuard;
#[cfg(feature = "mp")]
use crate::types::ObjectId;
use crate::types::Tid;
use crate::watchdog::{TimeoutDiscipline, NO_TIMEOUT};

/// Reaction to a deadlock detected during enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlockAction {
    /// Undo the enqueue and report the deadlock to the caller.
    Status,
    /// Treat the deadlock as a fatal error.
    Fatal,
}

/// Callout invoked with the enqueuing thread when its wait would
/// close a cycle in the ownership graph.
pub type DeadlockCallout = Box<dyn Fn(Tid) + Send + Sync>;

/// Callout notifying a remote node that one of its threads was
/// enqueued on or extracted from a local queue.
#[cfg(feature = "mp")]
pub type MpCallout = Box<dyn Fn(Tid, ObjectId) + Send + Sync>;

/// Per-operation configuration for an enqueue.
pub struct EnqueueContext {
    expected_level: u32,
    timeout_discipline: TimeoutDiscipline,
    timeout: u64,
    deadlock_action: DeadlockAction,
    deadlock_callout: Option<DeadlockCallout>,
    #[cfg(feature = "mp")]
    mp_callout: Option<MpCallout>,
}

impl EnqueueContext {
    /// Create a context expecting the given dispatch disable level at
    /// enqueue time, with no timeout and status deadlock reporting.
    pub fn new(expected_level: u32) -> Self {
        Self {
            expected_level,
            timeout_discipline: TimeoutDiscipline::None,
            timeout: NO_TIMEOUT,
            deadlock_action: DeadlockAction::Status,
            deadlock_callout: None,
            #[cfg(feature = "mp")]
            mp_callout: None,
        }
    }

    /// Create a context for the critical section established by
    /// `guard`.
    pub fn for_guard(guard: &DispatchGuard<'_>) -> Self {
        Self::new(guard.level())
    }

    /// Block until surrendered or extracted; never time out.
    pub fn set_no_timeout(&mut self) -> &mut Self {
        self.timeout_discipline = TimeoutDiscipline::None;
        self.timeout = NO_TIMEOUT;
        self
    }

    /// Time out after `ticks` relative clock ticks. The sentinel
    /// [`NO_TIMEOUT`] disables the timeout.
    pub fn set_timeout_ticks(&mut self, ticks: u64) -> &mut Self {
        if ticks == NO_TIMEOUT {
            return self.set_no_timeout();
        }
        self.timeout_discipline = TimeoutDiscipline::Relative;
        self.timeout = ticks;
        self
    }

    /// Time out at an absolute instant on the monotonic clock.
    pub fn set_timeout_monotonic(&mut self, deadline: u64) -> &mut Self {
        self.timeout_discipline = TimeoutDiscipline::AbsoluteMonotonic;
        self.timeout = deadline;
        self
    }

    /// Time out at an absolute instant on the realtime clock.
    pub fn set_timeout_realtime(&mut self, deadline: u64) -> &mut Self {
        self.timeout_discipline = TimeoutDiscipline::AbsoluteRealtime;
        self.timeout = deadline;
        self
    }

    /// Choose the reaction to a detected deadlock.
    pub fn set_deadlock_action(&mut self, action: DeadlockAction) -> &mut Self {
        self.deadlock_action = action;
        self
    }

    /// Install a callout fired once per detected deadlock, before the
    /// configured reaction is applied.
    pub fn set_deadlock_callout(&mut self, callout: DeadlockCallout) -> &mut Self {
        self.deadlock_callout = Some(callout);
        self
    }

    /// Install the callout fired for operations on proxy threads.
    #[cfg(feature = "mp")]
    pub fn set_mp_callout(&mut self, callout: MpCallout) -> &mut Self {
        self.mp_callout = Some(callout);
        self
    }

    /// The dispatch disable level the caller claims to hold.
    pub fn expected_level(&self) -> u32 {
        self.expected_level
    }

    /// Timeout clock discipline for this operation.
    pub fn timeout_discipline(&self) -> TimeoutDiscipline {
        self.timeout_discipline
    }

    /// Timeout interval or deadline, per the discipline.
    pub fn timeout(&self) -> u64 {
        self.timeout
    }

    /// Configured deadlock reaction.
    pub fn deadlock_action(&self) -> DeadlockAction {
        self.deadlock_action
    }

    pub(crate) fn deadlock_callout(&self) -> Option<&DeadlockCallout> {
        self.deadlock_callout.as_ref()
    }

    #[cfg(feature = "mp")]
    pub(crate) fn mp_callout(&self) -> Option<&MpCallout> {
        self.mp_callout.as_ref()
    }
}

impl core::fmt::Debug for EnqueueContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EnqueueContext")
            .field("expected_level", &self.expected_level)
            .field("timeout_discipline", &self.timeout_discipline)
            .field("timeout", &self.timeout)
            .field("deadlock_action", &self.deadlock_action)
            .finish_non_exhaustive()
    }
}

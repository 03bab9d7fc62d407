//! Scheduler job hooks
//!
//! Deadline-driven schedulers map job releases to priorities; the
//! fixed-priority default does not. The hooks live behind a trait so a
//! queue user can plug an EDF-style mapping without this crate knowing
//! the scheduler internals.

use crate::thread::ThreadTable;
use crate::types::{Priority, Tid};

/// Mapping from job lifecycle events to thread priorities.
pub trait SchedulerJobHooks: Send + Sync {
    /// A job of `tid` was released with the given deadline. Return the
    /// priority the thread should run at, or `None` to leave the
    /// priority unchanged.
    fn release_job(&self, tid: Tid, deadline: u64) -> Option<Priority> {
        let _ = (tid, deadline);
        None
    }

    /// The current job of `tid` was cancelled. Return the priority to
    /// fall back to, or `None` to leave the priority unchanged.
    fn cancel_job(&self, tid: Tid) -> Option<Priority> {
        let _ = tid;
        None
    }
}

/// Hooks of the fixed-priority default scheduler: job releases do not
/// affect priorities.
pub struct DefaultJobHooks;

impl SchedulerJobHooks for DefaultJobHooks {}

/// Hooks shared by every fixed-priority scheduler instance.
pub static DEFAULT_JOB_HOOKS: DefaultJobHooks = DefaultJobHooks;

/// Apply a job release: translate the deadline through `hooks` and
/// propagate a resulting priority change, wait queues included.
pub fn release_job(
    table: &ThreadTable,
    hooks: &dyn SchedulerJobHooks,
    tid: Tid,
    deadline: u64,
) -> bool {
    match hooks.release_job(tid, deadline) {
        Some(priority) => table.set_priority(tid, priority),
        None => table.get(tid).is_some(),
    }
}

/// Apply a job cancellation through `hooks`.
pub fn cancel_job(table: &ThreadTable, hooks: &dyn SchedulerJobHooks, tid: Tid) -> bool {
    match hooks.cancel_job(tid) {
        Some(priority) => table.set_priority(tid, priority),
        None => table.get(tid).is_some(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EdfHooks;

    impl SchedulerJobHooks for EdfHooks {
        fn release_job(&self, _tid: Tid, deadline: u64) -> Option<Priority> {
            Some(deadline)
        }

        fn cancel_job(&self, _tid: Tid) -> Option<Priority> {
            Some(crate::types::PRIORITY_MAXIMUM)
        }
    }

    #[test]
    fn test_default_hooks_leave_priority_unchanged() {
        let table = ThreadTable::new(1);
        let tid = table.create_thread(10);
        assert!(release_job(&table, &DEFAULT_JOB_HOOKS, tid, 42));
        assert_eq!(table.current_priority(tid), Some(10));
        assert!(cancel_job(&table, &DEFAULT_JOB_HOOKS, tid));
        assert_eq!(table.current_priority(tid), Some(10));
    }

    #[test]
    fn test_deadline_hooks_drive_priority() {
        let table = ThreadTable::new(1);
        let tid = table.create_thread(10);
        assert!(release_job(&table, &EdfHooks, tid, 7));
        assert_eq!(table.current_priority(tid), Some(7));
        assert!(cancel_job(&table, &EdfHooks, tid));
        assert_eq!(
            table.current_priority(tid),
            Some(crate::types::PRIORITY_MAXIMUM)
        );
    }
}

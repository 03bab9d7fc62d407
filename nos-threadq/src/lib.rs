//! # NOS Thread Queues
//!
//! Priority-aware blocking queues for kernel synchronization objects.
//!
//! Every mutex, semaphore, message queue or barrier needs the same
//! machinery underneath: a set of blocked threads ordered by some
//! discipline, an optional owner, timeouts, and on SMP configurations
//! deadlock detection and priority inheritance across chains of owned
//! objects. This crate provides that machinery once, so the objects on
//! top stay small.
//!
//! ## Design highlights
//!
//! - **Recyclable heads**: queues store no blocked-set memory of their
//!   own. Each thread carries one spare heads object and donates it on
//!   enqueue; dequeues always hand one back. Waiting never allocates.
//! - **Pluggable disciplines**: FIFO and priority ordering, each in a
//!   uniprocessor and an SMP flavor, behind one operations trait bound
//!   per queue at construction.
//! - **Deadlock detection**: enqueueing on an owned queue walks the
//!   ownership graph through a global link registry; a wait that would
//!   close a cycle is refused before anyone blocks.
//! - **Priority inheritance**: a blocked thread lends its priority to
//!   every owner on its ownership chain, and a surrender takes the
//!   loan back.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use nos_threadq::{Discipline, EnqueueContext, ThreadQueue, ThreadTable};
//!
//! let table = Arc::new(ThreadTable::new(1));
//! let queue = ThreadQueue::new(Discipline::Priority, table.clone());
//! let urgent = table.create_thread(10);
//! let lazy = table.create_thread(200);
//!
//! let guard = table.dispatch().disable();
//! let ctx = EnqueueContext::for_guard(&guard);
//! queue.enqueue(&ctx, lazy).unwrap();
//! queue.enqueue(&ctx, urgent).unwrap();
//! drop(guard);
//!
//! assert_eq!(queue.surrender(), Some(urgent));
//! ```

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

pub mod context;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod heads;
pub mod links;
pub mod operations;
pub mod queue;
pub mod scheduler;
pub mod thread;
pub mod types;
pub mod watchdog;

pub use context::{DeadlockAction, DeadlockCallout, EnqueueContext};
pub use dispatch::{DispatchGuard, DispatchLevel};
pub use error::{Error, Result};
pub use gate::{Gate, WaitLock};
pub use heads::{BlockedSet, Heads, PriorityQueue, QueueConfig};
pub use links::{active_link_count, link_target, Link};
pub use operations::QueueOperations;
pub use queue::ThreadQueue;
pub use scheduler::{DefaultJobHooks, SchedulerJobHooks, DEFAULT_JOB_HOOKS};
pub use thread::{ThreadControl, ThreadHandle, ThreadState, ThreadTable};
pub use types::{
    Discipline, ObjectId, Priority, QueueId, SchedulerIndex, Tid, WaitOutcome, INVALID_TID,
    PRIORITY_DEFAULT, PRIORITY_MAXIMUM, PRIORITY_MINIMUM,
};
pub use watchdog::{
    AlarmCallback, AlarmDriver, AlarmId, NullAlarmDriver, TimeoutDiscipline, NO_TIMEOUT,
};

#[cfg(feature = "mp")]
pub use context::MpCallout;

//! Ownership-graph links and deadlock detection
//!
//! While a thread enqueues on an owned queue, the chain of wait
//! relations it depends on is walked and recorded as links in a global
//! registry keyed by source queue. A queue has at most one outgoing
//! link; reaching a queue that already appears in the walk, an owner
//! equal to the enqueuing thread, or an occupied registry slot means
//! the wait would close a cycle.
//!
//! Walks are serialized on the registry lock. A walk therefore never
//! blocks on another queue's lock: queue owners are read through their
//! atomic snapshots and thread controls are only locked momentarily.

use alloc::vec::Vec;

use hashbrown::HashMap;
use lazy_static::lazy_static;
use spin::Mutex;

use crate::error::{Error, Result};
use crate::thread::ThreadTable;
use crate::types::{QueueId, Tid};

/// One recorded wait relation: `source` is owned by `owner`, who in
/// turn waits on `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    /// Queue at the near end of the relation
    pub source: QueueId,
    /// Queue the owner of `source` waits on
    pub target: QueueId,
    /// Owner of `source`
    pub owner: Tid,
}

#[derive(Debug, Clone, Copy)]
struct LinkEntry {
    target: QueueId,
    owner: Tid,
}

lazy_static! {
    static ref LINK_REGISTRY: Mutex<HashMap<QueueId, LinkEntry>> = Mutex::new(HashMap::new());
}

/// Number of links currently registered, across all queues.
pub fn active_link_count() -> usize {
    LINK_REGISTRY.lock().len()
}

/// The registered outgoing link of `source`, if any.
pub fn link_target(source: QueueId) -> Option<QueueId> {
    LINK_REGISTRY.lock().get(&source).map(|entry| entry.target)
}

/// The links registered by one completed ownership-graph walk.
///
/// Held by the enqueue operation from the walk until the thread is in
/// the queue, then released. Owners collected in `update` receive the
/// waiter's priority after the enqueue.
#[derive(Debug, Default)]
pub(crate) struct Path {
    sources: Vec<QueueId>,
    /// Owners visited by the walk, nearest first.
    pub update: Vec<Tid>,
}

impl Path {
    /// Deregister every link of this path.
    pub fn release(mut self) {
        let mut registry = LINK_REGISTRY.lock();
        for source in self.sources.drain(..) {
            registry.remove(&source);
        }
    }
}

/// Walk the ownership chain starting at `origin` (owned by
/// `origin_owner`) on behalf of `enqueuing`, registering one link per
/// hop.
///
/// Returns the path on success. Fails with [`Error::Deadlock`] when
/// the walk reaches the enqueuing thread, revisits a queue, or finds a
/// registry slot taken by a concurrent walk; in that case every link
/// registered so far is removed again.
pub(crate) fn acquire_path(
    table: &ThreadTable,
    origin: QueueId,
    origin_owner: Tid,
    enqueuing: Tid,
) -> Result<Path> {
    let mut registry = LINK_REGISTRY.lock();
    let mut path = Path::default();
    let mut source = origin;
    let mut owner_tid = origin_owner;

    loop {
        if owner_tid == enqueuing {
            return Err(fail_walk(&mut registry, path, enqueuing));
        }
        let Some(owner) = table.get(owner_tid) else {
            // Owner disappeared; the chain ends here.
            break;
        };
        path.update.push(owner_tid);

        let target = { owner.control.lock().wait_queue.clone() };
        let Some(target) = target else {
            break;
        };
        if target.id == origin || path.sources.contains(&target.id) {
            return Err(fail_walk(&mut registry, path, enqueuing));
        }
        if registry.contains_key(&source) {
            // A concurrent walk already claimed this hop.
            return Err(fail_walk(&mut registry, path, enqueuing));
        }
        registry.insert(
            source,
            LinkEntry {
                target: target.id,
                owner: owner_tid,
            },
        );
        path.sources.push(source);

        let Some(target_queue) = target.queue.upgrade() else {
            break;
        };
        let Some(next_owner) = target_queue.owner() else {
            break;
        };
        source = target.id;
        owner_tid = next_owner;
    }

    Ok(path)
}

fn fail_walk(
    registry: &mut HashMap<QueueId, LinkEntry>,
    mut path: Path,
    enqueuing: Tid,
) -> Error {
    for source in path.sources.drain(..) {
        registry.remove(&source);
    }
    log::debug!("deadlock detected while enqueuing thread {}", enqueuing);
    Error::Deadlock(enqueuing)
}

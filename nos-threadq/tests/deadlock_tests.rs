//! Deadlock detection across chains of owned queues.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::setup;
use nos_threadq::{
    link_target, Discipline, EnqueueContext, Error, ThreadQueue, ThreadState,
};

#[test]
fn test_enqueue_on_own_queue_is_deadlock() {
    let (table, queue, _) = setup(Discipline::Priority, 1);
    let owner = table.create_thread(10);
    queue.set_owner(Some(owner));

    let guard = table.dispatch().disable();
    let ctx = EnqueueContext::for_guard(&guard);
    assert_eq!(queue.enqueue(&ctx, owner), Err(Error::Deadlock(owner)));
    drop(guard);

    assert!(queue.is_empty());
    assert_eq!(table.state(owner), Some(ThreadState::Ready));
    assert_eq!(table.has_spare_heads(owner), Some(true));
}

#[test]
fn test_two_queue_cycle_rejected() {
    let (table, q1, _) = setup(Discipline::Priority, 1);
    let q2 = ThreadQueue::new(Discipline::Priority, table.clone());
    let a = table.create_thread(10);
    let b = table.create_thread(10);
    q1.set_owner(Some(a));
    q2.set_owner(Some(b));

    let callouts = Arc::new(AtomicUsize::new(0));
    let counter = callouts.clone();

    let guard = table.dispatch().disable();
    let mut ctx = EnqueueContext::for_guard(&guard);
    ctx.set_deadlock_callout(Box::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    // a waits for b's queue; the chain ends at b, who is still ready.
    q2.enqueue(&ctx, a).unwrap();
    // b waiting for a's queue would close the cycle.
    assert_eq!(q1.enqueue(&ctx, b), Err(Error::Deadlock(b)));
    drop(guard);

    // Exactly one callout for the one detected cycle.
    assert_eq!(callouts.load(Ordering::SeqCst), 1);

    assert_eq!(table.state(b), Some(ThreadState::Ready));
    assert!(q1.is_empty());
    // The rejected walk deregistered its links.
    assert_eq!(link_target(q1.id()), None);
    assert_eq!(link_target(q2.id()), None);
}

#[test]
fn test_three_queue_cycle_rejected() {
    let (table, q1, _) = setup(Discipline::PrioritySmp, 2);
    let q2 = ThreadQueue::new(Discipline::PrioritySmp, table.clone());
    let q3 = ThreadQueue::new(Discipline::PrioritySmp, table.clone());
    let a = table.create_thread(10);
    let b = table.create_thread(10);
    let c = table.create_thread(10);
    q1.set_owner(Some(a));
    q2.set_owner(Some(b));
    q3.set_owner(Some(c));

    let guard = table.dispatch().disable();
    let ctx = EnqueueContext::for_guard(&guard);
    q2.enqueue(&ctx, a).unwrap();
    q3.enqueue(&ctx, b).unwrap();
    assert_eq!(q1.enqueue(&ctx, c), Err(Error::Deadlock(c)));
    drop(guard);

    assert_eq!(table.state(c), Some(ThreadState::Ready));
    assert_eq!(link_target(q1.id()), None);
    assert_eq!(link_target(q2.id()), None);
    assert_eq!(link_target(q3.id()), None);
}

#[test]
fn test_chain_without_cycle_is_allowed() {
    let (table, q1, _) = setup(Discipline::Priority, 1);
    let q2 = ThreadQueue::new(Discipline::Priority, table.clone());
    let a = table.create_thread(10);
    let b = table.create_thread(10);
    let c = table.create_thread(10);
    q1.set_owner(Some(b));
    q2.set_owner(Some(c));

    let guard = table.dispatch().disable();
    let ctx = EnqueueContext::for_guard(&guard);
    // b waits for c; a then waits for b. Straight chain, no cycle.
    q2.enqueue(&ctx, b).unwrap();
    q1.enqueue(&ctx, a).unwrap();
    drop(guard);

    assert_eq!(table.state(a), Some(ThreadState::Blocked));
    // Links only live for the duration of the walk.
    assert_eq!(link_target(q1.id()), None);

    // Unwinding: c releases q2, then b releases q1.
    assert_eq!(q2.surrender(), Some(b));
    assert_eq!(q1.surrender(), Some(a));
}

#[test]
#[should_panic(expected = "deadlock")]
fn test_fatal_deadlock_action_panics() {
    let (table, queue, _) = setup(Discipline::Fifo, 1);
    let owner = table.create_thread(10);
    queue.set_owner(Some(owner));

    let guard = table.dispatch().disable();
    let mut ctx = EnqueueContext::for_guard(&guard);
    ctx.set_deadlock_action(nos_threadq::DeadlockAction::Fatal);
    let _ = queue.enqueue(&ctx, owner);
}

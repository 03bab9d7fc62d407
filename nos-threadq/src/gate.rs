//! Gates - SMP ordering primitive for wait-lock acquisition
//!
//! A gate is added to the pending-request list of a wait lock and its
//! owner busy-waits on the `go_ahead` flag until the logical
//! predecessor opens it. This serializes concurrent acquisition
//! attempts in strict request order without a blocking mutex, which
//! matters during ownership-graph walks where a blocking lock could
//! itself deadlock against the graph being explored.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

/// One acquisition request. The requester busy-waits on its own
/// `go_ahead` flag; the predecessor flips it on completion.
#[derive(Debug)]
pub struct Gate {
    go_ahead: AtomicBool,
}

impl Gate {
    /// Create a closed gate.
    pub fn new() -> Self {
        Self {
            go_ahead: AtomicBool::new(false),
        }
    }

    /// Busy-wait until the gate is opened. The gate is left closed
    /// again so it can be reused for the next request.
    pub fn wait(&self) {
        while !self.go_ahead.swap(false, Ordering::Acquire) {
            spin_loop();
        }
    }

    /// Open the gate, releasing its waiter.
    pub fn open(&self) {
        self.go_ahead.store(true, Ordering::Release);
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct WaitLockState {
    held: bool,
    pending: VecDeque<Arc<Gate>>,
}

/// Gate-ordered admission lock.
///
/// Protects the per-thread wait state during enqueue operations and
/// ownership-graph walks. Requests are granted strictly in the order
/// they were added; a granted request either proceeds immediately or
/// busy-waits on its gate until the holder releases.
#[derive(Debug)]
pub struct WaitLock {
    state: Mutex<WaitLockState>,
}

impl WaitLock {
    /// Create an unheld wait lock.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(WaitLockState {
                held: false,
                pending: VecDeque::new(),
            }),
        }
    }

    /// Register an acquisition request.
    ///
    /// If the lock was free the request is granted immediately and the
    /// gate is opened; otherwise the gate joins the pending list.
    /// Either way the caller must `gate.wait()` before entering the
    /// protected region.
    pub fn request(&self, gate: &Arc<Gate>) {
        let mut state = self.state.lock();
        if !state.held {
            state.held = true;
            gate.open();
        } else {
            state.pending.push_back(gate.clone());
        }
    }

    /// Register a request and busy-wait until it is granted.
    pub fn acquire(&self, gate: &Arc<Gate>) {
        self.request(gate);
        gate.wait();
    }

    /// Whether the lock is currently held.
    pub fn is_held(&self) -> bool {
        self.state.lock().held
    }

    /// Number of requests waiting behind the current holder.
    pub fn pending_requests(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Leave the protected region, opening the gate of the logical
    /// successor if any.
    pub fn release(&self) {
        let mut state = self.state.lock();
        if let Some(next) = state.pending.pop_front() {
            next.open();
        } else {
            state.held = false;
        }
    }
}

impl Default for WaitLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uncontended_acquire_release() {
        let lock = WaitLock::new();
        let gate = Arc::new(Gate::new());
        lock.acquire(&gate);
        lock.release();
        // Reusable after release
        lock.acquire(&gate);
        lock.release();
    }

    #[test]
    fn test_pending_request_granted_in_order() {
        let lock = WaitLock::new();
        let first = Arc::new(Gate::new());
        let second = Arc::new(Gate::new());

        lock.acquire(&first);
        lock.request(&second);
        // Second request is parked until the holder releases.
        assert!(!second.go_ahead.load(Ordering::Acquire));
        lock.release();
        assert!(second.go_ahead.load(Ordering::Acquire));
        second.wait();
        lock.release();
    }

    #[test]
    fn test_gate_reusable_after_wait() {
        let gate = Gate::new();
        gate.open();
        gate.wait();
        // wait() consumed the go-ahead
        assert!(!gate.go_ahead.load(Ordering::Acquire));
    }
}

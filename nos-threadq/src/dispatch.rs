//! Thread dispatch disable level tracking
//!
//! The dispatch disable level is a nesting counter recording how deeply
//! preemption is currently suppressed. Thread queue enqueue operations
//! are only legal from within such a critical region; the enqueue
//! context records the level the caller expects to hold and any
//! mismatch is a fatal error.

use core::sync::atomic::{AtomicU32, Ordering};

/// Nesting counter for dispatch suppression.
///
/// One instance lives in each [`crate::thread::ThreadTable`]; the
/// counter is manipulated through RAII guards only.
#[derive(Debug)]
pub struct DispatchLevel {
    level: AtomicU32,
}

impl DispatchLevel {
    /// Create a counter with dispatching enabled.
    pub const fn new() -> Self {
        Self {
            level: AtomicU32::new(0),
        }
    }

    /// The current nesting level. Zero means dispatching is enabled.
    pub fn current(&self) -> u32 {
        self.level.load(Ordering::SeqCst)
    }

    /// Disable dispatching, incrementing the nesting level until the
    /// returned guard is dropped.
    pub fn disable(&self) -> DispatchGuard<'_> {
        self.level.fetch_add(1, Ordering::SeqCst);
        DispatchGuard { owner: self }
    }
}

impl Default for DispatchLevel {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for one level of dispatch suppression.
#[derive(Debug)]
pub struct DispatchGuard<'a> {
    owner: &'a DispatchLevel,
}

impl DispatchGuard<'_> {
    /// The nesting level established by this guard and any enclosing
    /// ones. This is the value callers record as the expected level in
    /// an enqueue context.
    pub fn level(&self) -> u32 {
        self.owner.current()
    }
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.owner.level.fetch_sub(1, Ordering::SeqCst);
    }
}

//! Timeout facility interface
//!
//! The thread queue core treats the timeout/alarm facility as an
//! opaque capability: arm with a deadline and a clock discipline, fire
//! a callback, cancel. The kernel provides the real driver; tests
//! inject a deterministic tick-driven one.

use alloc::boxed::Box;
use core::sync::atomic::{AtomicU64, Ordering};

/// Clock discipline for an interval timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutDiscipline {
    /// Do not arm a timeout; block until surrendered or extracted.
    None,
    /// Interval relative to the moment of arming.
    Relative,
    /// Absolute deadline on the monotonic clock.
    AbsoluteMonotonic,
    /// Absolute deadline on the realtime clock.
    AbsoluteRealtime,
}

/// Sentinel interval meaning "wait forever" even when a relative
/// discipline is configured.
pub const NO_TIMEOUT: u64 = u64::MAX;

/// Handle of an armed alarm, used for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmId(pub u64);

static NEXT_ALARM_ID: AtomicU64 = AtomicU64::new(1);

impl AlarmId {
    /// Allocate a fresh alarm id.
    pub fn next() -> Self {
        AlarmId(NEXT_ALARM_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Callback fired when an armed alarm expires.
pub type AlarmCallback = Box<dyn FnOnce() + Send>;

/// Opaque alarm capability provided by the embedding kernel.
pub trait AlarmDriver: Send + Sync {
    /// Arm an alarm. `expiry` is an interval for
    /// [`TimeoutDiscipline::Relative`] and an absolute instant for the
    /// absolute disciplines. The discipline is never
    /// [`TimeoutDiscipline::None`].
    fn arm(&self, discipline: TimeoutDiscipline, expiry: u64, callback: AlarmCallback) -> AlarmId;

    /// Cancel a previously armed alarm. Cancelling an alarm that has
    /// already fired is a no-op.
    fn cancel(&self, id: AlarmId);
}

/// Driver used when the embedding kernel does not supply one. Arming
/// is ignored, so timed waits degrade to indefinite ones.
#[derive(Debug, Default)]
pub struct NullAlarmDriver;

impl AlarmDriver for NullAlarmDriver {
    fn arm(&self, discipline: TimeoutDiscipline, expiry: u64, _callback: AlarmCallback) -> AlarmId {
        log::warn!(
            "null alarm driver: ignoring {:?} timeout of {}",
            discipline,
            expiry
        );
        AlarmId::next()
    }

    fn cancel(&self, _id: AlarmId) {}
}

//! Shared helpers for the thread queue integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use nos_threadq::{
    AlarmCallback, AlarmDriver, AlarmId, Discipline, ThreadQueue, ThreadTable, TimeoutDiscipline,
};

struct ArmedAlarm {
    expires: u64,
    callback: AlarmCallback,
}

struct DriverState {
    now: u64,
    armed: HashMap<u64, ArmedAlarm>,
}

/// Deterministic alarm driver advanced by explicit ticks from the
/// test body. Both absolute clocks share the single test clock.
pub struct TickAlarmDriver {
    state: Mutex<DriverState>,
}

impl TickAlarmDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(DriverState {
                now: 0,
                armed: HashMap::new(),
            }),
        })
    }

    /// The current test clock value.
    pub fn now(&self) -> u64 {
        self.state.lock().unwrap().now
    }

    /// Number of alarms currently armed.
    pub fn armed_count(&self) -> usize {
        self.state.lock().unwrap().armed.len()
    }

    /// Advance the clock by `ticks`, firing every alarm that becomes
    /// due. Callbacks run outside the driver lock.
    pub fn tick(&self, ticks: u64) {
        let due: Vec<AlarmCallback> = {
            let mut state = self.state.lock().unwrap();
            state.now += ticks;
            let now = state.now;
            let due_ids: Vec<u64> = state
                .armed
                .iter()
                .filter(|(_, alarm)| alarm.expires <= now)
                .map(|(&id, _)| id)
                .collect();
            due_ids
                .into_iter()
                .filter_map(|id| state.armed.remove(&id))
                .map(|alarm| alarm.callback)
                .collect()
        };
        for callback in due {
            callback();
        }
    }
}

impl AlarmDriver for TickAlarmDriver {
    fn arm(&self, discipline: TimeoutDiscipline, expiry: u64, callback: AlarmCallback) -> AlarmId {
        let id = AlarmId::next();
        let mut state = self.state.lock().unwrap();
        let expires = match discipline {
            TimeoutDiscipline::Relative => state.now + expiry,
            _ => expiry,
        };
        state.armed.insert(id.0, ArmedAlarm { expires, callback });
        id
    }

    fn cancel(&self, id: AlarmId) {
        self.state.lock().unwrap().armed.remove(&id.0);
    }
}

/// A thread table and one queue over it, on a tick-driven clock.
pub fn setup(
    discipline: Discipline,
    scheduler_count: usize,
) -> (Arc<ThreadTable>, Arc<ThreadQueue>, Arc<TickAlarmDriver>) {
    let driver = TickAlarmDriver::new();
    let table = Arc::new(ThreadTable::with_alarm(scheduler_count, driver.clone()));
    let queue = ThreadQueue::new(discipline, table.clone());
    (table, queue, driver)
}

//! Per-device instruction streams.
//!
//! Each device descriptor owns one stream: a submit/complete counter pair
//! behind a condvar. Ordering within a device's own stream is preserved by
//! construction; cross-device dependencies fence on `wait_idle` — a
//! transfer reading from device A waits for A's prior work to complete
//! before the copy begins.

use std::sync::{Condvar, Mutex};

#[derive(Debug, Default)]
struct Counters {
    submitted: u64,
    completed: u64,
}

/// A device's in-order instruction stream.
#[derive(Debug, Default)]
pub struct DeviceStream {
    counters: Mutex<Counters>,
    idle: Condvar,
}

impl DeviceStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the submission of one operation. Returns its ticket.
    pub fn submit(&self) -> u64 {
        let mut counters = self.counters.lock().expect("stream lock poisoned");
        counters.submitted += 1;
        counters.submitted
    }

    /// Record the completion of the oldest outstanding operation.
    pub fn complete(&self) {
        let mut counters = self.counters.lock().expect("stream lock poisoned");
        counters.completed += 1;
        debug_assert!(counters.completed <= counters.submitted);
        self.idle.notify_all();
    }

    /// Block until every submitted operation has completed.
    pub fn wait_idle(&self) {
        let mut counters = self.counters.lock().expect("stream lock poisoned");
        while counters.completed < counters.submitted {
            counters = self.idle.wait(counters).expect("stream lock poisoned");
        }
    }

    /// Number of operations submitted so far.
    pub fn submitted(&self) -> u64 {
        self.counters.lock().expect("stream lock poisoned").submitted
    }
}

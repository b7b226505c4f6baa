//! An integer cell with a lock and a change-signal, used to drive the
//! processor thread state machine in [`super::thread_handle`].

use std::sync::{Condvar, Mutex};

/// A value that can be read, written, and waited on for change.
///
/// All operations are thread-safe. `await_change` guards against spurious
/// wakeups: `Condvar::wait` can return without the value actually having
/// changed (a POSIX wart this crate inherits via `std::sync::Condvar`), so
/// the wait loops until the stored value differs from what the caller last
/// observed.
pub struct Waitable {
    value: Mutex<i32>,
    changed: Condvar,
}

impl Waitable {
    pub fn new(initial: i32) -> Waitable {
        Waitable {
            value: Mutex::new(initial),
            changed: Condvar::new(),
        }
    }

    pub fn get(&self) -> i32 {
        *self.value.lock().unwrap()
    }

    /// Stores `new` and wakes every thread blocked in `await_change`.
    pub fn set(&self, new: i32) {
        let mut value = self.value.lock().unwrap();
        *value = new;
        self.changed.notify_all();
    }

    /// Blocks until the stored value differs from `current`, returning the
    /// new value.
    pub fn await_change(&self, current: i32) -> i32 {
        let mut value = self.value.lock().unwrap();
        loop {
            value = self.changed.wait(value).unwrap();
            if *value != current {
                return *value;
            }
        }
    }
}

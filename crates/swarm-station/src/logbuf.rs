//! Bounded per-station log ring.
//!
//! Fixed capacity of 50 timestamped entries, newest last, FIFO eviction.
//! Appends never suspend; the buffer is read by the control plane.

use std::collections::VecDeque;
use std::sync::Mutex;

/// Maximum entries retained per station.
pub const LOG_CAPACITY: usize = 50;

/// Thread-safe ring of `[HH:MM:SS] message` entries.
#[derive(Debug, Default)]
pub struct LogBuffer {
    entries: Mutex<VecDeque<String>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a timestamped entry, evicting the oldest past capacity.
    pub fn push(&self, message: impl AsRef<str>) {
        let stamp = chrono::Utc::now().format("%H:%M:%S");
        let entry = format!("[{stamp}] {}", message.as_ref());
        let mut entries = self.entries.lock().unwrap();
        if entries.len() == LOG_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Copy of the buffer, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

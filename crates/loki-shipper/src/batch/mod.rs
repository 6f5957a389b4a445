use std::time::SystemTime;

/// A single log line and the time it was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub timestamp: SystemTime,
    pub line: String,
}

impl Entry {
    pub fn new(timestamp: SystemTime, line: impl Into<String>) -> Self {
        Self {
            timestamp,
            line: line.into(),
        }
    }

    /// Entry stamped with the current wall-clock time.
    pub fn now(line: impl Into<String>) -> Self {
        Self::new(SystemTime::now(), line)
    }
}

/// Ordered, append-only run of entries awaiting delivery.
///
/// Owned by the batch worker only; never shared across tasks.
#[derive(Debug, Default)]
pub struct Batch {
    entries: Vec<Entry>,
}

impl Batch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take all entries out, leaving an empty batch with the same capacity.
    pub fn take(&mut self) -> Vec<Entry> {
        let capacity = self.entries.capacity();
        std::mem::replace(&mut self.entries, Vec::with_capacity(capacity))
    }
}

use std::sync::atomic::{AtomicU64, Ordering};

/// Issues ordering tokens for status reports.
///
/// One clock is owned per controller and shared by whichever status source is
/// active, so a slow response to an early request always orders before a
/// report obtained later.
#[derive(Debug, Default)]
pub struct SequenceClock {
    last: AtomicU64,
}

impl SequenceClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a token strictly greater than every token issued or witnessed so far.
    pub fn next(&self) -> u64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Records an externally supplied token so later tokens order after it.
    pub fn witness(&self, sequence: u64) {
        self.last.fetch_max(sequence, Ordering::SeqCst);
    }

    pub fn current(&self) -> u64 {
        self.last.load(Ordering::SeqCst)
    }
}


use crate::MAX_PROBES;
use cache_side_channel::{CacheStatus, Threshold};
use std::fmt::Write;

/// Reload latencies of one slot, plus the slots skipped right before it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SlotRecord {
    pub probe_latencies: [u64; MAX_PROBES],
    pub missed: u64,
}

/// Fixed capacity buffer of slot records.
///
/// The slot being measured is written in place at the end of the committed
/// records and is only kept once `commit` is called.
#[derive(Debug)]
pub struct TraceBuffer {
    records: Vec<SlotRecord>,
    len: usize,
}

impl TraceBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        TraceBuffer {
            records: vec![SlotRecord::default(); capacity],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.records.len()
    }

    /// Record of the slot in progress.
    ///
    /// # Panics
    ///
    /// When the buffer is full.
    pub fn pending(&mut self) -> &mut SlotRecord {
        &mut self.records[self.len]
    }

    pub fn commit(&mut self) {
        assert!(!self.is_full());
        self.len += 1;
    }

    pub fn reset(&mut self) {
        self.len = 0;
    }

    pub fn committed(&self) -> &[SlotRecord] {
        &self.records[..self.len]
    }
}

/// Single line timeline: for each record, the name of every probe that hit,
/// in probe order, then `{missed}` when slots were skipped before it.
pub fn render(records: &[SlotRecord], names: &[char], threshold: Threshold) -> String {
    let mut out = String::new();
    for record in records {
        for (name, &latency) in names.iter().zip(record.probe_latencies.iter()) {
            if threshold.status(latency) == CacheStatus::Hit {
                out.push(*name);
            }
        }
        if record.missed != 0 {
            // Writing to a String cannot fail.
            let _ = write!(out, "{{{}}}", record.missed);
        }
    }
    out.push('\n');
    out
}

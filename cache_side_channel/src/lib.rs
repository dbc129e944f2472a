#![deny(unsafe_op_in_unsafe_fn)]

use std::fmt::Debug;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CacheStatus {
    Hit,
    Miss,
}

/// Hit/miss boundary for reload latencies: at or below `value` cycles is a hit.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Threshold {
    pub value: u64,
}

impl Threshold {
    pub fn is_hit(&self, time: u64) -> bool {
        time <= self.value
    }

    pub fn status(&self, time: u64) -> CacheStatus {
        if self.is_hit(time) {
            CacheStatus::Hit
        } else {
            CacheStatus::Miss
        }
    }
}

/// Clock and eviction capability a Flush+Reload sampler runs on.
///
/// One implementation per instruction set drives real hardware, tests can
/// substitute a scripted clock.
pub trait TimingChannelPrimitives: Debug {
    /// Cycle counter, read after a fence so no earlier load is reordered past it.
    fn read_cycles(&mut self) -> u64;

    /// Latency of one reload of `addr`, which is evicted from every cache level afterwards.
    ///
    /// # Safety
    ///
    /// addr must be a valid pointer to read.
    unsafe fn measure_and_flush(&mut self, addr: *const u8) -> u64;

    /// Evicts the line of `addr` without timing anything.
    ///
    /// # Safety
    ///
    /// addr must be a valid pointer to read.
    unsafe fn flush(&mut self, addr: *const u8);
}

impl<T: TimingChannelPrimitives + ?Sized> TimingChannelPrimitives for &mut T {
    fn read_cycles(&mut self) -> u64 {
        (**self).read_cycles()
    }

    unsafe fn measure_and_flush(&mut self, addr: *const u8) -> u64 {
        unsafe { (**self).measure_and_flush(addr) }
    }

    unsafe fn flush(&mut self, addr: *const u8) {
        unsafe { (**self).flush(addr) }
    }
}

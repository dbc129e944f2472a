use cache_side_channel::TimingChannelPrimitives;
use cache_utils::{flush, rdtsc_fence, reload_and_flush};

/// rdtsc and clflush straight from user space.
#[derive(Debug, Default)]
pub struct NaiveFRPrimitives {}

impl TimingChannelPrimitives for NaiveFRPrimitives {
    fn read_cycles(&mut self) -> u64 {
        unsafe { rdtsc_fence() }
    }

    unsafe fn measure_and_flush(&mut self, addr: *const u8) -> u64 {
        unsafe { reload_and_flush(addr) }
    }

    unsafe fn flush(&mut self, addr: *const u8) {
        unsafe { flush(addr) }
    }
}

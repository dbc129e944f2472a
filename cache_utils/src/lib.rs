#![deny(unsafe_op_in_unsafe_fn)]

use static_assertions::const_assert;

pub mod calibration;
pub mod histograms;
pub mod mmap;

#[cfg(target_arch = "x86_64")]
use core::arch::x86_64 as arch_x86;
use core::ptr;

pub const CACHE_LINE_SIZE: usize = 64;
const_assert!(CACHE_LINE_SIZE.is_power_of_two());

// rdtsc (lfence before), every earlier load has completed when the counter is read
#[cfg(target_arch = "x86_64")]
pub unsafe fn rdtsc_fence() -> u64 {
    unsafe {
        arch_x86::_mm_lfence();
        arch_x86::_rdtsc()
    }
}

pub unsafe fn maccess<T>(p: *const T) {
    unsafe { ptr::read_volatile(p) };
}

// flush (clflush), mfence first so the eviction is ordered after pending accesses
#[cfg(target_arch = "x86_64")]
pub unsafe fn flush(p: *const u8) {
    unsafe {
        arch_x86::_mm_mfence();
        arch_x86::_mm_clflush(p);
    }
}

/// Times a single load of `p`.
///
/// # Safety
///
/// `p` must be valid for a one byte read.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub unsafe fn only_reload(p: *const u8) -> u64 {
    unsafe {
        arch_x86::_mm_mfence();
        arch_x86::_mm_lfence();
        let t = arch_x86::_rdtsc();
        arch_x86::_mm_lfence();
        maccess(p);
        arch_x86::_mm_lfence();
        arch_x86::_rdtsc().wrapping_sub(t)
    }
}

/// Times a single load of `p`, then evicts its line from the whole hierarchy.
///
/// # Safety
///
/// `p` must be valid for a one byte read.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub unsafe fn reload_and_flush(p: *const u8) -> u64 {
    unsafe {
        let t = only_reload(p);
        arch_x86::_mm_clflush(p);
        t
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuSupport {
    pub clflush: bool,
    pub tsc: bool,
    pub invariant_tsc: bool,
}

impl CpuSupport {
    /// clflush and rdtsc are the two instructions the probe cannot do without.
    pub fn can_flush_reload(&self) -> bool {
        self.clflush && self.tsc
    }
}

#[cfg(target_arch = "x86_64")]
pub fn cpu_support() -> CpuSupport {
    let cpuid = raw_cpuid::CpuId::new();
    let (clflush, tsc) = if let Some(info) = cpuid.get_feature_info() {
        (info.has_clflush(), info.has_tsc())
    } else {
        (false, false)
    };
    let invariant_tsc = cpuid
        .get_advanced_power_mgmt_info()
        .map_or(false, |info| info.has_invariant_tsc());
    CpuSupport {
        clflush,
        tsc,
        invariant_tsc,
    }
}

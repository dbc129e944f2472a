use crate::image::ImageError;
use crate::{MAX_PROBES, MAX_SLOT_SIZE, MAX_THRESHOLD};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpyError {
    #[error("no probes given")]
    NoProbes,
    #[error("{count} probes given, at most {max} are allowed", max = MAX_PROBES)]
    TooManyProbes { count: usize },
    #[error("two probes share the name '{0}'")]
    DuplicateName(char),
    #[error("two probes share the virtual address {0:#x}")]
    DuplicateAddress(u64),
    #[error("bad probe '{text}': {reason}")]
    BadProbe { text: String, reason: &'static str },
    #[error("bad threshold {0}, expected 0 < threshold < {max}", max = MAX_THRESHOLD)]
    ThresholdOutOfRange(u64),
    #[error("bad slot size {0}, expected 1..={max}", max = MAX_SLOT_SIZE)]
    SlotOutOfRange(u64),
    #[error("virtual address {address:#x} of probe '{name}' is outside the image [{low:#x}, {high:#x})")]
    OutOfRange {
        name: char,
        address: u64,
        low: u64,
        high: u64,
    },
    #[error("monotonicity failure: slot started at {start}, last one ended at {last_end}")]
    NonMonotonicClock { start: u64, last_end: u64 },
    #[error("this CPU cannot run Flush+Reload (clflush and rdtsc are required)")]
    UnsupportedCpu,
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error("installing signal handlers: {0}")]
    Signal(#[from] nix::Error),
}

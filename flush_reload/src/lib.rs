#![deny(unsafe_op_in_unsafe_fn)]

use static_assertions::const_assert;

pub mod attack;
pub mod error;
pub mod image;
#[cfg(target_arch = "x86_64")]
mod naive;
pub mod probe;
pub mod session;
pub mod signal;
pub mod trace;

pub use attack::{AttackLoop, AttackOutcome};
pub use error::SpyError;
pub use image::{ElfClass, ElfImage, ImageError};
pub use probe::{ProbePointer, ProbeSet, ProbeSpec, ResolvedProbe};
pub use session::{bench, spy, spy_with, SpyConfig};
pub use trace::{render, SlotRecord, TraceBuffer};

pub const MAX_PROBES: usize = 4;
pub const MAX_SLOT_SIZE: u64 = 10_000;
// Will work for most systems, see Yarom and Falkner.
pub const DEFAULT_THRESHOLD: u64 = 120;
pub const MAX_THRESHOLD: u64 = 2000;

const_assert!(MAX_PROBES > 0);
const_assert!(DEFAULT_THRESHOLD > 0 && DEFAULT_THRESHOLD < MAX_THRESHOLD);

#[cfg(target_arch = "x86_64")]
pub use naive::NaiveFRPrimitives;


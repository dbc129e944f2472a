use crate::attack::{AttackLoop, AttackOutcome};
use crate::error::SpyError;
use crate::image::ElfImage;
use crate::probe::ProbeSet;
use crate::{MAX_SLOT_SIZE, MAX_THRESHOLD};
use cache_side_channel::{Threshold, TimingChannelPrimitives};
use cache_utils::calibration::CalibrationSample;
use itertools::Itertools;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

/// Everything an attack needs, checked once up front.
#[derive(Debug, Clone)]
pub struct SpyConfig {
    pub elf_path: PathBuf,
    pub threshold: Threshold,
    pub slot: u64,
    pub probes: ProbeSet,
}

impl SpyConfig {
    pub fn new(
        elf_path: PathBuf,
        threshold: u64,
        slot: u64,
        probes: ProbeSet,
    ) -> Result<Self, SpyError> {
        if threshold == 0 || threshold >= MAX_THRESHOLD {
            return Err(SpyError::ThresholdOutOfRange(threshold));
        }
        if slot == 0 || slot > MAX_SLOT_SIZE {
            return Err(SpyError::SlotOutOfRange(slot));
        }
        Ok(SpyConfig {
            elf_path,
            threshold: Threshold { value: threshold },
            slot,
            probes,
        })
    }
}

/// Maps the victim, resolves the probes and runs one attack on `primitives`.
///
/// Nothing is flushed or timed unless every probe resolves.
pub fn spy_with<P: TimingChannelPrimitives>(
    config: &SpyConfig,
    primitives: P,
    stop: &AtomicBool,
) -> Result<AttackOutcome, SpyError> {
    log::debug!("Resolving probes {}", config.probes.iter().join(", "));
    let image = ElfImage::open(&config.elf_path)?;
    let probes = config.probes.resolve_in(&image)?;
    for probe in &probes {
        log::info!(
            "Probe {} set at {:#x} ({:?})",
            probe.name,
            probe.virtual_address,
            probe.pointer
        );
    }
    log::info!(
        "Spying with threshold {} and {} cycle slots",
        config.threshold.value,
        config.slot
    );
    let mut attack = AttackLoop::new(primitives, probes, config.threshold, config.slot)?;
    attack.run(stop)
}

#[cfg(target_arch = "x86_64")]
fn check_cpu() -> Result<(), SpyError> {
    let support = cache_utils::cpu_support();
    if !support.can_flush_reload() {
        return Err(SpyError::UnsupportedCpu);
    }
    if !support.invariant_tsc {
        log::warn!("TSC is not invariant, slot lengths will follow frequency changes");
    }
    Ok(())
}

/// Runs the attack on this CPU until a trace is produced or SIGINT/SIGTERM.
#[cfg(target_arch = "x86_64")]
pub fn spy(config: &SpyConfig) -> Result<AttackOutcome, SpyError> {
    let stop = crate::signal::install_stop_handler()?;
    check_cpu()?;
    spy_with(config, crate::NaiveFRPrimitives::default(), stop)
}

#[cfg(not(target_arch = "x86_64"))]
pub fn spy(_config: &SpyConfig) -> Result<AttackOutcome, SpyError> {
    Err(SpyError::UnsupportedCpu)
}

/// Alternating flushed and cached reload timings of a line in this binary.
#[cfg(target_arch = "x86_64")]
pub fn bench(samples: usize) -> Result<Vec<CalibrationSample>, SpyError> {
    check_cpu()?;
    Ok(cache_utils::calibration::cache_bench(samples))
}

#[cfg(not(target_arch = "x86_64"))]
pub fn bench(_samples: usize) -> Result<Vec<CalibrationSample>, SpyError> {
    Err(SpyError::UnsupportedCpu)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attack::tests::ScriptedPrimitives;
    use crate::image::synthetic_elf;
    use crate::probe::ProbeSpec;
    use crate::ElfClass;
    use object::elf::{ET_DYN, ET_EXEC};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn victim(e_type: u16, size: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&synthetic_elf(ElfClass::Elf64, e_type, size))
            .unwrap();
        file.flush().unwrap();
        file
    }

    fn probe_set(text: &[&str]) -> ProbeSet {
        ProbeSet::new(text.iter().map(|t| t.parse::<ProbeSpec>().unwrap()).collect()).unwrap()
    }

    #[test]
    fn config_ranges() {
        let probes = probe_set(&["A:0x401000"]);
        for threshold in [0, MAX_THRESHOLD, MAX_THRESHOLD + 1] {
            assert!(matches!(
                SpyConfig::new("victim".into(), threshold, 100, probes.clone()),
                Err(SpyError::ThresholdOutOfRange(_))
            ));
        }
        for slot in [0, MAX_SLOT_SIZE + 1] {
            assert!(matches!(
                SpyConfig::new("victim".into(), 120, slot, probes.clone()),
                Err(SpyError::SlotOutOfRange(_))
            ));
        }
        let config = SpyConfig::new("victim".into(), 1, MAX_SLOT_SIZE, probes).unwrap();
        assert_eq!(config.threshold, Threshold { value: 1 });
    }

    #[test]
    fn probe_outside_the_image_stops_the_session() {
        let file = victim(ET_EXEC, 0x2000);
        let config = SpyConfig::new(
            file.path().to_path_buf(),
            120,
            100,
            probe_set(&["A:0x401000", "B:0x402000"]),
        )
        .unwrap();

        let mut primitives = ScriptedPrimitives::ticking(1, 50);
        let stop = AtomicBool::new(false);
        match spy_with(&config, &mut primitives, &stop) {
            Err(SpyError::OutOfRange {
                name,
                address,
                low,
                high,
            }) => {
                assert_eq!(name, 'B');
                assert_eq!(address, 0x402000);
                assert_eq!(low, 0x400000);
                assert_eq!(high, 0x402000);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(primitives.flushes, 0);
        assert_eq!(primitives.reloads, 0);
    }

    #[test]
    fn shared_object_trace() {
        let file = victim(ET_DYN, 0x1000);
        let config = SpyConfig::new(
            file.path().to_path_buf(),
            120,
            2,
            probe_set(&["A:0x100", "B:0x840"]),
        )
        .unwrap();
        let mut primitives = ScriptedPrimitives::ticking(1, 300);
        primitives.latencies = vec![50, 300, 60, 70].into();

        let stop = AtomicBool::new(false);
        let outcome = spy_with(&config, &mut primitives, &stop).unwrap();
        assert_eq!(outcome, AttackOutcome::Trace("AAB\n".to_owned()));
        assert_eq!(primitives.flushes, 2);
        assert_eq!(primitives.reloads, 4);
    }

    #[test]
    fn missing_victim_is_an_image_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = SpyConfig::new(
            dir.path().join("victim"),
            120,
            10,
            probe_set(&["A:0x401000"]),
        )
        .unwrap();
        let stop = AtomicBool::new(false);
        assert!(matches!(
            spy_with(&config, ScriptedPrimitives::ticking(1, 50), &stop),
            Err(SpyError::Image(_))
        ));
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn bench_returns_requested_samples() {
        let samples = bench(64).unwrap();
        assert_eq!(samples.len(), 64);
        assert!(samples[0].flushed);
    }
}

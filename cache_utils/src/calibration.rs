#[cfg(target_arch = "x86_64")]
use crate::{flush, only_reload};
use crate::histograms::{StaticHistogram, StaticHistogramCumSum};
use crate::CACHE_LINE_SIZE;

#[cfg(feature = "serde_support")]
use rmp_serde::Serializer;
#[cfg(feature = "serde_support")]
use serde::{Deserialize, Serialize};

pub const CALIBRATION_SAMPLES: usize = 100_000;

// Histograms bucket of 5 and max at 1250 cycles
pub const BUCKET_SIZE: u64 = 5;
pub const BUCKET_NUMBER: usize = 250;

pub type LatencyHistogram = StaticHistogram<BUCKET_SIZE, BUCKET_NUMBER>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde_support", derive(Serialize, Deserialize))]
pub struct CalibrationSample {
    pub flushed: bool,
    pub latency: u64,
}

#[repr(align(64))]
struct CalibrationLine([u8; CACHE_LINE_SIZE]);

static CALIBRATION_LINE: CalibrationLine = CalibrationLine([0x2a; CACHE_LINE_SIZE]);

/// Alternates uncached and cached loads of `p`.
///
/// Even samples are flushed before being timed, odd ones are timed right
/// after the previous load brought the line back.
///
/// # Safety
///
/// `p` must be valid for a one byte read.
#[cfg(target_arch = "x86_64")]
pub unsafe fn calibrate_reload(p: *const u8, sample_count: usize) -> Vec<CalibrationSample> {
    let mut samples = Vec::with_capacity(sample_count);
    for i in 0..sample_count {
        let flushed = i % 2 == 0;
        if flushed {
            unsafe { flush(p) };
        }
        let latency = unsafe { only_reload(p) };
        samples.push(CalibrationSample { flushed, latency });
    }
    samples
}

/// Runs the reload calibration on a line that lives in this binary.
#[cfg(target_arch = "x86_64")]
pub fn cache_bench(sample_count: usize) -> Vec<CalibrationSample> {
    log::debug!(
        "Calibrating on {:p} with {} samples",
        CALIBRATION_LINE.0.as_ptr(),
        sample_count
    );
    unsafe { calibrate_reload(CALIBRATION_LINE.0.as_ptr(), sample_count) }
}

#[cfg(feature = "serde_support")]
#[derive(Debug, thiserror::Error)]
pub enum CalibrationFileError {
    #[error("calibration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoding calibration samples: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("decoding calibration samples: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

#[cfg(feature = "serde_support")]
pub fn write_msgpack(
    samples: &[CalibrationSample],
    path: impl AsRef<std::path::Path>,
) -> Result<(), CalibrationFileError> {
    let mut f = std::io::BufWriter::new(std::fs::File::create(path)?);
    let mut s = Serializer::new(&mut f);
    samples.serialize(&mut s)?;
    std::io::Write::flush(&mut f)?;
    Ok(())
}

/// Hit and miss latency distributions of a calibration run.
#[derive(Debug, Clone)]
pub struct CalibrationSummary {
    pub hit: LatencyHistogram,
    pub miss: LatencyHistogram,
}

impl CalibrationSummary {
    pub fn from_samples(samples: &[CalibrationSample]) -> Self {
        let mut hit = LatencyHistogram::empty();
        let mut miss = LatencyHistogram::empty();
        for sample in samples {
            if sample.flushed {
                miss.add(sample.latency);
            } else {
                hit.add(sample.latency);
            }
        }
        CalibrationSummary { hit, miss }
    }

    /// Most frequent cached load latency (bucket start).
    pub fn hit_mode(&self) -> Option<u64> {
        self.hit.mode().map(LatencyHistogram::bucket_start)
    }

    /// Lowest flushed load latency that is not noise (bucket start).
    pub fn miss_floor(&self) -> Option<u64> {
        // Magic
        self.miss.first_above(3).map(LatencyHistogram::bucket_start)
    }

    /// Highest latency still counted as a hit that misclassifies the fewest
    /// samples of this run. A hint, the attack never calls this.
    pub fn suggested_threshold(&self) -> Option<u64> {
        let hit_total = self.hit.total();
        let miss_total = self.miss.total();
        if hit_total == 0 || miss_total == 0 {
            return None;
        }
        let hit_cum_sum = StaticHistogramCumSum::from(&self.hit);
        let miss_cum_sum = StaticHistogramCumSum::from(&self.miss);

        let mut best: (usize, u32) = (0, u32::MAX);
        for i in 0..BUCKET_NUMBER - 1 {
            // Everything at or below bucket i is a hit.
            let errors =
                (hit_total - hit_cum_sum[i].cumulative_count) + miss_cum_sum[i].cumulative_count;
            if errors < best.1 {
                best = (i, errors);
            }
        }
        Some(LatencyHistogram::bucket_start(best.0 + 1) - 1)
    }
}

impl core::fmt::Display for CalibrationSummary {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        writeln!(f, "{:>5}: {:>10} {:>10}", "time", "cached", "flushed")?;
        for ((time, hit), (_, miss)) in self.hit.iter().zip(self.miss.iter()) {
            if hit != 0 || miss != 0 {
                writeln!(f, "{:5}: {:10} {:10}", time, hit, miss)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(flushed: bool, latency: u64) -> CalibrationSample {
        CalibrationSample { flushed, latency }
    }

    #[test]
    fn summary_splits_on_flush_flag() {
        let mut samples = Vec::new();
        for i in 0..10 {
            samples.push(sample(true, 300 + i % 5));
            samples.push(sample(false, 40 + i % 5));
        }
        let summary = CalibrationSummary::from_samples(&samples);
        assert_eq!(summary.hit.total(), 10);
        assert_eq!(summary.miss.total(), 10);
        assert_eq!(summary.hit_mode(), Some(40));
        assert_eq!(summary.miss_floor(), Some(300));
        assert_eq!(summary.suggested_threshold(), Some(44));
    }

    #[test]
    fn no_threshold_without_both_kinds() {
        let samples = [sample(false, 40), sample(false, 41)];
        let summary = CalibrationSummary::from_samples(&samples);
        assert_eq!(summary.suggested_threshold(), None);
        assert_eq!(summary.miss_floor(), None);
    }

    #[cfg(feature = "serde_support")]
    #[test]
    fn msgpack_file_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.msgpack");
        let samples = vec![sample(true, 250), sample(false, 60), sample(true, 1 << 40)];
        write_msgpack(&samples, &path).unwrap();
        let decoded: Vec<CalibrationSample> =
            rmp_serde::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(decoded, samples);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn bench_alternates_flush() {
        let samples = cache_bench(16);
        assert_eq!(samples.len(), 16);
        for (i, s) in samples.iter().enumerate() {
            assert_eq!(s.flushed, i % 2 == 0);
        }
    }
}

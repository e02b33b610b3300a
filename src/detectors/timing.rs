//! Timing-anomaly probe.
//!
//! Runs a small CPU-bound workload a few times and flags the device when
//! even the fastest run exceeds a threshold. Instrumentation (function
//! hooking, single-stepping, JIT-based tracers) slows every run down;
//! ordinary scheduling noise only slows some of them, so the best-of-N
//! sample is what gets compared.
//!
//! The default threshold (1 ms for ~1000 multiply/collect steps, which
//! takes a few microseconds natively) is empirically tuned, not physically
//! exact. Heavy load or slow hardware can still trip it, which is why this
//! probe only ever casts a corroborating vote.

use std::hint::black_box;
use std::time::{Duration, Instant};

use tracing::debug;

use super::Probe;
use crate::engine::catalog::ArtifactCatalog;
use crate::engine::policy::{Confidence, ProbeId, ProbeResult};

pub const DEFAULT_THRESHOLD: Duration = Duration::from_millis(1);
pub const DEFAULT_SAMPLES: usize = 3;

/// Statistics over a set of timing samples.
#[derive(Debug, Clone)]
pub struct TimingStats {
    pub mean: Duration,
    pub min: Duration,
    pub max: Duration,
    pub samples: usize,
}

impl TimingStats {
    fn from_samples(samples: &[Duration]) -> Self {
        if samples.is_empty() {
            return Self {
                mean: Duration::ZERO,
                min: Duration::ZERO,
                max: Duration::ZERO,
                samples: 0,
            };
        }
        let total: Duration = samples.iter().sum();
        Self {
            mean: total / samples.len() as u32,
            min: samples.iter().copied().min().unwrap_or_default(),
            max: samples.iter().copied().max().unwrap_or_default(),
            samples: samples.len(),
        }
    }
}

/// Squares 0..=1000 into a fresh vector.
fn default_workload() {
    let squares: Vec<u64> = (0..=1000u64).map(|v| black_box(v) * v).collect();
    black_box(squares);
}

pub struct TimingProbe {
    threshold: Duration,
    samples: usize,
    workload: fn(),
}

impl TimingProbe {
    pub fn new(threshold: Duration, samples: usize) -> Self {
        Self {
            threshold,
            samples: samples.max(1),
            workload: default_workload,
        }
    }

    /// Time a different workload.
    pub fn with_workload(mut self, workload: fn()) -> Self {
        self.workload = workload;
        self
    }

    pub fn measure(&self) -> TimingStats {
        let samples: Vec<Duration> = (0..self.samples)
            .map(|_| {
                let start = Instant::now();
                (self.workload)();
                start.elapsed()
            })
            .collect();
        TimingStats::from_samples(&samples)
    }
}

impl Default for TimingProbe {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, DEFAULT_SAMPLES)
    }
}

impl Probe for TimingProbe {
    fn id(&self) -> ProbeId {
        ProbeId::TimingAnomaly
    }

    fn confidence(&self) -> Confidence {
        Confidence::Corroborating
    }

    fn run(&self, _catalog: &ArtifactCatalog) -> ProbeResult {
        let stats = self.measure();
        debug!(
            min_us = stats.min.as_micros() as u64,
            mean_us = stats.mean.as_micros() as u64,
            max_us = stats.max.as_micros() as u64,
            threshold_us = self.threshold.as_micros() as u64,
            "workload timing"
        );
        if stats.min > self.threshold {
            ProbeResult::positive(
                self.id(),
                format!("best of {} runs took {:?} (> {:?})", stats.samples, stats.min, self.threshold),
            )
        } else {
            ProbeResult::negative(self.id())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn catalog() -> ArtifactCatalog {
        ArtifactCatalog::builder().path("/unused").build().unwrap()
    }

    fn instrumented_workload() {
        default_workload();
        thread::sleep(Duration::from_millis(5));
    }

    #[test]
    fn test_stats_from_samples() {
        let stats = TimingStats::from_samples(&[
            Duration::from_micros(10),
            Duration::from_micros(30),
            Duration::from_micros(20),
        ]);
        assert_eq!(stats.min, Duration::from_micros(10));
        assert_eq!(stats.max, Duration::from_micros(30));
        assert_eq!(stats.mean, Duration::from_micros(20));
        assert_eq!(stats.samples, 3);
        assert_eq!(TimingStats::from_samples(&[]).samples, 0);
    }

    #[test]
    fn test_uninstrumented_workload_is_negative() {
        // generous threshold: only the direction is under test
        let probe = TimingProbe::new(Duration::from_secs(2), 3);
        assert!(!probe.run(&catalog()).positive);
    }

    #[test]
    fn test_instrumented_overhead_is_positive() {
        let probe = TimingProbe::new(Duration::from_millis(1), 2).with_workload(instrumented_workload);
        let result = probe.run(&catalog());
        assert!(result.positive);
        assert_eq!(result.probe, ProbeId::TimingAnomaly);
    }

    #[test]
    fn test_zero_samples_clamped() {
        let probe = TimingProbe::new(DEFAULT_THRESHOLD, 0);
        assert_eq!(probe.measure().samples, 1);
    }

    #[test]
    fn test_is_corroborating() {
        assert_eq!(TimingProbe::default().confidence(), Confidence::Corroborating);
    }
}

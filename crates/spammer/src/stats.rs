//! Run statistics shared by generators, workers and the block turner.

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters and submission latency for one harness run.
pub struct SpammerStats {
    generated: AtomicU64,
    enqueued: AtomicU64,
    submitted: AtomicU64,
    rejected: AtomicU64,
    retried: AtomicU64,
    throttled: AtomicU64,
    build_failures: AtomicU64,
    fallback_deposits: AtomicU64,
    /// Submission round-trip in microseconds.
    latency: Mutex<Histogram<u64>>,
    started: Instant,
}

impl Default for SpammerStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SpammerStats {
    pub fn new() -> Self {
        Self {
            generated: AtomicU64::new(0),
            enqueued: AtomicU64::new(0),
            submitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
            build_failures: AtomicU64::new(0),
            fallback_deposits: AtomicU64::new(0),
            latency: Mutex::new(
                Histogram::new_with_bounds(1, 60_000_000, 3).expect("constant bounds are valid"),
            ),
            started: Instant::now(),
        }
    }

    pub fn record_generated(&self) {
        self.generated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_submitted(&self, latency: Duration) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        let micros = (latency.as_micros() as u64).clamp(1, 60_000_000);
        let _ = self.latency.lock().record(micros);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_throttled(&self) {
        self.throttled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_build_failure(&self) {
        self.build_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback_deposit(&self) {
        self.fallback_deposits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report(&self) -> StatsReport {
        let latency = self.latency.lock();
        let percentile = |q: f64| {
            if latency.is_empty() {
                Duration::ZERO
            } else {
                Duration::from_micros(latency.value_at_quantile(q))
            }
        };

        StatsReport {
            elapsed: self.started.elapsed(),
            generated: self.generated.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            submitted: self.submitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            build_failures: self.build_failures.load(Ordering::Relaxed),
            fallback_deposits: self.fallback_deposits.load(Ordering::Relaxed),
            p50_latency: percentile(0.50),
            p99_latency: percentile(0.99),
        }
    }
}

/// Point-in-time snapshot of [`SpammerStats`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatsReport {
    pub elapsed: Duration,
    pub generated: u64,
    pub enqueued: u64,
    pub submitted: u64,
    pub rejected: u64,
    pub retried: u64,
    pub throttled: u64,
    pub build_failures: u64,
    pub fallback_deposits: u64,
    pub p50_latency: Duration,
    pub p99_latency: Duration,
}

impl StatsReport {
    /// Accepted submissions per second of wall time.
    pub fn submitted_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.submitted as f64 / secs
        } else {
            0.0
        }
    }

    pub fn print(&self) {
        println!("=== Stress run report ({:.1}s) ===", self.elapsed.as_secs_f64());
        println!("  generated:         {}", self.generated);
        println!("  enqueued:          {}", self.enqueued);
        println!(
            "  submitted:         {} ({:.2}/s)",
            self.submitted,
            self.submitted_per_sec()
        );
        println!("  rejected:          {}", self.rejected);
        println!("  retried:           {}", self.retried);
        println!("  build failures:    {}", self.build_failures);
        println!("  throttled polls:   {}", self.throttled);
        println!("  fallback deposits: {}", self.fallback_deposits);
        println!("  submit p50:        {:?}", self.p50_latency);
        println!("  submit p99:        {:?}", self.p99_latency);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_latency() {
        let stats = SpammerStats::new();
        stats.record_generated();
        stats.record_enqueued();
        stats.record_submitted(Duration::from_millis(2));
        stats.record_submitted(Duration::from_millis(4));
        stats.record_rejected();

        let report = stats.report();
        assert_eq!(report.generated, 1);
        assert_eq!(report.submitted, 2);
        assert_eq!(report.rejected, 1);
        assert!(report.p50_latency >= Duration::from_millis(1));
        assert!(report.p99_latency <= Duration::from_millis(5));
    }

    #[test]
    fn test_empty_report() {
        let report = SpammerStats::new().report();
        assert_eq!(report.p99_latency, Duration::ZERO);
        assert_eq!(report.fallback_deposits, 0);
    }
}

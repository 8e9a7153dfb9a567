//! Transfer Protocol
//!
//! Resumable byte transfer between nodes. A request may carry a resume
//! offset; the serving side answers with Full framing (offset 0), Partial
//! framing (offset within the file), or RangeNotSatisfiable (offset at or
//! beyond the end, meaning the caller already has everything).

mod download;

pub use download::{FetchOutcome, TransferClient};

use std::time::{Duration, Instant};

/// Rate-bounded progress sampler for one in-flight transfer.
///
/// Samples are produced at most once per `interval` (~4/s at the default
/// 250 ms), each carrying percent-complete relative to the expected total
/// and the instantaneous throughput since the previous sample.
#[derive(Debug)]
pub(crate) struct ProgressSampler {
    expected_total: u64,
    interval: Duration,
    last_time: Instant,
    last_bytes: u64,
}

impl ProgressSampler {
    pub(crate) fn new(starting_bytes: u64, expected_total: u64, interval: Duration) -> Self {
        Self {
            expected_total,
            interval,
            last_time: Instant::now(),
            last_bytes: starting_bytes,
        }
    }

    /// Record the cumulative byte count; returns `(percent, bytes_per_sec)`
    /// when enough time has passed since the last sample
    pub(crate) fn sample(&mut self, cumulative_bytes: u64) -> Option<(u8, u64)> {
        let elapsed = self.last_time.elapsed();
        if elapsed < self.interval {
            return None;
        }

        let rate = ((cumulative_bytes - self.last_bytes) as f64 / elapsed.as_secs_f64()) as u64;
        self.last_time = Instant::now();
        self.last_bytes = cumulative_bytes;
        Some((self.percent(cumulative_bytes), rate))
    }

    /// Percent-complete relative to the expected total
    pub(crate) fn percent(&self, cumulative_bytes: u64) -> u8 {
        if self.expected_total == 0 {
            return 100;
        }
        ((cumulative_bytes * 100) / self.expected_total).min(100) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampler_respects_interval() {
        let mut sampler = ProgressSampler::new(0, 1000, Duration::from_secs(60));
        // Far below the interval: no sample
        assert!(sampler.sample(100).is_none());
        assert!(sampler.sample(200).is_none());
    }

    #[test]
    fn test_sampler_percent() {
        let sampler = ProgressSampler::new(0, 200, Duration::from_millis(250));
        assert_eq!(sampler.percent(0), 0);
        assert_eq!(sampler.percent(50), 25);
        assert_eq!(sampler.percent(200), 100);
        // Never above 100 even if more bytes arrive than expected
        assert_eq!(sampler.percent(400), 100);
    }

    #[test]
    fn test_sampler_zero_total() {
        let sampler = ProgressSampler::new(0, 0, Duration::from_millis(250));
        assert_eq!(sampler.percent(0), 100);
    }

    #[test]
    fn test_sampler_emits_after_interval() {
        let mut sampler = ProgressSampler::new(0, 1000, Duration::ZERO);
        let (percent, _rate) = sampler.sample(500).unwrap();
        assert_eq!(percent, 50);
    }
}

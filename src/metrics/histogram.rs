//! Fixed-capacity latency histogram.

use crate::utils::sync;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use std::time::{Duration, SystemTime};

pub const DEFAULT_HISTOGRAM_CAPACITY: usize = 1000;

/// Point-in-time latency statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyMetrics {
    /// Every sample ever added, including ones already overwritten in the buffer.
    pub count: u64,
    pub min: Duration,
    pub max: Duration,
    pub avg: Duration,
    pub p50: Duration,
    pub p75: Duration,
    pub p90: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub last_updated: Option<SystemTime>,
}

#[derive(Debug)]
struct Ring {
    samples: Vec<Duration>,
    count: u64,
    sum: Duration,
    min: Duration,
    max: Duration,
    last_updated: Option<SystemTime>,
}

/// Circular buffer of the last `capacity` samples plus running count/sum/min/max.
///
/// Percentiles are computed over the buffered samples only; min, max and avg cover every
/// sample ever added.
#[derive(Debug)]
pub struct Histogram {
    capacity: usize,
    ring: RwLock<Ring>,
}

impl Histogram {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTOGRAM_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            ring: RwLock::new(Ring {
                samples: Vec::with_capacity(capacity),
                count: 0,
                sum: Duration::ZERO,
                min: Duration::ZERO,
                max: Duration::ZERO,
                last_updated: None,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn add(&self, sample: Duration) {
        let mut ring = sync::write(&self.ring);
        let slot = (ring.count % self.capacity as u64) as usize;
        if ring.samples.len() < self.capacity {
            ring.samples.push(sample);
        } else {
            ring.samples[slot] = sample;
        }
        if ring.count == 0 || sample < ring.min {
            ring.min = sample;
        }
        if sample > ring.max {
            ring.max = sample;
        }
        ring.count += 1;
        ring.sum = ring.sum.saturating_add(sample);
        ring.last_updated = Some(SystemTime::now());
    }

    pub fn count(&self) -> u64 {
        sync::read(&self.ring).count
    }

    pub fn snapshot(&self) -> LatencyMetrics {
        let (mut samples, count, sum, min, max, last_updated) = {
            let ring = sync::read(&self.ring);
            (
                ring.samples.clone(),
                ring.count,
                ring.sum,
                ring.min,
                ring.max,
                ring.last_updated,
            )
        };
        if count == 0 {
            return LatencyMetrics::default();
        }
        samples.sort_unstable();

        LatencyMetrics {
            count,
            min,
            max,
            avg: Duration::from_nanos((sum.as_nanos() / count as u128) as u64),
            p50: percentile(&samples, 50.0),
            p75: percentile(&samples, 75.0),
            p90: percentile(&samples, 90.0),
            p95: percentile(&samples, 95.0),
            p99: percentile(&samples, 99.0),
            last_updated,
        }
    }

    /// Single percentile over the buffered samples.
    pub fn percentile(&self, p: f64) -> Duration {
        let mut samples = sync::read(&self.ring).samples.clone();
        samples.sort_unstable();
        percentile(&samples, p)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Linear interpolation between closest ranks. `sorted` must be ascending.
pub(crate) fn percentile(sorted: &[Duration], p: f64) -> Duration {
    let Some(last) = sorted.last() else {
        return Duration::ZERO;
    };
    if p <= 0.0 {
        return sorted[0];
    }
    if p >= 100.0 {
        return *last;
    }
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = (lower + 1).min(sorted.len() - 1);
    let lo = sorted[lower].as_nanos() as f64;
    let hi = sorted[upper].as_nanos() as f64;
    Duration::from_nanos((lo + (rank - lower as f64) * (hi - lo)).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_empty_histogram_is_all_zero() {
        let h = Histogram::new();
        assert_eq!(h.snapshot(), LatencyMetrics::default());
        assert_eq!(h.percentile(50.0), Duration::ZERO);
    }

    #[test]
    fn test_min_max_avg_and_extreme_percentiles() {
        let h = Histogram::new();
        for v in [30, 10, 50, 20, 40] {
            h.add(ms(v));
        }
        let s = h.snapshot();
        assert_eq!(s.count, 5);
        assert_eq!(s.min, ms(10));
        assert_eq!(s.max, ms(50));
        assert_eq!(s.avg, ms(30));
        assert_eq!(s.p50, ms(30));
        assert_eq!(h.percentile(0.0), ms(10));
        assert_eq!(h.percentile(100.0), ms(50));
        assert_eq!(h.percentile(-5.0), ms(10));
        assert_eq!(h.percentile(150.0), ms(50));
    }

    #[test]
    fn test_linear_interpolation() {
        let sorted = vec![ms(10), ms(20)];
        // rank = 0.75 * 1 = 0.75 -> 10 + 0.75 * 10
        assert_eq!(percentile(&sorted, 75.0), Duration::from_micros(17_500));
        let one = vec![ms(7)];
        assert_eq!(percentile(&one, 99.0), ms(7));
    }

    #[test]
    fn test_percentiles_over_one_to_hundred() {
        let h = Histogram::new();
        for v in 1..=100 {
            h.add(ms(v));
        }
        let s = h.snapshot();
        // rank = 0.5 * 99 = 49.5 -> between 50ms and 51ms
        assert_eq!(s.p50, Duration::from_micros(50_500));
        assert_eq!(s.p99, Duration::from_micros(99_010));
        assert!(s.p75 < s.p90 && s.p90 < s.p95 && s.p95 < s.p99);
    }

    #[test]
    fn test_ring_overwrites_oldest_but_keeps_running_stats() {
        let h = Histogram::with_capacity(3);
        for v in 1..=5 {
            h.add(ms(v));
        }
        let s = h.snapshot();
        assert_eq!(s.count, 5);
        assert_eq!(s.min, ms(1));
        assert_eq!(s.max, ms(5));
        assert_eq!(s.avg, ms(3));
        // Buffered samples are now {4, 5, 3}.
        assert_eq!(h.percentile(0.0), ms(3));
        assert_eq!(s.p50, ms(4));
        assert!(s.last_updated.is_some());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let h = Histogram::with_capacity(0);
        assert_eq!(h.capacity(), 1);
        h.add(ms(2));
        h.add(ms(4));
        assert_eq!(h.snapshot().p50, ms(4));
    }

    #[test]
    fn test_concurrent_writers() {
        let h = Arc::new(Histogram::with_capacity(100));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let h = Arc::clone(&h);
                std::thread::spawn(move || {
                    for j in 0..250 {
                        h.add(ms(1 + (i * 250 + j) % 97));
                        let _ = h.snapshot();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(h.count(), 2000);
        let s = h.snapshot();
        assert_eq!(s.min, ms(1));
        assert_eq!(s.max, ms(97));
    }
}

//! Lock-free per-metric statistics.
//!
//! Each metric is written by exactly one thread (the owning path or node
//! worker) and read from anywhere: the supervisor's periodic dump and
//! stats mapping entries both sample aggregates without taking a lock.
//! Values are published as f64 bit patterns in relaxed atomics; a reader
//! may see a snapshot that is one update old, never a torn one.

use basalt_config::ConfigError;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// The quantities the core tracks per node or path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Metric {
    /// Samples that passed through.
    Smps,
    /// Sequence number gaps between consecutive samples.
    GapSequence,
    /// Wall-clock gap between consecutive receive stamps, in seconds.
    GapReceived,
    /// One-way delay: receive stamp minus origin stamp, in seconds.
    Owd,
    /// Values per sample.
    SignalCount,
    /// Samples dropped by hooks or on purpose.
    Dropped,
    /// Samples evicted from a full destination queue.
    QueueOverrun,
    /// Acquire attempts that found the pool empty.
    PoolUnderrun,
}

pub const METRIC_COUNT: usize = 8;

impl Metric {
    pub const ALL: [Metric; METRIC_COUNT] = [
        Metric::Smps,
        Metric::GapSequence,
        Metric::GapReceived,
        Metric::Owd,
        Metric::SignalCount,
        Metric::Dropped,
        Metric::QueueOverrun,
        Metric::PoolUnderrun,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Smps => "smps",
            Metric::GapSequence => "gap_sequence",
            Metric::GapReceived => "gap_received",
            Metric::Owd => "owd",
            Metric::SignalCount => "signal_count",
            Metric::Dropped => "dropped",
            Metric::QueueOverrun => "queue_overrun",
            Metric::PoolUnderrun => "pool_underrun",
        }
    }

    pub fn from_str(s: &str) -> Result<Metric, ConfigError> {
        Metric::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ConfigError::unknown("metric", s))
    }

    fn index(self) -> usize {
        match self {
            Metric::Smps => 0,
            Metric::GapSequence => 1,
            Metric::GapReceived => 2,
            Metric::Owd => 3,
            Metric::SignalCount => 4,
            Metric::Dropped => 5,
            Metric::QueueOverrun => 6,
            Metric::PoolUnderrun => 7,
        }
    }
}

/// The views a mapping entry or a dump can take of one metric.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Aggregate {
    Total,
    Last,
    Lowest,
    Highest,
    Mean,
    Variance,
    Stddev,
}

impl Aggregate {
    pub fn as_str(self) -> &'static str {
        match self {
            Aggregate::Total => "total",
            Aggregate::Last => "last",
            Aggregate::Lowest => "lowest",
            Aggregate::Highest => "highest",
            Aggregate::Mean => "mean",
            Aggregate::Variance => "variance",
            Aggregate::Stddev => "stddev",
        }
    }

    pub fn from_str(s: &str) -> Result<Aggregate, ConfigError> {
        match s {
            "total" => Ok(Aggregate::Total),
            "last" => Ok(Aggregate::Last),
            "lowest" => Ok(Aggregate::Lowest),
            "highest" => Ok(Aggregate::Highest),
            "mean" => Ok(Aggregate::Mean),
            "variance" | "var" => Ok(Aggregate::Variance),
            "stddev" => Ok(Aggregate::Stddev),
            _ => Err(ConfigError::unknown("aggregate", s)),
        }
    }
}

/// Running statistics over one metric (Welford's online update).
///
/// Single writer; fields are individually atomic so concurrent readers
/// never see torn floats. Mean and M2 are updated as a pair without a
/// lock, so a reader may combine a fresh mean with a stale M2 for the
/// duration of one update. That skew is bounded by one sample and
/// irrelevant for telemetry.
struct Stat {
    count: AtomicU64,
    last: AtomicU64,
    lowest: AtomicU64,
    highest: AtomicU64,
    mean: AtomicU64,
    m2: AtomicU64,
}

impl Stat {
    fn new() -> Stat {
        Stat {
            count: AtomicU64::new(0),
            last: AtomicU64::new(0),
            lowest: AtomicU64::new(f64::INFINITY.to_bits()),
            highest: AtomicU64::new(f64::NEG_INFINITY.to_bits()),
            mean: AtomicU64::new(0f64.to_bits()),
            m2: AtomicU64::new(0f64.to_bits()),
        }
    }

    #[inline(always)]
    fn record(&self, value: f64) {
        let n = self.count.fetch_add(1, Ordering::Relaxed) + 1;

        self.last.store(value.to_bits(), Ordering::Relaxed);

        if value < f64::from_bits(self.lowest.load(Ordering::Relaxed)) {
            self.lowest.store(value.to_bits(), Ordering::Relaxed);
        }
        if value > f64::from_bits(self.highest.load(Ordering::Relaxed)) {
            self.highest.store(value.to_bits(), Ordering::Relaxed);
        }

        let mean = f64::from_bits(self.mean.load(Ordering::Relaxed));
        let m2 = f64::from_bits(self.m2.load(Ordering::Relaxed));
        let delta = value - mean;
        let mean2 = mean + delta / n as f64;
        let m2_2 = m2 + delta * (value - mean2);
        self.mean.store(mean2.to_bits(), Ordering::Relaxed);
        self.m2.store(m2_2.to_bits(), Ordering::Relaxed);
    }

    fn get(&self, agg: Aggregate) -> f64 {
        let n = self.count.load(Ordering::Relaxed);
        match agg {
            Aggregate::Total => n as f64,
            Aggregate::Last => f64::from_bits(self.last.load(Ordering::Relaxed)),
            Aggregate::Lowest => {
                let v = f64::from_bits(self.lowest.load(Ordering::Relaxed));
                if v.is_finite() { v } else { 0.0 }
            }
            Aggregate::Highest => {
                let v = f64::from_bits(self.highest.load(Ordering::Relaxed));
                if v.is_finite() { v } else { 0.0 }
            }
            Aggregate::Mean => f64::from_bits(self.mean.load(Ordering::Relaxed)),
            Aggregate::Variance => {
                if n < 2 {
                    0.0
                } else {
                    f64::from_bits(self.m2.load(Ordering::Relaxed)) / (n - 1) as f64
                }
            }
            Aggregate::Stddev => self.get(Aggregate::Variance).sqrt(),
        }
    }
}

/// A full metric table, one slot per [`Metric`].
pub struct Stats {
    table: [Stat; METRIC_COUNT],
}

impl Stats {
    pub fn new() -> Stats {
        Stats {
            table: std::array::from_fn(|_| Stat::new()),
        }
    }

    #[inline(always)]
    pub fn record(&self, metric: Metric, value: f64) {
        self.table[metric.index()].record(value);
    }

    /// Convenience for pure event counters.
    #[inline(always)]
    pub fn count(&self, metric: Metric) {
        self.record(metric, 1.0);
    }

    pub fn get(&self, metric: Metric, agg: Aggregate) -> f64 {
        self.table[metric.index()].get(agg)
    }

    pub fn total(&self, metric: Metric) -> u64 {
        self.table[metric.index()].count.load(Ordering::Relaxed)
    }

    /// One `info!` line per metric that saw traffic.
    pub fn dump(&self, owner: &str) {
        for metric in Metric::ALL {
            let stat = &self.table[metric.index()];
            let n = stat.count.load(Ordering::Relaxed);
            if n == 0 {
                continue;
            }
            info!(
                "stats {owner}.{name}: total={n} last={last:.6} mean={mean:.6} \
                 lowest={lowest:.6} highest={highest:.6} stddev={stddev:.6}",
                name = metric.as_str(),
                last = stat.get(Aggregate::Last),
                mean = stat.get(Aggregate::Mean),
                lowest = stat.get(Aggregate::Lowest),
                highest = stat.get(Aggregate::Highest),
                stddev = stat.get(Aggregate::Stddev),
            );
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregates_match_hand_computation() {
        let stats = Stats::new();
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            stats.record(Metric::Owd, v);
        }

        assert_eq!(stats.get(Metric::Owd, Aggregate::Total), 8.0);
        assert_eq!(stats.get(Metric::Owd, Aggregate::Last), 9.0);
        assert_eq!(stats.get(Metric::Owd, Aggregate::Lowest), 2.0);
        assert_eq!(stats.get(Metric::Owd, Aggregate::Highest), 9.0);
        assert!((stats.get(Metric::Owd, Aggregate::Mean) - 5.0).abs() < 1e-12);
        // Sample variance of the classic 8-value set is 32/7.
        assert!((stats.get(Metric::Owd, Aggregate::Variance) - 32.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn empty_metric_reads_as_zero() {
        let stats = Stats::new();
        assert_eq!(stats.get(Metric::Dropped, Aggregate::Total), 0.0);
        assert_eq!(stats.get(Metric::Dropped, Aggregate::Lowest), 0.0);
        assert_eq!(stats.get(Metric::Dropped, Aggregate::Variance), 0.0);
    }

    #[test]
    fn metric_names_roundtrip() {
        for m in Metric::ALL {
            assert_eq!(Metric::from_str(m.as_str()).unwrap(), m);
        }
        assert!(Metric::from_str("latency").is_err());
    }

    #[test]
    fn counters_accumulate_under_concurrent_reads() {
        let stats = std::sync::Arc::new(Stats::new());
        let reader = {
            let stats = stats.clone();
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    let _ = stats.get(Metric::Smps, Aggregate::Mean);
                }
            })
        };

        for _ in 0..10_000 {
            stats.count(Metric::Smps);
        }
        reader.join().unwrap();

        assert_eq!(stats.total(Metric::Smps), 10_000);
    }
}

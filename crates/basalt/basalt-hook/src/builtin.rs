//! The standard hook set installed on every `builtin = true` path:
//! header repair, reordering guard, shape guard and statistics collection.

use basalt_sample::{Sample, SampleFlags, SignalList};
use basalt_stats::{Metric, Stats};
use basalt_util::TimeSpec;
use std::sync::Arc;
use tracing::warn;

use crate::{Hook, HookError, HookReason};

/// Fills in header fields a driver did not provide: receive timestamp,
/// origin timestamp and sequence number.
pub struct FixHook {
    next_sequence: u64,
}

impl FixHook {
    pub fn new() -> Self {
        Self { next_sequence: 0 }
    }
}

impl Default for FixHook {
    fn default() -> Self {
        Self::new()
    }
}

impl Hook for FixHook {
    fn name(&self) -> &'static str {
        "fix"
    }

    fn start(&mut self) -> Result<(), HookError> {
        self.next_sequence = 0;
        Ok(())
    }

    fn process(&mut self, smp: &mut Sample) -> HookReason {
        if !smp.flags.contains(SampleFlags::TS_RECEIVED) {
            smp.ts.received = TimeSpec::now();
            smp.flags.insert(SampleFlags::TS_RECEIVED);
        }

        if !smp.flags.contains(SampleFlags::TS_ORIGIN) {
            smp.ts.origin = smp.ts.received;
            smp.flags.insert(SampleFlags::TS_ORIGIN);
        }

        if !smp.flags.contains(SampleFlags::SEQUENCE) {
            smp.sequence = self.next_sequence;
            smp.flags.insert(SampleFlags::SEQUENCE);
        }
        self.next_sequence = smp.sequence + 1;

        HookReason::Ok
    }
}

/// Enforces monotonic sequence numbers: reordered or repeated samples are
/// dropped and counted.
pub struct DropHook {
    stats: Arc<Stats>,
    last: Option<u64>,
}

impl DropHook {
    pub fn new(stats: Arc<Stats>) -> Self {
        Self { stats, last: None }
    }
}

impl Hook for DropHook {
    fn name(&self) -> &'static str {
        "drop"
    }

    fn start(&mut self) -> Result<(), HookError> {
        self.last = None;
        Ok(())
    }

    fn process(&mut self, smp: &mut Sample) -> HookReason {
        if !smp.flags.contains(SampleFlags::SEQUENCE) {
            return HookReason::Ok;
        }

        if let Some(last) = self.last {
            if smp.sequence <= last {
                self.stats.count(Metric::Dropped);
                return HookReason::SkipSample;
            }
            if smp.sequence > last + 1 {
                self.stats
                    .record(Metric::GapSequence, (smp.sequence - last) as f64);
            }
        }

        self.last = Some(smp.sequence);
        HookReason::Ok
    }
}

/// Drops samples whose value count does not match the signal list the
/// chain was prepared with.
pub struct GuardHook {
    stats: Arc<Stats>,
    expected: usize,
    warned: bool,
}

impl GuardHook {
    pub fn new(stats: Arc<Stats>) -> Self {
        Self {
            stats,
            expected: 0,
            warned: false,
        }
    }
}

impl Hook for GuardHook {
    fn name(&self) -> &'static str {
        "guard"
    }

    fn prepare(&mut self, signals: Arc<SignalList>) -> Result<Arc<SignalList>, HookError> {
        self.expected = signals.len();
        Ok(signals)
    }

    fn process(&mut self, smp: &mut Sample) -> HookReason {
        // An unconfigured direction imposes no shape.
        if self.expected == 0 || smp.len() == self.expected {
            return HookReason::Ok;
        }

        if !self.warned {
            warn!(
                "dropping samples with {got} values, expected {want}",
                got = smp.len(),
                want = self.expected
            );
            self.warned = true;
        }
        self.stats.count(Metric::Dropped);
        HookReason::SkipSample
    }
}

/// Feeds the owner's statistics table: throughput, one-way delay,
/// inter-arrival gap and per-sample value count.
pub struct StatsHook {
    stats: Arc<Stats>,
    last_received: Option<TimeSpec>,
}

impl StatsHook {
    pub fn new(stats: Arc<Stats>) -> Self {
        Self {
            stats,
            last_received: None,
        }
    }
}

impl Hook for StatsHook {
    fn name(&self) -> &'static str {
        "stats"
    }

    fn start(&mut self) -> Result<(), HookError> {
        self.last_received = None;
        Ok(())
    }

    fn process(&mut self, smp: &mut Sample) -> HookReason {
        self.stats.count(Metric::Smps);
        self.stats.record(Metric::SignalCount, smp.len() as f64);

        let has_recv = smp.flags.contains(SampleFlags::TS_RECEIVED);

        if has_recv && smp.flags.contains(SampleFlags::TS_ORIGIN) {
            let owd = smp.ts.received.diff(smp.ts.origin).to_f64();
            self.stats.record(Metric::Owd, owd);
        }

        if has_recv {
            if let Some(last) = self.last_received {
                self.stats
                    .record(Metric::GapReceived, smp.ts.received.diff(last).to_f64());
            }
            self.last_received = Some(smp.ts.received);
        }

        HookReason::Ok
    }
}

//! Shared fixtures for the hot-path benches.

use basalt_icc::{PoolConfig, SampleBox, SamplePool};
use basalt_sample::{SampleFlags, Signal, SignalData, SignalList, SignalType};
use basalt_util::TimeSpec;
use std::sync::Arc;

pub fn test_pool(count: usize, capacity: usize) -> SamplePool {
    SamplePool::new(&PoolConfig::heap(count, capacity)).expect("failed to build pool")
}

pub fn float_signals(count: usize) -> Arc<SignalList> {
    Arc::new(SignalList::from_signals(
        (0..count)
            .map(|i| Arc::new(Signal::new(format!("ch{i}"), "", SignalType::Float)))
            .collect(),
    ))
}

/// One realistic sample: full header, `width` float values.
pub fn make_test_sample(pool: &SamplePool, signals: &Arc<SignalList>, width: usize) -> SampleBox {
    let mut smp = pool.acquire().expect("pool underrun in fixture");
    smp.sequence = 1234;
    smp.ts.origin = TimeSpec::new(1_700_000_000, 123_456_789);
    smp.ts.received = TimeSpec::new(1_700_000_000, 123_999_999);
    smp.flags = SampleFlags::ALL;
    smp.set_signals(signals.clone());
    for i in 0..width {
        smp.data_mut()[i] = SignalData::float(i as f64 * 0.25);
    }
    smp.set_len(width);
    smp
}

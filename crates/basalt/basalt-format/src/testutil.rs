//! Shared fixtures for the codec tests: a small pool and samples filled
//! with the recognizable 235-sequence pattern used across the suite.

use basalt_icc::{PoolConfig, SampleBox, SamplePool};
use basalt_sample::{SampleFlags, Signal, SignalData, SignalList, SignalType};
use basalt_util::TimeSpec;
use std::sync::Arc;

pub fn pool(count: usize, cap: usize) -> SamplePool {
    SamplePool::new(&PoolConfig::heap(count, cap)).unwrap()
}

pub fn signals(types: &[SignalType]) -> Arc<SignalList> {
    Arc::new(SignalList::from_signals(
        types
            .iter()
            .enumerate()
            .map(|(i, &ty)| Arc::new(Signal::new(format!("sig{i}"), "", ty)))
            .collect(),
    ))
}

/// Fills `count` samples with deterministic values: sample `i` carries
/// sequence `235 + i` and value `j` is derived from both indices.
pub fn fill(pool: &SamplePool, signals: &Arc<SignalList>, count: usize) -> Vec<SampleBox> {
    let mut out = Vec::new();

    for i in 0..count {
        let mut smp = pool.acquire().unwrap();
        smp.sequence = 235 + i as u64;
        smp.ts.origin = TimeSpec::new(100 + i as i64, 200 + i as i64 * 50_000);
        smp.flags = SampleFlags::SEQUENCE | SampleFlags::TS_ORIGIN | SampleFlags::DATA;
        smp.set_signals(signals.clone());

        let n = signals.len();
        for j in 0..n {
            smp.data_mut()[j] = match signals[j].ty {
                SignalType::Boolean => SignalData::boolean((i + j) % 2 == 0),
                SignalType::Integer => SignalData::integer((j + i * 1000) as i64),
                SignalType::Float => SignalData::float(j as f64 * 0.1 + i as f64 * 100.0),
                SignalType::Complex => SignalData::complex(j as f32 * 0.1, i as f32 * 100.0),
            };
        }
        smp.set_len(n);
        out.push(smp);
    }

    out
}

/// Asserts that two samples agree on every field selected by `flags`.
pub fn assert_sample_eq(a: &SampleBox, b: &SampleBox, flags: SampleFlags) {
    assert_eq!(a.len(), b.len(), "length mismatch");

    if flags.contains(SampleFlags::SEQUENCE) {
        assert_eq!(a.sequence, b.sequence, "sequence mismatch");
    }
    if flags.contains(SampleFlags::TS_ORIGIN) {
        assert_eq!(a.ts.origin, b.ts.origin, "ts.origin mismatch");
    }
    if flags.contains(SampleFlags::DATA) {
        for j in 0..a.len() {
            let ty = a.signal_type(j);
            assert_eq!(
                a.data()[j].get(ty),
                b.data()[j].get(ty),
                "data mismatch at index {j}"
            );
        }
    }
}

//! In-process queue endpoint: whatever a path writes here comes back out
//! of the read side, decoupled through a signalled queue. Useful for
//! chaining paths and for tests that need a node with no outside world.

use basalt_config::ConfigError;
use basalt_icc::{SampleBox, SignalledQueue};
use serde::Deserialize;
use serde_json::Value;
use std::os::unix::io::RawFd;
use std::sync::Arc;

use crate::NodeError;
use crate::node::{DriverContext, NodeDriver};

#[derive(Debug, Deserialize)]
struct LoopbackConfig {
    #[serde(default = "defaults::queuelen")]
    queuelen: usize,
}

mod defaults {
    pub fn queuelen() -> usize {
        1024
    }
}

pub struct LoopbackDriver {
    queuelen: usize,
    queue: Option<Arc<SignalledQueue>>,
    /// Scratch for pulled references while they are copied out.
    pulled: Vec<SampleBox>,
}

impl LoopbackDriver {
    pub fn new() -> Self {
        Self {
            queuelen: defaults::queuelen(),
            queue: None,
            pulled: Vec::new(),
        }
    }
}

impl Default for LoopbackDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeDriver for LoopbackDriver {
    fn parse(&mut self, cfg: &Value) -> Result<(), ConfigError> {
        let cfg: LoopbackConfig = basalt_config::from_value(cfg)?;
        if cfg.queuelen == 0 {
            return Err(ConfigError::invalid("queuelen", "must be at least 1"));
        }
        self.queuelen = basalt_config::pow2_ceil(cfg.queuelen);
        Ok(())
    }

    fn prepare(&mut self) -> Result<(), NodeError> {
        self.queue = Some(Arc::new(SignalledQueue::new(self.queuelen)?));
        Ok(())
    }

    fn read(&mut self, smps: &mut [SampleBox]) -> Result<usize, NodeError> {
        let Some(queue) = self.queue.as_ref() else {
            return Err(NodeError::driver("loopback not prepared"));
        };

        queue.acknowledge();
        self.pulled.clear();
        let n = queue.pull_many(&mut self.pulled, smps.len());

        // Copy into the caller's fresh samples so the writer's references
        // return to their own pool immediately.
        for (dst, src) in smps.iter_mut().zip(self.pulled.drain(..)) {
            dst.copy_from(&src);
        }

        Ok(n)
    }

    fn write(&mut self, smps: &[SampleBox]) -> Result<usize, NodeError> {
        let Some(queue) = self.queue.as_ref() else {
            return Err(NodeError::driver("loopback not prepared"));
        };

        for smp in smps {
            match queue.push_evict(smp.clone()) {
                Ok(_dropped) => {}
                Err(_) => return Err(NodeError::Stopping),
            }
        }

        Ok(smps.len())
    }

    fn poll_fds(&self) -> Vec<RawFd> {
        match &self.queue {
            Some(queue) => vec![queue.fd()],
            None => Vec::new(),
        }
    }

    /// Both directions speak the same queue, so a swap is a no-op.
    fn reverse(&mut self) -> Result<(), NodeError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_icc::{PoolConfig, SamplePool};
    use basalt_sample::{SampleFlags, SignalData};

    fn driver() -> LoopbackDriver {
        let mut d = LoopbackDriver::new();
        d.parse(&serde_json::json!({ "queuelen": 8 })).unwrap();
        d.prepare().unwrap();
        d
    }

    #[test]
    fn writes_come_back_as_reads() {
        let pool = SamplePool::new(&PoolConfig::heap(8, 4)).unwrap();
        let mut d = driver();

        let mut batch = Vec::new();
        for i in 0..3u64 {
            let mut smp = pool.acquire().unwrap();
            smp.sequence = i;
            smp.data_mut()[0] = SignalData::float(i as f64);
            smp.set_len(1);
            smp.flags = SampleFlags::SEQUENCE | SampleFlags::DATA;
            batch.push(smp);
        }
        assert_eq!(d.write(&batch).unwrap(), 3);
        drop(batch);

        let mut out = Vec::new();
        pool.acquire_many(&mut out, 3);
        assert_eq!(d.read(&mut out).unwrap(), 3);
        assert_eq!(out[0].sequence, 0);
        assert_eq!(out[2].data()[0].as_float(), 2.0);

        // Everything is back in the pool: the 3 writer samples were
        // released on copy, the 3 reader samples are still held.
        assert_eq!(pool.available(), 8 - 3);
    }

    #[test]
    fn empty_queue_reads_zero() {
        let pool = SamplePool::new(&PoolConfig::heap(2, 2)).unwrap();
        let mut d = driver();

        let mut out = Vec::new();
        pool.acquire_many(&mut out, 1);
        assert_eq!(d.read(&mut out).unwrap(), 0);
    }

    #[test]
    fn queue_overflow_evicts_oldest() {
        let pool = SamplePool::new(&PoolConfig::heap(16, 2)).unwrap();
        let mut d = LoopbackDriver::new();
        d.parse(&serde_json::json!({ "queuelen": 2 })).unwrap();
        d.prepare().unwrap();

        let mut batch = Vec::new();
        for i in 0..5u64 {
            let mut smp = pool.acquire().unwrap();
            smp.sequence = i;
            batch.push(smp);
        }
        d.write(&batch).unwrap();
        drop(batch);

        let mut out = Vec::new();
        pool.acquire_many(&mut out, 5);
        assert_eq!(d.read(&mut out).unwrap(), 2);
        assert_eq!(out[0].sequence, 3);
        assert_eq!(out[1].sequence, 4);
    }
}

//! One input of a path.
//!
//! The first path to claim a node becomes its *master*: its worker owns
//! the node's read pump. Further paths reading the same node get a
//! *secondary* source, fed by the master through an in-process signalled
//! queue, so every node is read by exactly one thread.

use basalt_icc::{PoolConfig, SampleBox, SamplePool, SignalledQueue};
use basalt_node::{Node, NodeError};
use basalt_sample::SampleFlags;
use basalt_stats::Metric;
use basalt_util::TimeSpec;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use tracing::warn;

use crate::PathError;

/// What a read attempt produced.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Samples appended to the output vector.
    Samples(usize),
    /// Nothing right now; try again on the next wakeup.
    Idle,
    /// The source is gone for good (end of stream or fatal error).
    Finished {
        /// True when the stream ended gracefully and asked for a
        /// supervisor shutdown (file sources with `eof = "stop"`).
        graceful: bool,
    },
}

enum Kind {
    Master {
        /// Queues of secondary sources on other paths, snapshotted at
        /// start.
        fanout: Vec<Arc<SignalledQueue>>,
    },
    Secondary {
        queue: Arc<SignalledQueue>,
    },
}

pub struct PathSource {
    node: Arc<Node>,
    kind: Kind,
    pool: SamplePool,
    masked: bool,
    vectorize: usize,
    scratch: Vec<SampleBox>,
}

impl PathSource {
    pub fn master(node: Arc<Node>, queuelen: usize, masked: bool) -> std::io::Result<Self> {
        let vectorize = node.input_vectorize();
        let pool = Self::make_pool(&node, queuelen, vectorize)?;
        Ok(Self {
            node,
            kind: Kind::Master { fanout: Vec::new() },
            pool,
            masked,
            vectorize,
            scratch: Vec::new(),
        })
    }

    pub fn secondary(
        node: Arc<Node>,
        queue: Arc<SignalledQueue>,
        queuelen: usize,
        masked: bool,
    ) -> std::io::Result<Self> {
        let vectorize = node.input_vectorize();
        let pool = Self::make_pool(&node, queuelen, vectorize)?;
        Ok(Self {
            node,
            kind: Kind::Secondary { queue },
            pool,
            masked,
            vectorize,
            scratch: Vec::new(),
        })
    }

    fn make_pool(node: &Node, queuelen: usize, vectorize: usize) -> std::io::Result<SamplePool> {
        // Room for the in-flight batch plus everything the path may still
        // hold in `latest` buffers and destination queues.
        let count = queuelen.max(vectorize * 4).max(16);
        let capacity = node.input_signals().len().max(64);
        SamplePool::new(&PoolConfig::heap(count, capacity))
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub fn is_masked(&self) -> bool {
        self.masked
    }

    pub fn is_master(&self) -> bool {
        matches!(self.kind, Kind::Master { .. })
    }

    /// Called by the owning worker at start; freezes the fan-out set.
    pub fn snapshot_fanout(&mut self) {
        if let Kind::Master { fanout } = &mut self.kind {
            *fanout = self.node.fanout();
        }
    }

    /// Descriptors this source wakes up on.
    pub fn fds(&self) -> Vec<RawFd> {
        match &self.kind {
            Kind::Master { .. } => self.node.poll_fds(),
            Kind::Secondary { queue } => vec![queue.fd()],
        }
    }

    /// Reads up to one vectorize batch, appending the surviving samples
    /// to `out`.
    pub fn read(&mut self, out: &mut Vec<SampleBox>) -> Result<ReadOutcome, PathError> {
        match &self.kind {
            Kind::Master { fanout } => {
                self.scratch.clear();
                let got = self.pool.acquire_many(&mut self.scratch, self.vectorize);
                if got == 0 {
                    self.node.stats().count(Metric::PoolUnderrun);
                    return Ok(ReadOutcome::Idle);
                }

                match self.node.read(&mut self.scratch) {
                    Ok(0) => Ok(ReadOutcome::Idle),
                    Ok(n) => {
                        let now = TimeSpec::now();
                        for smp in self.scratch.iter_mut() {
                            if !smp.flags.contains(SampleFlags::TS_RECEIVED) {
                                smp.ts.received = now;
                                smp.flags.insert(SampleFlags::TS_RECEIVED);
                            }
                        }

                        for queue in fanout {
                            for smp in &self.scratch {
                                match queue.push_evict(smp.clone()) {
                                    Ok(dropped) if dropped > 0 => {
                                        self.node.stats().count(Metric::QueueOverrun);
                                    }
                                    _ => {}
                                }
                            }
                        }

                        out.append(&mut self.scratch);
                        Ok(ReadOutcome::Samples(n))
                    }
                    Err(NodeError::Stopping) => {
                        self.node.request_stop();
                        Ok(ReadOutcome::Finished { graceful: true })
                    }
                    Err(e) if e.is_fatal() => {
                        warn!(
                            "source node {name} failed, winding it down: {e}",
                            name = self.node.name()
                        );
                        self.node.request_stop();
                        Ok(ReadOutcome::Finished { graceful: false })
                    }
                    Err(_) => Ok(ReadOutcome::Idle),
                }
            }

            Kind::Secondary { queue } => {
                queue.acknowledge();

                self.scratch.clear();
                let shared: &mut Vec<SampleBox> = &mut self.scratch;
                let mut pulled = Vec::with_capacity(self.vectorize);
                let n = queue.pull_many(&mut pulled, self.vectorize);
                if n == 0 {
                    return Ok(if queue.is_finished() {
                        ReadOutcome::Finished { graceful: false }
                    } else {
                        ReadOutcome::Idle
                    });
                }

                // Copy into this path's own pool so the master's samples
                // go home immediately.
                let mut copied = 0;
                for src in pulled.drain(..) {
                    let Some(mut fresh) = self.pool.acquire() else {
                        break;
                    };
                    fresh.copy_from(&src);
                    shared.push(fresh);
                    copied += 1;
                }

                out.append(shared);
                Ok(ReadOutcome::Samples(copied))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_node::NodeRegistry;
    use serde_json::json;
    use uuid::Uuid;

    fn loopback_node(queuelen: usize) -> Arc<Node> {
        let node = Node::parse(
            "lo",
            &json!({ "type": "loopback", "queuelen": queuelen, "in": { "signals": 2 } }),
            Uuid::nil(),
            &NodeRegistry::with_builtins(),
        )
        .unwrap();
        node.check().unwrap();
        node.prepare().unwrap();
        node.start().unwrap();
        node
    }

    #[test]
    fn master_read_pumps_the_node() {
        let node = loopback_node(16);
        let mut source = PathSource::master(node.clone(), 16, true).unwrap();

        // Feed the loopback through its write side.
        let pool = SamplePool::new(&PoolConfig::heap(4, 2)).unwrap();
        let mut batch = Vec::new();
        let mut smp = pool.acquire().unwrap();
        smp.sequence = 3;
        smp.flags.insert(SampleFlags::SEQUENCE);
        batch.push(smp);
        node.write(&mut batch, None).unwrap();

        let mut out = Vec::new();
        match source.read(&mut out).unwrap() {
            ReadOutcome::Samples(1) => {}
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(out[0].sequence, 3);
        assert!(out[0].flags.contains(SampleFlags::TS_RECEIVED));
    }

    #[test]
    fn master_fans_out_to_secondaries() {
        let node = loopback_node(16);
        let queue = Arc::new(SignalledQueue::new(8).unwrap());
        node.add_fanout(queue.clone());

        let mut master = PathSource::master(node.clone(), 16, true).unwrap();
        master.snapshot_fanout();
        let mut secondary =
            PathSource::secondary(node.clone(), queue, 16, true).unwrap();

        let pool = SamplePool::new(&PoolConfig::heap(4, 2)).unwrap();
        let mut batch = Vec::new();
        let mut smp = pool.acquire().unwrap();
        smp.sequence = 11;
        smp.flags.insert(SampleFlags::SEQUENCE);
        batch.push(smp);
        node.write(&mut batch, None).unwrap();

        let mut out = Vec::new();
        master.read(&mut out).unwrap();

        let mut out2 = Vec::new();
        match secondary.read(&mut out2).unwrap() {
            ReadOutcome::Samples(1) => {}
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(out2[0].sequence, 11);
    }

    #[test]
    fn idle_when_no_data() {
        let node = loopback_node(8);
        let mut source = PathSource::master(node, 8, true).unwrap();

        let mut out = Vec::new();
        assert_eq!(source.read(&mut out).unwrap(), ReadOutcome::Idle);
        assert!(out.is_empty());
    }
}

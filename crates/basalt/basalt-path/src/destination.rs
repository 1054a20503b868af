//! One output of a path: a bounded queue in front of the node's write
//! side.
//!
//! The path worker enqueues; draining happens on the same worker after
//! each iteration. A full queue evicts its oldest entry (counted, never
//! blocking), so a slow destination degrades to sampling instead of
//! stalling the path.

use basalt_icc::{SampleBox, SamplePool, SignalledQueue};
use basalt_node::{Node, NodeError};
use basalt_stats::{Metric, Stats};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::PathError;

pub struct PathDestination {
    node: Arc<Node>,
    queue: SignalledQueue,
    drain: Vec<SampleBox>,
    write_errors: u64,
}

/// How many samples one drain pass hands to the node at most.
const DRAIN_BURST: usize = 64;

/// How long a stopping path keeps writing pending samples before it
/// drops the rest.
const FLUSH_BUDGET: Duration = Duration::from_millis(100);

impl PathDestination {
    pub fn new(node: Arc<Node>, queuelen: usize) -> std::io::Result<Self> {
        Ok(Self {
            node,
            queue: SignalledQueue::new(queuelen)?,
            drain: Vec::with_capacity(DRAIN_BURST),
            write_errors: 0,
        })
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Enqueues one output sample, evicting the oldest on overrun.
    pub fn enqueue(&self, smp: &SampleBox, stats: &Stats) {
        match self.queue.push_evict(smp.clone()) {
            Ok(dropped) => {
                for _ in 0..dropped {
                    stats.count(Metric::QueueOverrun);
                }
            }
            Err(_) => stats.count(Metric::Dropped),
        }
    }

    /// Drains a burst from the queue into the node, running its egress
    /// hook chain. Write failures are counted, not fatal: the rest of the
    /// path keeps running.
    pub fn write(&mut self, scratch: &SamplePool, stats: &Stats) -> Result<(), PathError> {
        self.queue.acknowledge();

        self.drain.clear();
        let n = self.queue.pull_many(&mut self.drain, DRAIN_BURST);
        if n == 0 {
            return Ok(());
        }

        match self.node.write(&mut self.drain, Some(scratch)) {
            Ok(written) => {
                let left = self.drain.len() - written;
                for _ in 0..left {
                    stats.count(Metric::Dropped);
                }
            }
            Err(NodeError::Stopping) => {
                // Node is winding down; everything pending is dropped.
                for _ in 0..self.drain.len() {
                    stats.count(Metric::Dropped);
                }
            }
            Err(e) => {
                self.write_errors += 1;
                if self.write_errors <= 3 {
                    warn!(
                        "write to node {name} failed: {e}",
                        name = self.node.name()
                    );
                }
                for _ in 0..self.drain.len() {
                    stats.count(Metric::Dropped);
                }
            }
        }

        Ok(())
    }

    /// Best-effort drain on shutdown, bounded by [`FLUSH_BUDGET`].
    pub fn flush(&mut self, scratch: &SamplePool, stats: &Stats) {
        let deadline = Instant::now() + FLUSH_BUDGET;
        while !self.queue.is_empty() && Instant::now() < deadline {
            if self.write(scratch, stats).is_err() {
                break;
            }
        }

        // Whatever is still queued goes back to the pool uncounted as
        // delivered.
        while let Some(smp) = self.queue.pull() {
            drop(smp);
            stats.count(Metric::Dropped);
        }
    }
}

//! Bounded sample queue with an OS-visible ready signal.
//!
//! The queue body is an [`MpmcRing`] of sample references; on every push
//! the attached eventfd counter is raised, so a consumer can sit in one
//! `poll(2)` across many queues, a rate timer and a cancellation fd.
//! Closing wakes every poller, refuses further pushes and lets consumers
//! drain what is left.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};

use basalt_util::EventFd;

use crate::pool::SampleBox;

#[derive(Debug, PartialEq, Eq)]
pub enum QueueError {
    /// The queue was closed; the sample is handed back.
    Closed,
    /// The queue is full; the sample is handed back.
    Full,
}

pub struct SignalledQueue {
    ring: MpmcRingOfSamples,
    event: EventFd,
    closed: AtomicBool,
}

// Thin alias so the ring type reads as what it holds.
type MpmcRingOfSamples = crate::mpmc::MpmcRing<SampleBox>;

impl SignalledQueue {
    /// Creates a queue with at least `capacity` slots (rounded up to a
    /// power of two).
    pub fn new(capacity: usize) -> io::Result<SignalledQueue> {
        let capacity = capacity.max(2).next_power_of_two();
        Ok(SignalledQueue {
            ring: MpmcRingOfSamples::new(capacity),
            event: EventFd::new()?,
            closed: AtomicBool::new(false),
        })
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Descriptor to include in a poll set; readable whenever samples may
    /// be pending or the queue was closed.
    #[inline(always)]
    pub fn fd(&self) -> RawFd {
        self.event.fd()
    }

    #[inline(always)]
    pub fn push(&self, smp: SampleBox) -> Result<(), (QueueError, SampleBox)> {
        if self.closed.load(Ordering::Acquire) {
            return Err((QueueError::Closed, smp));
        }

        match self.ring.push(smp) {
            Ok(()) => {
                let _ = self.event.raise(1);
                Ok(())
            }
            Err(smp) => Err((QueueError::Full, smp)),
        }
    }

    /// Pushes, evicting the oldest entry when full. Returns the number of
    /// samples dropped to make room (0 or 1 in the common case; more only
    /// under racing consumers).
    pub fn push_evict(&self, mut smp: SampleBox) -> Result<usize, SampleBox> {
        let mut dropped = 0;
        loop {
            match self.push(smp) {
                Ok(()) => return Ok(dropped),
                Err((QueueError::Closed, back)) => return Err(back),
                Err((QueueError::Full, back)) => {
                    smp = back;
                    if self.ring.pop().is_some() {
                        dropped += 1;
                    }
                }
            }
        }
    }

    pub fn push_many(&self, smps: impl IntoIterator<Item = SampleBox>) -> Result<usize, QueueError> {
        let mut pushed = 0;
        for smp in smps {
            match self.push(smp) {
                Ok(()) => pushed += 1,
                Err((err, _)) => {
                    if pushed > 0 {
                        return Ok(pushed);
                    }
                    return Err(err);
                }
            }
        }
        Ok(pushed)
    }

    /// Non-blocking pop.
    #[inline(always)]
    pub fn pull(&self) -> Option<SampleBox> {
        self.ring.pop()
    }

    /// Pops up to `max` samples into `out`, returning how many arrived.
    pub fn pull_many(&self, out: &mut Vec<SampleBox>, max: usize) -> usize {
        let mut got = 0;
        while got < max {
            match self.ring.pop() {
                Some(smp) => {
                    out.push(smp);
                    got += 1;
                }
                None => break,
            }
        }
        got
    }

    /// Clears the ready counter. Called by the consumer after waking,
    /// before draining, so a push racing the drain leaves the fd readable.
    #[inline(always)]
    pub fn acknowledge(&self) {
        self.event.drain();
    }

    /// Closes the queue: subsequent pushes fail, pollers wake, pending
    /// samples stay pullable until drained.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _ = self.event.raise(1);
    }

    #[inline(always)]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// End-of-stream: closed and fully drained.
    pub fn is_finished(&self) -> bool {
        self.is_closed() && self.ring.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{PoolConfig, SamplePool};
    use basalt_util::fd::{poll, pollfd_read};

    fn pool(n: usize) -> SamplePool {
        SamplePool::new(&PoolConfig::heap(n, 4)).unwrap()
    }

    #[test]
    fn fifo_order_is_preserved() {
        let pool = pool(8);
        let q = SignalledQueue::new(8).unwrap();

        for i in 0..5u64 {
            let mut smp = pool.acquire().unwrap();
            smp.sequence = i;
            q.push(smp).unwrap();
        }

        for i in 0..5u64 {
            assert_eq!(q.pull().unwrap().sequence, i);
        }
        assert!(q.pull().is_none());
    }

    #[test]
    fn first_push_raises_the_fd() {
        let pool = pool(4);
        let q = SignalledQueue::new(4).unwrap();

        let mut fds = [pollfd_read(q.fd())];
        assert_eq!(poll(&mut fds, 0).unwrap(), 0);

        q.push(pool.acquire().unwrap()).unwrap();
        fds[0].revents = 0;
        assert_eq!(poll(&mut fds, 100).unwrap(), 1);
    }

    #[test]
    fn close_drains_then_reports_end_of_stream() {
        let pool = pool(4);
        let q = SignalledQueue::new(4).unwrap();

        q.push(pool.acquire().unwrap()).unwrap();
        q.push(pool.acquire().unwrap()).unwrap();
        q.close();

        let smp = pool.acquire().unwrap();
        assert!(matches!(q.push(smp), Err((QueueError::Closed, _))));

        assert!(q.pull().is_some());
        assert!(!q.is_finished());
        assert!(q.pull().is_some());
        assert!(q.pull().is_none());
        assert!(q.is_finished());
    }

    #[test]
    fn close_wakes_a_poller() {
        let q = std::sync::Arc::new(SignalledQueue::new(4).unwrap());
        let q2 = q.clone();

        let waker = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            q2.close();
        });

        let mut fds = [pollfd_read(q.fd())];
        let n = poll(&mut fds, 2000).unwrap();
        assert_eq!(n, 1);
        assert!(q.is_closed());

        waker.join().unwrap();
    }

    #[test]
    fn push_evict_drops_the_oldest() {
        let pool = pool(8);
        let q = SignalledQueue::new(2).unwrap();

        for i in 0..2u64 {
            let mut smp = pool.acquire().unwrap();
            smp.sequence = i;
            q.push(smp).unwrap();
        }

        let mut smp = pool.acquire().unwrap();
        smp.sequence = 2;
        assert_eq!(q.push_evict(smp).unwrap(), 1);

        assert_eq!(q.pull().unwrap().sequence, 1);
        assert_eq!(q.pull().unwrap().sequence, 2);
    }

    /// Samples parked in a dropped queue must return to their pool.
    #[test]
    fn dropping_queue_releases_samples() {
        let pool = pool(4);
        {
            let q = SignalledQueue::new(4).unwrap();
            q.push(pool.acquire().unwrap()).unwrap();
            q.push(pool.acquire().unwrap()).unwrap();
            assert_eq!(pool.available(), 2);
        }
        assert_eq!(pool.available(), 4);
    }
}

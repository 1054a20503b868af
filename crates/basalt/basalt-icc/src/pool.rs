//! Preallocated, reference-counted sample storage.
//!
//! A pool carves `count` fixed-capacity samples out of one [`Arena`] at
//! construction and never touches the allocator again. Acquire pops a
//! slot index off a lock-free freelist; release pushes it back when the
//! last reference drops. The path worker is the only acquirer of its
//! pools, destinations only release, which keeps the freelist contention
//! near zero in practice even though the ring itself is MPMC-safe.

use basalt_sample::{Sample, SignalData, SignalList};
use std::cell::UnsafeCell;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering, fence};

use crate::arena::{Arena, ArenaKind};
use crate::mpmc::MpmcRing;

#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Number of samples in the pool.
    pub count: usize,
    /// Value capacity of each sample.
    pub value_capacity: usize,
    /// Memory the value storage is carved from.
    pub kind: ArenaKind,
}

impl PoolConfig {
    pub fn heap(count: usize, value_capacity: usize) -> Self {
        Self {
            count,
            value_capacity,
            kind: ArenaKind::Heap,
        }
    }
}

struct Slot {
    refcnt: AtomicU32,
    sample: UnsafeCell<Sample>,
}

struct PoolInner {
    slots: Box<[Slot]>,
    free: MpmcRing<u32>,
    empty_signals: Arc<SignalList>,
    underruns: AtomicU64,
    // Keeps the value storage alive; slots point into it.
    _arena: Arena,
}

// SAFETY: slot access follows the refcount protocol; the arena is plain
// memory owned by the pool.
unsafe impl Send for PoolInner {}
unsafe impl Sync for PoolInner {}

/// Handle to a pool. Cheap to clone; the pool lives until the last handle
/// and the last outstanding sample are gone.
#[derive(Clone)]
pub struct SamplePool {
    inner: Arc<PoolInner>,
}

impl SamplePool {
    pub fn new(cfg: &PoolConfig) -> io::Result<SamplePool> {
        assert!(cfg.count > 0, "pool must hold at least one sample");

        let value_capacity = cfg.value_capacity.max(1);
        let bytes = cfg.count * value_capacity * size_of::<SignalData>();
        let arena = Arena::allocate(&cfg.kind, bytes)?;

        let empty_signals = SignalList::empty();
        let base = arena.base() as *mut SignalData;

        let slots: Box<[Slot]> = (0..cfg.count)
            .map(|i| {
                // SAFETY: the arena covers count * value_capacity values;
                // each slot gets a disjoint window of it.
                let values = unsafe { base.add(i * value_capacity) };
                let sample = unsafe {
                    Sample::from_raw_parts(values, value_capacity, empty_signals.clone())
                };
                Slot {
                    refcnt: AtomicU32::new(0),
                    sample: UnsafeCell::new(sample),
                }
            })
            .collect();

        let free = MpmcRing::new(cfg.count.next_power_of_two());
        for i in 0..cfg.count as u32 {
            let _ = free.push(i);
        }

        Ok(SamplePool {
            inner: Arc::new(PoolInner {
                slots,
                free,
                empty_signals,
                underruns: AtomicU64::new(0),
                _arena: arena,
            }),
        })
    }

    /// Takes one sample off the freelist, refcount exactly 1.
    ///
    /// Returns `None` on underrun; the pool never blocks and never grows.
    #[inline(always)]
    pub fn acquire(&self) -> Option<SampleBox> {
        match self.inner.free.pop() {
            Some(idx) => {
                let slot = &self.inner.slots[idx as usize];
                debug_assert_eq!(slot.refcnt.load(Ordering::Relaxed), 0);
                slot.refcnt.store(1, Ordering::Relaxed);
                Some(SampleBox {
                    inner: self.inner.clone(),
                    idx,
                })
            }
            None => {
                self.inner.underruns.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Acquires up to `n` samples, appending to `out`. Returns how many
    /// were actually available.
    pub fn acquire_many(&self, out: &mut Vec<SampleBox>, n: usize) -> usize {
        let mut got = 0;
        for _ in 0..n {
            match self.acquire() {
                Some(smp) => {
                    out.push(smp);
                    got += 1;
                }
                None => break,
            }
        }
        got
    }

    pub fn capacity(&self) -> usize {
        self.inner.slots.len()
    }

    pub fn value_capacity(&self) -> usize {
        // All slots share one capacity; read it off slot 0.
        // SAFETY: shared read of an immutable field.
        unsafe { (*self.inner.slots[0].sample.get()).capacity() }
    }

    /// Total acquire attempts that found the pool empty.
    pub fn underruns(&self) -> u64 {
        self.inner.underruns.load(Ordering::Relaxed)
    }

    /// Approximate number of free samples.
    pub fn available(&self) -> usize {
        self.inner.free.len()
    }
}

/// Owning reference to one pooled sample.
///
/// Clone increments the reference count; drop decrements it and returns
/// the slot to the freelist at zero. Mutable access is only legal while
/// the reference is unique, which is how samples are shared read-only
/// across destination queues without locks.
pub struct SampleBox {
    inner: Arc<PoolInner>,
    idx: u32,
}

impl SampleBox {
    #[inline(always)]
    fn slot(&self) -> &Slot {
        &self.inner.slots[self.idx as usize]
    }

    #[inline(always)]
    pub fn refcount(&self) -> u32 {
        self.slot().refcnt.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn is_unique(&self) -> bool {
        self.refcount() == 1
    }

    /// Mutable access while uniquely owned.
    #[inline(always)]
    pub fn get_mut(&mut self) -> Option<&mut Sample> {
        if self.is_unique() {
            // SAFETY: sole owner, so no other thread can be reading.
            Some(unsafe { &mut *self.slot().sample.get() })
        } else {
            None
        }
    }

    /// Mutable access, copying into a fresh sample from `pool` if this
    /// reference is shared. Returns `None` only on pool underrun.
    pub fn make_unique(&mut self, pool: &SamplePool) -> Option<&mut Sample> {
        if !self.is_unique() {
            let mut fresh = pool.acquire()?;
            // SAFETY: fresh is unique by the acquire invariant.
            let dst = unsafe { &mut *fresh.slot().sample.get() };
            dst.copy_from(self);
            *self = fresh;
        }
        self.get_mut()
    }
}

impl std::ops::Deref for SampleBox {
    type Target = Sample;

    #[inline(always)]
    fn deref(&self) -> &Sample {
        // SAFETY: holders may always read; writers require uniqueness.
        unsafe { &*self.slot().sample.get() }
    }
}

impl std::ops::DerefMut for SampleBox {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut Sample {
        debug_assert!(self.is_unique(), "mutating a shared sample");
        // SAFETY: by the discipline above the reference is unique here.
        unsafe { &mut *self.slot().sample.get() }
    }
}

impl Clone for SampleBox {
    #[inline(always)]
    fn clone(&self) -> SampleBox {
        self.slot().refcnt.fetch_add(1, Ordering::Relaxed);
        SampleBox {
            inner: self.inner.clone(),
            idx: self.idx,
        }
    }
}

impl Drop for SampleBox {
    #[inline(always)]
    fn drop(&mut self) {
        if self.slot().refcnt.fetch_sub(1, Ordering::Release) == 1 {
            fence(Ordering::Acquire);

            // SAFETY: refcount hit zero, we are the last holder.
            let sample = unsafe { &mut *self.slot().sample.get() };
            sample.reset(self.inner.empty_signals.clone());

            // Cannot fail: the freelist is sized for every slot.
            let _ = self.inner.free.push(self.idx);
        }
    }
}

impl std::fmt::Debug for SampleBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let smp: &Sample = self;
        write!(
            f,
            "SampleBox(idx={}, refcnt={}, seq={})",
            self.idx,
            self.refcount(),
            smp.sequence
        )
    }
}

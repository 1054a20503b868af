use basalt_util::TimeSpec;
use std::sync::Arc;

use crate::data::SignalData;
use crate::list::SignalList;
use crate::signal::SignalType;

/// Which header fields of a sample carry meaning.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SampleFlags(u32);

impl SampleFlags {
    pub const NONE: SampleFlags = SampleFlags(0);
    pub const SEQUENCE: SampleFlags = SampleFlags(1 << 0);
    pub const TS_ORIGIN: SampleFlags = SampleFlags(1 << 1);
    pub const TS_RECEIVED: SampleFlags = SampleFlags(1 << 2);
    pub const OFFSET: SampleFlags = SampleFlags(1 << 3);
    pub const DATA: SampleFlags = SampleFlags(1 << 4);
    pub const ALL: SampleFlags = SampleFlags(0x1f);

    #[inline(always)]
    pub fn contains(self, other: SampleFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline(always)]
    pub fn insert(&mut self, other: SampleFlags) {
        self.0 |= other.0;
    }

    #[inline(always)]
    pub fn remove(&mut self, other: SampleFlags) {
        self.0 &= !other.0;
    }

    #[inline(always)]
    pub fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for SampleFlags {
    type Output = SampleFlags;

    fn bitor(self, rhs: SampleFlags) -> SampleFlags {
        SampleFlags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for SampleFlags {
    fn bitor_assign(&mut self, rhs: SampleFlags) {
        self.0 |= rhs.0;
    }
}

impl std::ops::BitAnd for SampleFlags {
    type Output = SampleFlags;

    fn bitand(self, rhs: SampleFlags) -> SampleFlags {
        SampleFlags(self.0 & rhs.0)
    }
}

/// The two timestamps a sample carries: when the producer stamped it and
/// when this process first saw it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timestamps {
    pub origin: TimeSpec,
    pub received: TimeSpec,
}

/// One record of signal values plus sequence number and timestamps.
///
/// The value storage is a fixed-capacity slice carved out of the owning
/// pool's arena at pool construction; a sample never allocates or frees.
/// `length` says how many leading values are meaningful and is always
/// at most `capacity`.
///
/// # Sharing discipline
///
/// Samples are handed out by the pool with a reference count of one and
/// shared read-only once cloned into destination queues. Mutation is only
/// legal while the owner is unique; the pool layer enforces this on its
/// smart pointer. That discipline is what makes the `Sync` impl below
/// sound.
pub struct Sample {
    pub sequence: u64,
    pub flags: SampleFlags,
    pub ts: Timestamps,
    length: u32,
    capacity: u32,
    signals: Arc<SignalList>,
    values: *mut SignalData,
}

// SAFETY: the value storage is owned by the pool that outlives every
// sample handle, and concurrent access is read-only by the refcount
// discipline described above.
unsafe impl Send for Sample {}
unsafe impl Sync for Sample {}

impl Sample {
    /// Builds a sample over caller-owned storage.
    ///
    /// # Safety
    ///
    /// `values` must point to at least `capacity` writable elements that
    /// stay valid (and are not aliased mutably elsewhere) for the entire
    /// life of the returned sample.
    pub unsafe fn from_raw_parts(
        values: *mut SignalData,
        capacity: usize,
        signals: Arc<SignalList>,
    ) -> Sample {
        Sample {
            sequence: 0,
            flags: SampleFlags::NONE,
            ts: Timestamps::default(),
            length: 0,
            capacity: capacity as u32,
            signals,
            values,
        }
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.length as usize
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Sets the number of meaningful values, clamped to capacity.
    #[inline(always)]
    pub fn set_len(&mut self, len: usize) {
        self.length = len.min(self.capacity as usize) as u32;
    }

    /// The meaningful values.
    #[inline(always)]
    pub fn data(&self) -> &[SignalData] {
        // SAFETY: values covers `capacity` elements and length <= capacity.
        unsafe { std::slice::from_raw_parts(self.values, self.length as usize) }
    }

    /// The full writable storage up to capacity. Callers set the length
    /// afterwards via `set_len`.
    #[inline(always)]
    pub fn data_mut(&mut self) -> &mut [SignalData] {
        // SAFETY: exclusive access via &mut self; storage covers capacity.
        unsafe { std::slice::from_raw_parts_mut(self.values, self.capacity as usize) }
    }

    #[inline(always)]
    pub fn signals(&self) -> &Arc<SignalList> {
        &self.signals
    }

    pub fn set_signals(&mut self, signals: Arc<SignalList>) {
        self.signals = signals;
    }

    /// Type of value `i`, falling back to float for values beyond the
    /// signal list (raw payloads without descriptors).
    #[inline(always)]
    pub fn signal_type(&self, i: usize) -> SignalType {
        self.signals.get(i).map(|s| s.ty).unwrap_or_default()
    }

    /// Copies the meaningful fields of `src` into `self`, truncating the
    /// data to this sample's capacity.
    pub fn copy_from(&mut self, src: &Sample) {
        let n = src.len().min(self.capacity as usize);

        self.sequence = src.sequence;
        self.flags = src.flags;
        self.ts = src.ts;
        self.signals = src.signals.clone();
        self.data_mut()[..n].copy_from_slice(&src.data()[..n]);
        self.length = n as u32;
    }

    /// Clears the header back to the empty state for pool reuse.
    pub fn reset(&mut self, signals: Arc<SignalList>) {
        self.sequence = 0;
        self.flags = SampleFlags::NONE;
        self.ts = Timestamps::default();
        self.length = 0;
        self.signals = signals;
    }
}

impl std::fmt::Debug for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sample")
            .field("sequence", &self.sequence)
            .field("flags", &self.flags)
            .field("length", &self.length)
            .field("capacity", &self.capacity)
            .finish()
    }
}

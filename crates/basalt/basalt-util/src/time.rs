#[cfg(target_os = "macos")]
use std::sync::OnceLock;

/// Returns the current monotonic time in nanoseconds.
#[inline(always)]
#[cfg(target_os = "macos")]
#[allow(deprecated)]
pub fn now_ns() -> u64 {
    static TIMEBASE: OnceLock<(u64, u64)> = OnceLock::new();
    let (numer, denom) = *TIMEBASE.get_or_init(|| {
        let mut info = libc::mach_timebase_info_data_t { numer: 0, denom: 0 };
        let rc = unsafe { libc::mach_timebase_info(&mut info) };
        if rc != 0 || info.denom == 0 {
            (1, 1)
        } else {
            (info.numer as u64, info.denom as u64)
        }
    });
    let t = unsafe { libc::mach_absolute_time() } as u128;
    ((t * numer as u128) / denom as u128) as u64
}

/// Returns the current monotonic time in nanoseconds.
#[inline(always)]
#[cfg(not(target_os = "macos"))]
pub fn now_ns() -> u64 {
    let mut ts: libc::timespec = unsafe { core::mem::zeroed() };
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}

pub const NSEC_PER_SEC: i64 = 1_000_000_000;

/// Wall-clock instant as a seconds + nanoseconds pair.
///
/// Samples carry two of these (origin and received). The pair form survives
/// serialization exactly, which a single f64 would not.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimeSpec {
    pub sec: i64,
    pub nsec: i64,
}

impl TimeSpec {
    pub const ZERO: TimeSpec = TimeSpec { sec: 0, nsec: 0 };

    pub fn new(sec: i64, nsec: i64) -> Self {
        Self { sec, nsec }.normalized()
    }

    /// Current wall-clock time (CLOCK_REALTIME).
    pub fn now() -> Self {
        let mut ts: libc::timespec = unsafe { core::mem::zeroed() };
        unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) };
        Self {
            sec: ts.tv_sec as i64,
            nsec: ts.tv_nsec as i64,
        }
    }

    /// Carries nsec over/underflow into sec so that 0 <= nsec < 1s.
    fn normalized(mut self) -> Self {
        while self.nsec >= NSEC_PER_SEC {
            self.nsec -= NSEC_PER_SEC;
            self.sec += 1;
        }
        while self.nsec < 0 {
            self.nsec += NSEC_PER_SEC;
            self.sec -= 1;
        }
        self
    }

    pub fn add(self, other: TimeSpec) -> TimeSpec {
        TimeSpec {
            sec: self.sec + other.sec,
            nsec: self.nsec + other.nsec,
        }
        .normalized()
    }

    pub fn diff(self, earlier: TimeSpec) -> TimeSpec {
        TimeSpec {
            sec: self.sec - earlier.sec,
            nsec: self.nsec - earlier.nsec,
        }
        .normalized()
    }

    pub fn from_f64(secs: f64) -> Self {
        let sec = secs.floor() as i64;
        let nsec = ((secs - sec as f64) * NSEC_PER_SEC as f64).round() as i64;
        Self { sec, nsec }.normalized()
    }

    pub fn to_f64(self) -> f64 {
        self.sec as f64 + self.nsec as f64 / NSEC_PER_SEC as f64
    }

    pub fn is_zero(self) -> bool {
        self.sec == 0 && self.nsec == 0
    }
}

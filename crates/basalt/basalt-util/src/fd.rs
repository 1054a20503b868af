//! Thin wrappers around the event descriptors the dataflow core multiplexes on.
//!
//! Everything that can wake a path worker is reduced to a pollable file
//! descriptor: queues signal through an [`EventFd`], fixed-rate paths tick
//! through a [`TimerFd`], and cancellation is an `EventFd` raised once.
//! The worker then owns a single `poll(2)` call as its only suspension point.

use std::io;
use std::os::unix::io::RawFd;

fn check(rc: i32) -> io::Result<i32> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}

/// Non-blocking counting eventfd.
///
/// Producers `raise()` after publishing, consumers observe POLLIN, `drain()`
/// the counter and then empty the underlying queue. Spurious wakeups are
/// harmless; a missed edge is not possible because the counter accumulates.
pub struct EventFd {
    fd: RawFd,
}

impl EventFd {
    pub fn new() -> io::Result<Self> {
        let fd = check(unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) })?;
        Ok(Self { fd })
    }

    #[inline(always)]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Adds `n` to the counter, waking any poller.
    #[inline(always)]
    pub fn raise(&self, n: u64) -> io::Result<()> {
        let buf = n.to_ne_bytes();
        let rc = unsafe { libc::write(self.fd, buf.as_ptr() as *const libc::c_void, 8) };
        if rc != 8 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Reads and clears the counter. Returns 0 if nothing was pending.
    #[inline(always)]
    pub fn drain(&self) -> u64 {
        let mut buf = [0u8; 8];
        let rc = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, 8) };
        if rc != 8 {
            return 0;
        }
        u64::from_ne_bytes(buf)
    }
}

impl Drop for EventFd {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

// The fd is just an integer handle; the kernel side is thread-safe.
unsafe impl Send for EventFd {}
unsafe impl Sync for EventFd {}

/// Periodic monotonic timer exposed as a file descriptor.
pub struct TimerFd {
    fd: RawFd,
}

impl TimerFd {
    pub fn new() -> io::Result<Self> {
        let fd = check(unsafe {
            libc::timerfd_create(libc::CLOCK_MONOTONIC, libc::TFD_NONBLOCK | libc::TFD_CLOEXEC)
        })?;
        Ok(Self { fd })
    }

    #[inline(always)]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Arms the timer to fire `rate` times per second.
    pub fn set_rate(&self, rate: f64) -> io::Result<()> {
        assert!(rate > 0.0, "timer rate must be positive");

        let period_ns = (1e9 / rate) as i64;
        let its = libc::itimerspec {
            it_interval: libc::timespec {
                tv_sec: (period_ns / 1_000_000_000) as libc::time_t,
                tv_nsec: (period_ns % 1_000_000_000) as libc::c_long,
            },
            it_value: libc::timespec {
                tv_sec: (period_ns / 1_000_000_000) as libc::time_t,
                tv_nsec: (period_ns % 1_000_000_000) as libc::c_long,
            },
        };

        check(unsafe { libc::timerfd_settime(self.fd, 0, &its, std::ptr::null_mut()) })?;
        Ok(())
    }

    /// Disarms the timer.
    pub fn stop(&self) -> io::Result<()> {
        let its: libc::itimerspec = unsafe { core::mem::zeroed() };
        check(unsafe { libc::timerfd_settime(self.fd, 0, &its, std::ptr::null_mut()) })?;
        Ok(())
    }

    /// Returns the number of expirations since the last call, 0 if none.
    #[inline(always)]
    pub fn expirations(&self) -> u64 {
        let mut buf = [0u8; 8];
        let rc = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, 8) };
        if rc != 8 {
            return 0;
        }
        u64::from_ne_bytes(buf)
    }
}

impl Drop for TimerFd {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

unsafe impl Send for TimerFd {}
unsafe impl Sync for TimerFd {}

/// `poll(2)` over a prebuilt descriptor set.
///
/// Returns the number of ready descriptors; the caller inspects `revents`.
/// `timeout_ms` < 0 blocks indefinitely, 0 polls, > 0 bounds the wait.
#[inline(always)]
pub fn poll(fds: &mut [libc::pollfd], timeout_ms: i32) -> io::Result<usize> {
    loop {
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        return Ok(rc as usize);
    }
}

/// Builds a `pollfd` slot watching for readability.
#[inline(always)]
pub fn pollfd_read(fd: RawFd) -> libc::pollfd {
    libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eventfd_raise_then_drain() {
        let ev = EventFd::new().unwrap();
        assert_eq!(ev.drain(), 0);
        ev.raise(3).unwrap();
        ev.raise(2).unwrap();
        assert_eq!(ev.drain(), 5);
        assert_eq!(ev.drain(), 0);
    }

    #[test]
    fn eventfd_wakes_poll() {
        let ev = EventFd::new().unwrap();
        let mut fds = [pollfd_read(ev.fd())];

        assert_eq!(poll(&mut fds, 0).unwrap(), 0);

        ev.raise(1).unwrap();
        assert_eq!(poll(&mut fds, 100).unwrap(), 1);
        assert!(fds[0].revents & libc::POLLIN != 0);
    }

    #[test]
    fn timerfd_expires_at_rate() {
        let timer = TimerFd::new().unwrap();
        timer.set_rate(1000.0).unwrap();

        let mut fds = [pollfd_read(timer.fd())];
        let n = poll(&mut fds, 200).unwrap();
        assert_eq!(n, 1);
        assert!(timer.expirations() >= 1);

        timer.stop().unwrap();
    }
}

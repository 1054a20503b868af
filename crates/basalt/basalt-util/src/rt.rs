//! Real-time knobs requested from the kernel: CPU affinity, scheduler
//! priority and memory locking. All best-effort; refusal is reported to
//! the caller, never fatal here.

use std::io;

/// Pins the calling thread to the CPUs set in `mask` (bit i = CPU i).
#[cfg(target_os = "linux")]
pub fn set_thread_affinity(mask: u64) -> io::Result<()> {
    if mask == 0 {
        return Ok(());
    }

    let mut set: libc::cpu_set_t = unsafe { core::mem::zeroed() };
    unsafe {
        libc::CPU_ZERO(&mut set);
        for cpu in 0..64 {
            if mask & (1u64 << cpu) != 0 {
                libc::CPU_SET(cpu as usize, &mut set);
            }
        }
    }

    let rc = unsafe { libc::sched_setaffinity(0, core::mem::size_of::<libc::cpu_set_t>(), &set) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn set_thread_affinity(_mask: u64) -> io::Result<()> {
    Ok(())
}

/// Switches the calling thread to SCHED_FIFO at `priority`.
#[cfg(target_os = "linux")]
pub fn set_rt_priority(priority: i32) -> io::Result<()> {
    if priority <= 0 {
        return Ok(());
    }

    let param = libc::sched_param {
        sched_priority: priority,
    };
    let rc = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn set_rt_priority(_priority: i32) -> io::Result<()> {
    Ok(())
}

/// Locks current and future pages into RAM to avoid page faults on the
/// hot path.
#[cfg(target_os = "linux")]
pub fn lock_memory() -> io::Result<()> {
    let rc = unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn lock_memory() -> io::Result<()> {
    Ok(())
}

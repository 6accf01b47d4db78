//! Process placement for worker processes

#![allow(unsafe_code)] // sched_setaffinity() and prctl() require unsafe

use std::io;

use crate::domain::CpuId;

/// Pin the calling process to a single logical CPU
///
/// # Errors
/// Returns the OS error if the kernel rejects the mask (e.g. the CPU went
/// offline or a cgroup cpuset excludes it)
#[cfg(target_os = "linux")]
pub fn pin_to_cpu(cpu: CpuId) -> io::Result<()> {
    if cpu.0 as usize >= libc::CPU_SETSIZE as usize {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, format!("{cpu} beyond CPU_SETSIZE")));
    }

    // SAFETY: cpu_set_t is plain data; CPU_ZERO/CPU_SET only write inside it
    // and the index was bounds-checked above.
    let rc = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu.0 as usize, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(target_os = "linux"))]
pub fn pin_to_cpu(_cpu: CpuId) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "CPU pinning is only supported on Linux"))
}

/// Ask the kernel to SIGKILL this process when its parent exits
///
/// Keeps workers from spinning on as orphans if the controlling process is
/// killed before it can run its stop sequence.
///
/// # Errors
/// Returns the OS error from `prctl`
#[cfg(target_os = "linux")]
pub fn die_with_parent() -> io::Result<()> {
    // SAFETY: PR_SET_PDEATHSIG takes a signal number and no pointers
    let rc = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(target_os = "linux"))]
pub fn die_with_parent() -> io::Result<()> {
    Ok(())
}

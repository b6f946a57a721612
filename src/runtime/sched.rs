//! Thread scheduling helpers.

use std::io;

/// Switch the calling thread to `SCHED_RR` at the maximum priority.
///
/// Usually needs `CAP_SYS_NICE`; callers treat failure as a warning.
#[cfg(target_os = "linux")]
pub fn set_realtime_priority() -> io::Result<()> {
    let max = unsafe { libc::sched_get_priority_max(libc::SCHED_RR) };
    if max < 0 {
        return Err(io::Error::last_os_error());
    }

    let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
    param.sched_priority = max;
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_RR, &param) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn set_realtime_priority() -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "realtime scheduling is only supported on Linux",
    ))
}

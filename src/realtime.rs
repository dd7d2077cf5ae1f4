//! promotion of the thread running the cyclic exchange to realtime scheduling

/**
    raise the current thread to the maximum FIFO realtime priority and lock the process memory pages

    This usually requires privileges (`CAP_SYS_NICE`, `CAP_IPC_LOCK`), so failures are only logged and the cycle keeps running with normal scheduling.
*/
#[cfg(target_os = "linux")]
pub fn promote() {
    use thread_priority::*;

    match set_thread_priority_and_policy(
            thread_native_id(),
            ThreadPriority::Max,
            ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
            ) {
        Ok(()) => log::info!("cycle thread promoted to realtime priority"),
        Err(error) => log::warn!("cannot raise cycle thread priority: {:?}", error),
    }

    // no pages of the process must be swapped out while cycling
    if unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) } != 0 {
        log::warn!("cannot lock memory: {}", std::io::Error::last_os_error());
    }
}

#[cfg(not(target_os = "linux"))]
pub fn promote() {
    log::warn!("realtime promotion is not supported on this platform");
}

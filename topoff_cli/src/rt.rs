//! Real-time scheduling helpers (Linux SCHED_FIFO / mlockall).

use crate::cli::RtLock;

#[cfg(target_os = "linux")]
pub fn setup_rt_once(prio: Option<i32>, lock: RtLock) {
    use std::sync::OnceLock;
    static RT_ONCE: OnceLock<()> = OnceLock::new();

    RT_ONCE.get_or_init(|| {
        match try_apply_mem_lock(lock) {
            Ok(()) => tracing::info!(?lock, "RT: memory lock applied"),
            Err(err) => tracing::warn!(error = %err, "RT: mlockall failed"),
        }
        match try_apply_fifo_priority(prio) {
            Ok(p) => tracing::info!(priority = p, "RT: SCHED_FIFO enabled"),
            Err(err) => tracing::warn!(error = %err, "RT: sched_setscheduler(SCHED_FIFO) failed"),
        }
    });
}

#[cfg(not(target_os = "linux"))]
pub fn setup_rt_once(_prio: Option<i32>, _lock: RtLock) {
    tracing::warn!("real-time mode is only supported on Linux; ignoring --rt");
}

#[cfg(target_os = "linux")]
fn is_retryable_memlock_error(err: &std::io::Error) -> bool {
    matches!(err.raw_os_error(), Some(code) if code == libc::EPERM || code == libc::ENOMEM)
}

#[cfg(target_os = "linux")]
fn memlock_limit_hint() -> Option<String> {
    let mut rlim = std::mem::MaybeUninit::<libc::rlimit>::uninit();
    // SAFETY: getrlimit only writes into the provided struct.
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_MEMLOCK, rlim.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    // SAFETY: rc == 0 means the struct was filled in.
    let cur = unsafe { rlim.assume_init() }.rlim_cur;
    if cur == libc::RLIM_INFINITY {
        Some("memlock limit: unlimited".to_string())
    } else {
        Some(format!("memlock limit: {} KiB", cur / 1024))
    }
}

/// Apply process memory locking according to the selected mode.
#[cfg(target_os = "linux")]
fn try_apply_mem_lock(lock: RtLock) -> eyre::Result<()> {
    let flags = match lock {
        RtLock::None => return Ok(()),
        RtLock::Current => libc::MCL_CURRENT,
        RtLock::All => libc::MCL_CURRENT | libc::MCL_FUTURE,
    };
    // SAFETY: mlockall takes only flags and affects the calling process.
    if unsafe { libc::mlockall(flags) } == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();

    // All failed for lack of privilege or memory: settle for resident pages.
    if lock == RtLock::All && is_retryable_memlock_error(&err) {
        // SAFETY: as above.
        if unsafe { libc::mlockall(libc::MCL_CURRENT) } == 0 {
            tracing::warn!(error = %err, "RT: mlockall(current|future) failed, locked current pages only");
            return Ok(());
        }
    }

    let mut msg = format!("mlockall failed: {err}");
    if is_retryable_memlock_error(&err) {
        if let Some(h) = memlock_limit_hint() {
            msg.push_str(&format!("; {h}"));
        }
        msg.push_str("; hint: needs CAP_IPC_LOCK (or root) and sufficient 'ulimit -l'");
    }
    Err(eyre::eyre!(msg))
}

/// Apply SCHED_FIFO priority, clamped to the system range.
#[cfg(target_os = "linux")]
fn try_apply_fifo_priority(prio: Option<i32>) -> eyre::Result<i32> {
    // SAFETY: pure queries.
    let (min, max) = unsafe {
        let min = libc::sched_get_priority_min(libc::SCHED_FIFO);
        let max = libc::sched_get_priority_max(libc::SCHED_FIFO);
        if min < 0 || max < 0 { (1, 99) } else { (min, max) }
    };
    let prio_val = prio.unwrap_or(max).clamp(min, max);
    let param = libc::sched_param {
        sched_priority: prio_val,
    };
    // SAFETY: `param` outlives the call; pid 0 is the calling process.
    let rc = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if rc == 0 {
        return Ok(prio_val);
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EPERM) {
        eyre::bail!(
            "{err}; needs CAP_SYS_NICE or root. Hint: 'sudo setcap cap_sys_nice,cap_ipc_lock=ep /path/to/topoff'"
        );
    }
    Err(err.into())
}

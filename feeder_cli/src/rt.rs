//! Real-time scheduling helpers (Linux SCHED_FIFO / mlockall).

#[cfg(target_os = "linux")]
pub fn setup_rt_once(rt: bool, prio: Option<i32>) {
    use std::sync::OnceLock;
    static RT_ONCE: OnceLock<()> = OnceLock::new();

    if !rt {
        return;
    }
    RT_ONCE.get_or_init(|| {
        // Lock resident pages so the control loop does not page-fault
        // mid-attempt. Failure is survivable; log and continue.
        let rc = unsafe { libc::mlockall(libc::MCL_CURRENT) };
        if rc != 0 {
            tracing::warn!(
                error = %std::io::Error::last_os_error(),
                "mlockall failed; continuing without locked memory"
            );
        }

        let min = unsafe { libc::sched_get_priority_min(libc::SCHED_FIFO) };
        let max = unsafe { libc::sched_get_priority_max(libc::SCHED_FIFO) };
        let prio = prio.unwrap_or_else(|| min.max(1)).clamp(min, max);
        let param = libc::sched_param {
            sched_priority: prio,
        };
        let rc = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
        if rc != 0 {
            tracing::warn!(
                error = %std::io::Error::last_os_error(),
                prio,
                "SCHED_FIFO unavailable; running with default scheduling"
            );
        } else {
            tracing::info!(prio, "real-time scheduling enabled");
        }
    });
}

#[cfg(not(target_os = "linux"))]
pub fn setup_rt_once(rt: bool, _prio: Option<i32>) {
    if rt {
        tracing::warn!("real-time mode is only supported on Linux");
    }
}

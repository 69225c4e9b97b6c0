use nix::sched::{sched_getaffinity, sched_setaffinity, CpuSet};
use nix::unistd::Pid;

use crate::access::ThreadMask;
use crate::error::{HwtelemError, Result};

/// Threads of `mask` as a CPU set
pub fn cpu_set(mask: &ThreadMask) -> Result<CpuSet> {
    let mut set = CpuSet::new();
    for thread in mask.threads() {
        set.set(thread as usize).map_err(|e| {
            HwtelemError::AffinityError(format!("Failed to add CPU {thread} to set: {e}"))
        })?;
    }
    Ok(set)
}

/// Every CPU of `set` as a mask
pub fn thread_mask(set: &CpuSet) -> ThreadMask {
    ThreadMask::from_threads(
        (0..CpuSet::count())
            .filter(|&cpu| set.is_set(cpu).unwrap_or(false))
            .map(|cpu| cpu as u32),
    )
}

/// Pin the calling thread to `mask`, returning the mask it had before
pub fn swap_affinity(mask: &ThreadMask) -> Result<ThreadMask> {
    if mask.is_empty() {
        return Err(HwtelemError::AffinityError("Empty thread mask".to_string()));
    }

    let previous = sched_getaffinity(Pid::from_raw(0))
        .map_err(|e| HwtelemError::AffinityError(format!("Failed to get affinity: {e}")))?;

    sched_setaffinity(Pid::from_raw(0), &cpu_set(mask)?).map_err(|e| {
        HwtelemError::AffinityError(format!("Failed to set affinity to {mask}: {e}"))
    })?;

    Ok(thread_mask(&previous))
}

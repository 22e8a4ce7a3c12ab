//! CPU affinity pinning
//!
//! `pin_thread` is a platform capability: on Linux it pins a pthread to
//! one logical CPU; elsewhere it reports `Pinning::Unsupported` so the
//! caller can surface the changed performance contract instead of
//! silently running unpinned.

use std::io;

/// Outcome of a pin request on this platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pinning {
    Pinned,
    /// The platform has no thread-affinity API; the thread runs unpinned.
    Unsupported,
}

/// Number of logical CPUs available to this process.
pub fn online_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        /// Pin `thread` to logical CPU `cpu`.
        pub fn pin_thread(thread: libc::pthread_t, cpu: usize) -> io::Result<Pinning> {
            // Safety: cpu_set_t is a plain bitmask; CPU_ZERO/CPU_SET only
            // write within it, and the set outlives the call.
            unsafe {
                let mut set: libc::cpu_set_t = std::mem::zeroed();
                libc::CPU_ZERO(&mut set);
                libc::CPU_SET(cpu, &mut set);
                let rc = libc::pthread_setaffinity_np(
                    thread,
                    std::mem::size_of::<libc::cpu_set_t>(),
                    &set,
                );
                if rc != 0 {
                    return Err(io::Error::from_raw_os_error(rc));
                }
            }
            Ok(Pinning::Pinned)
        }
    } else {
        /// Affinity is unsupported here; the no-op is reported, not hidden.
        pub fn pin_thread(_thread: libc::pthread_t, _cpu: usize) -> io::Result<Pinning> {
            Ok(Pinning::Unsupported)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_least_one_cpu() {
        assert!(online_cpus() >= 1);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn pin_current_thread_to_cpu_zero() {
        // CPU 0 exists on every machine this runs on.
        let me = unsafe { libc::pthread_self() };
        assert_eq!(pin_thread(me, 0).unwrap(), Pinning::Pinned);
    }
}

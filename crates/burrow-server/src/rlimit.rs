//! Process descriptor-limit adjustment
//!
//! Done once at startup, before the pool spawns. Unlike every other
//! setup step this one is advisory: a daemon that cannot raise its
//! descriptor ceiling still works, just for fewer connections, so the
//! caller logs a warning instead of aborting.

use std::io;

/// Raise `RLIMIT_NOFILE` (soft and hard) to `limit`.
pub fn raise_nofile(limit: u64) -> io::Result<()> {
    let rl = libc::rlimit {
        rlim_cur: limit,
        rlim_max: limit,
    };
    // Safety: rl is a fully initialized rlimit for the duration of the call.
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &rl) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowering_within_current_limit_succeeds() {
        // Raising past the hard limit needs privileges; shrinking the
        // soft limit under the current hard limit always works.
        let mut rl = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        let ret = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rl) };
        assert_eq!(ret, 0);
        assert!(raise_nofile(rl.rlim_max).is_ok());
    }
}

//! Wake-back channel: workers -> reactor
//!
//! Multi-producer/single-consumer path carrying deregistration events.
//! The payloads travel on a bounded `ArrayQueue`; a nonblocking eventfd
//! acts purely as a doorbell so the reactor's `epoll_wait` wakes up.
//! The eventfd counter never stands in for the events themselves: a
//! counter that merely says "N things happened" would lose descriptors
//! under bursty load.
//!
//! Producers: every worker (and `wake()` during shutdown). Consumer: the
//! reactor only.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use burrow_core::event::Deregister;
use crossbeam_queue::ArrayQueue;

pub struct WakeBack {
    queue: ArrayQueue<Deregister>,
    efd: OwnedFd,
}

impl WakeBack {
    /// Create a wake-back channel holding up to `depth` pending events.
    pub fn new(depth: usize) -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // Safety: fd is a freshly created eventfd we own.
        let efd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self {
            queue: ArrayQueue::new(depth.max(1)),
            efd,
        })
    }

    /// Descriptor to register in the reactor's readiness set.
    pub fn fd(&self) -> RawFd {
        self.efd.as_raw_fd()
    }

    /// Post a deregistration event and ring the doorbell.
    ///
    /// Returns the event back on a full queue so the caller can log the
    /// drop; the doorbell is still rung, giving the reactor a chance to
    /// drain and make room.
    pub fn post(&self, ev: Deregister) -> Result<(), Deregister> {
        let res = self.queue.push(ev);
        self.ring();
        res
    }

    /// Wake the reactor without posting an event (shutdown path).
    pub fn wake(&self) {
        self.ring();
    }

    fn ring(&self) {
        let val: u64 = 1;
        // Safety: writing 8 bytes of a u64 to an eventfd we own.
        let ret = unsafe {
            libc::write(
                self.efd.as_raw_fd(),
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // EAGAIN means the counter is saturated: a wakeup is already
            // pending, which is all we need.
            if err.raw_os_error() != Some(libc::EAGAIN) {
                tracing::warn!(error = %err, "wake-back doorbell write failed");
            }
        }
    }

    /// Drain pending events into `f`. Called by the reactor when the
    /// doorbell descriptor reports readable.
    ///
    /// A short or failed counter read skips the cycle; events stay queued
    /// and are picked up on the next readiness notification.
    pub fn drain(&self, mut f: impl FnMut(Deregister)) {
        let mut counter: u64 = 0;
        // Safety: reading 8 bytes into a u64 from an eventfd we own.
        let ret = unsafe {
            libc::read(
                self.efd.as_raw_fd(),
                &mut counter as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret != std::mem::size_of::<u64>() as isize {
            return;
        }
        while let Some(ev) = self.queue.pop() {
            f(ev);
        }
    }
}

//! The reactor: accept + readiness multiplexing
//!
//! Runs on a single thread. It owns the listening socket, the epoll set
//! and every registered connection descriptor. On each wakeup it
//! classifies readiness three ways:
//!
//! 1. Listening socket ready: accept until `WouldBlock`, register each
//!    new connection edge-triggered.
//! 2. Wake-back doorbell ready: drain deregistration events and drop the
//!    descriptors from the readiness set.
//! 3. Anything else: forward the descriptor to the next worker in a
//!    fixed round-robin cycle.
//!
//! The reactor never performs application I/O itself.

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use burrow_core::config::ServerConfig;
use burrow_core::error::ReactorError;
use tracing::{info, warn};

use crate::pool::WorkerPool;
use crate::wakeback::WakeBack;

/// Readiness events pulled per `epoll_wait` call.
const EVENT_BATCH: usize = 256;

/// A registered connection: the owned descriptor plus its resolved peer.
struct Registered {
    fd: OwnedFd,
    peer: SocketAddr,
}

/// Reactor-private registry of live connections.
///
/// Owns every dispatched descriptor; workers only ever borrow the raw fd.
/// Deregistration is idempotent: removing an unknown fd is a no-op and
/// the active count never goes below zero.
struct ConnTable {
    map: HashMap<RawFd, Registered>,
    active: Arc<AtomicUsize>,
}

impl ConnTable {
    fn new(active: Arc<AtomicUsize>) -> Self {
        Self {
            map: HashMap::new(),
            active,
        }
    }

    fn insert(&mut self, fd: OwnedFd, peer: SocketAddr) -> RawFd {
        let raw = fd.as_raw_fd();
        self.map.insert(raw, Registered { fd, peer });
        self.active.fetch_add(1, Ordering::Relaxed);
        raw
    }

    fn remove(&mut self, raw: RawFd) -> Option<Registered> {
        let reg = self.map.remove(&raw)?;
        // Single writer; the guard keeps a duplicate deregistration from
        // ever pushing the count negative.
        let cur = self.active.load(Ordering::Relaxed);
        self.active.store(cur.saturating_sub(1), Ordering::Relaxed);
        Some(reg)
    }

    fn contains(&self, raw: RawFd) -> bool {
        self.map.contains_key(&raw)
    }
}

pub struct Reactor {
    epfd: OwnedFd,
    listener: TcpListener,
    local_addr: SocketAddr,
    wakeback: Arc<WakeBack>,
    pool: WorkerPool,
    conns: ConnTable,
    next_worker: usize,
    shutdown: Arc<AtomicBool>,
}

impl Reactor {
    /// Resolve the bind spec, listen, and wire up the readiness set.
    ///
    /// Every failure here is fatal-setup: there is no degraded mode and
    /// no fallback once no address family is bindable.
    pub fn start(
        cfg: &ServerConfig,
        pool: WorkerPool,
        wakeback: Arc<WakeBack>,
        shutdown: Arc<AtomicBool>,
        active: Arc<AtomicUsize>,
    ) -> Result<Self, ReactorError> {
        if cfg.backlog < 1 {
            return Err(ReactorError::BadBacklog(cfg.backlog));
        }

        let listener = bind_listener(&cfg.bind, cfg.backlog)?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ReactorError::Resolve {
                spec: cfg.bind.clone(),
                source,
            })?;

        let ret = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if ret < 0 {
            return Err(ReactorError::EpollCreate(io::Error::last_os_error()));
        }
        // Safety: freshly created epoll fd, owned here.
        let epfd = unsafe { OwnedFd::from_raw_fd(ret) };

        epoll_add(&epfd, listener.as_raw_fd())?;
        epoll_add(&epfd, wakeback.fd())?;

        Ok(Self {
            epfd,
            listener,
            local_addr,
            wakeback,
            pool,
            conns: ConnTable::new(active),
            next_worker: 0,
            shutdown,
        })
    }

    /// Address the listener actually bound to (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Block in the readiness loop until shutdown is requested.
    ///
    /// The shutdown flag is checked once per iteration; a blocked wait is
    /// released by the wake-back doorbell (see `Stopper`).
    pub fn run(&mut self) -> Result<(), ReactorError> {
        info!(addr = %self.local_addr, workers = self.pool.len(), "listening");

        let mut events = vec![libc::epoll_event { events: 0, u64: 0 }; EVENT_BATCH];
        let lfd = self.listener.as_raw_fd();
        let wfd = self.wakeback.fd();

        while !self.shutdown.load(Ordering::Acquire) {
            // Safety: events points at EVENT_BATCH valid epoll_event slots.
            let n = unsafe {
                libc::epoll_wait(
                    self.epfd.as_raw_fd(),
                    events.as_mut_ptr(),
                    events.len() as i32,
                    -1,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(ReactorError::Wait(err));
            }

            for ev in &events[..n as usize] {
                let fd = ev.u64 as RawFd;
                if fd == lfd {
                    self.accept_ready()?;
                } else if fd == wfd {
                    self.drain_wakeback();
                } else {
                    self.dispatch(fd);
                }
            }
        }

        Ok(())
    }

    /// Stop the workers and release every owned descriptor.
    pub fn teardown(self) {
        self.pool.teardown();
        // Listener, epoll fd and all registered connections close on drop.
    }

    /// Accept until the listen queue is empty.
    ///
    /// Would-block and interrupted accepts are transient and ignored;
    /// any other accept error is logged and that attempt skipped. Failure
    /// to grow the readiness set is resource exhaustion and fatal.
    fn accept_ready(&mut self) -> Result<(), ReactorError> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(err) = stream.set_nonblocking(true) {
                        warn!(%peer, error = %err, "cannot make connection non-blocking");
                        continue;
                    }
                    let owned = OwnedFd::from(stream);
                    epoll_add(&self.epfd, owned.as_raw_fd())?;
                    let raw = self.conns.insert(owned, peer);
                    info!(
                        fd = raw,
                        peer.host = %peer.ip(),
                        peer.port = peer.port(),
                        "connection accepted"
                    );
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    break;
                }
            }
        }
        Ok(())
    }

    fn drain_wakeback(&mut self) {
        let wakeback = self.wakeback.clone();
        wakeback.drain(|ev| self.deregister(ev.fd));
    }

    fn deregister(&mut self, fd: RawFd) {
        // Unknown fd: duplicate or stale deregistration, ignore.
        let Some(reg) = self.conns.remove(fd) else {
            return;
        };
        epoll_del(&self.epfd, fd);
        info!(fd, peer.host = %reg.peer.ip(), peer.port = reg.peer.port(), "connection deregistered");
        // reg.fd drops here, closing the descriptor.
    }

    /// Forward a ready connection to the next worker in the cycle.
    ///
    /// The index advances after every dispatch, full queue or not; the
    /// cycle visits workers 0..N-1 in fixed order with no load-based
    /// reordering. A full inbound queue drops the event (logged), it
    /// never blocks the reactor.
    fn dispatch(&mut self, fd: RawFd) {
        if !self.conns.contains(fd) {
            // Stale readiness for a descriptor already deregistered.
            return;
        }
        let index = self.next_worker;
        if !self.pool.dispatch(index, fd) {
            warn!(fd, worker = index, "worker queue full, dispatch dropped");
        }
        self.next_worker = (index + 1) % self.pool.len();
    }
}

/// Resolve `spec` and listen on the first bindable candidate.
fn bind_listener(spec: &str, backlog: i32) -> Result<TcpListener, ReactorError> {
    let addrs = spec
        .to_socket_addrs()
        .map_err(|source| ReactorError::Resolve {
            spec: spec.to_string(),
            source,
        })?;

    for addr in addrs {
        match bind_one(addr, backlog) {
            Ok(listener) => return Ok(listener),
            Err(err) => {
                warn!(%addr, error = %err, "bind candidate failed");
            }
        }
    }
    Err(ReactorError::NoUsableAddress {
        spec: spec.to_string(),
    })
}

/// Socket setup for one candidate: create, setsockopt, bind, listen.
fn bind_one(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let family = match addr {
        SocketAddr::V4(_) => libc::AF_INET,
        SocketAddr::V6(_) => libc::AF_INET6,
    };
    let ret = unsafe {
        libc::socket(
            family,
            libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            0,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    // Safety: freshly created socket, owned here; closes on early return.
    let sock = unsafe { OwnedFd::from_raw_fd(ret) };
    let fd = sock.as_raw_fd();

    let one: libc::c_int = 1;
    // Safety: option value is a live c_int for the duration of the call.
    unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &one as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
        if matches!(addr, SocketAddr::V6(_)) {
            // v6 sockets serve v6 only; v4 gets its own candidate.
            libc::setsockopt(
                fd,
                libc::IPPROTO_IPV6,
                libc::IPV6_V6ONLY,
                &one as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            );
        }
    }

    let (storage, len) = sockaddr_from(addr);
    // Safety: storage holds a valid sockaddr of `len` bytes for `family`.
    let ret = unsafe { libc::bind(fd, &storage as *const _ as *const libc::sockaddr, len) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    let ret = unsafe { libc::listen(fd, backlog) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }

    // Safety: transfers ownership of a valid listening socket.
    Ok(unsafe { TcpListener::from_raw_fd(sock.into_raw_fd()) })
}

fn sockaddr_from(addr: SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    // Safety: sockaddr_storage is valid all-zeroes; we then fill the
    // family-specific prefix in place.
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(a) => {
            let sin = &mut storage as *mut _ as *mut libc::sockaddr_in;
            unsafe {
                (*sin).sin_family = libc::AF_INET as libc::sa_family_t;
                (*sin).sin_port = a.port().to_be();
                (*sin).sin_addr.s_addr = u32::from_ne_bytes(a.ip().octets());
            }
            std::mem::size_of::<libc::sockaddr_in>()
        }
        SocketAddr::V6(a) => {
            let sin6 = &mut storage as *mut _ as *mut libc::sockaddr_in6;
            unsafe {
                (*sin6).sin6_family = libc::AF_INET6 as libc::sa_family_t;
                (*sin6).sin6_port = a.port().to_be();
                (*sin6).sin6_addr.s6_addr = a.ip().octets();
                (*sin6).sin6_scope_id = a.scope_id();
            }
            std::mem::size_of::<libc::sockaddr_in6>()
        }
    };
    (storage, len as libc::socklen_t)
}

fn epoll_add(epfd: &OwnedFd, fd: RawFd) -> Result<(), ReactorError> {
    let mut ev = libc::epoll_event {
        events: (libc::EPOLLIN | libc::EPOLLET) as u32,
        u64: fd as u64,
    };
    // Safety: epfd is a live epoll instance, ev outlives the call.
    let ret = unsafe { libc::epoll_ctl(epfd.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut ev) };
    if ret != 0 {
        return Err(ReactorError::EpollAdd {
            fd,
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

fn epoll_del(epfd: &OwnedFd, fd: RawFd) {
    // Pre-2.6.9 kernels require a non-null event even for DEL.
    let mut ev = libc::epoll_event { events: 0, u64: 0 };
    // Safety: as above; a failed DEL only means the fd was already gone.
    let ret = unsafe { libc::epoll_ctl(epfd.as_raw_fd(), libc::EPOLL_CTL_DEL, fd, &mut ev) };
    if ret != 0 {
        warn!(fd, error = %io::Error::last_os_error(), "epoll removal failed");
    }
}

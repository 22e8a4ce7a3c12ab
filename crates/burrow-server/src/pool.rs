//! Worker pool lifecycle
//!
//! A fixed set of OS threads, one per `cpus * threads_per_cpu`, each
//! pinned to CPU `i % cpus`, each owning a private guarded arena and a
//! private inbound signal channel. Workers block on their channel; the
//! reactor is the only sender. All socket reads happen here, never on
//! the reactor thread.

use std::os::fd::RawFd;
use std::os::unix::thread::JoinHandleExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use burrow_core::config::ServerConfig;
use burrow_core::error::PoolError;
use burrow_core::event::{Deregister, WorkerId, WorkerSignal};
use burrow_core::handler::DataHandler;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::{debug, info, warn};

use crate::affinity::{self, Pinning};
use crate::arena::{page_size, Arena};
use crate::wakeback::WakeBack;

/// Per-dispatch read size, allocated from the worker's arena.
const RECV_BUF: usize = 1024;

/// Pool sizing and per-worker resources.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers: usize,
    pub inbound_depth: usize,
    pub arena_bytes: usize,
}

impl PoolConfig {
    /// Derive the pool shape from the server configuration: explicit
    /// worker count if given, otherwise `cpus * threads_per_cpu`.
    pub fn from_server(cfg: &ServerConfig) -> Self {
        let workers = cfg
            .workers
            .unwrap_or_else(|| affinity::online_cpus() * cfg.threads_per_cpu);
        Self {
            workers,
            inbound_depth: cfg.inbound_depth,
            arena_bytes: cfg.arena_pages * page_size(),
        }
    }

    /// Reject shapes that cannot dispatch: the round-robin index is
    /// taken modulo `workers`, so zero workers must fail here, before
    /// any arithmetic in the dispatch path.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.workers == 0 {
            return Err(PoolError::ZeroWorkers);
        }
        if self.inbound_depth == 0 {
            return Err(PoolError::ZeroDepth);
        }
        Ok(())
    }
}

struct WorkerHandle {
    id: WorkerId,
    tx: Sender<WorkerSignal>,
    join: JoinHandle<()>,
}

pub struct WorkerPool {
    workers: Vec<WorkerHandle>,
    stop: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Spawn the full pool or fail; partial pools are not supported.
    ///
    /// Any spawn, pinning or arena failure stops the workers already
    /// started and reports the error, which the caller treats as fatal.
    pub fn spawn(
        cfg: &PoolConfig,
        wakeback: Arc<WakeBack>,
        handler: Arc<dyn DataHandler>,
    ) -> Result<Self, PoolError> {
        cfg.validate()?;

        let cpus = affinity::online_cpus();
        let stop = Arc::new(AtomicBool::new(false));
        let mut pool = Self {
            workers: Vec::with_capacity(cfg.workers),
            stop: stop.clone(),
        };

        for i in 0..cfg.workers {
            let cpu = i % cpus;
            let arena = Arena::new(cfg.arena_bytes)?;
            let (tx, rx) = crossbeam_channel::bounded(cfg.inbound_depth);

            let ctx = WorkerCtx {
                id: WorkerId(i),
                cpu,
                rx,
                wakeback: wakeback.clone(),
                handler: handler.clone(),
                stop: stop.clone(),
            };
            let join = thread::Builder::new()
                .name(format!("burrow-worker-{}", i))
                .spawn(move || worker_loop(ctx, arena))
                .map_err(|e| {
                    pool.abort();
                    PoolError::Spawn(e)
                })?;

            match affinity::pin_thread(join.as_pthread_t(), cpu) {
                Ok(Pinning::Pinned) => {}
                Ok(Pinning::Unsupported) => {
                    // The pool still works, only the performance contract
                    // changes; surface it.
                    warn!(worker = i, cpu, "cpu pinning unsupported on this platform");
                }
                Err(source) => {
                    pool.workers.push(WorkerHandle {
                        id: WorkerId(i),
                        tx,
                        join,
                    });
                    pool.abort();
                    return Err(PoolError::Affinity {
                        worker: i,
                        cpu,
                        source,
                    });
                }
            }

            pool.workers.push(WorkerHandle {
                id: WorkerId(i),
                tx,
                join,
            });
        }

        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Forward a ready descriptor to worker `index`.
    ///
    /// Never blocks: a full inbound queue drops the event, by policy.
    /// Returns false on a drop so the caller can log it.
    pub fn dispatch(&self, index: usize, fd: RawFd) -> bool {
        match self.workers[index].tx.try_send(WorkerSignal::Conn(fd)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Stop every worker and join it.
    ///
    /// Sets the stop flag first, then delivers the shutdown sentinel, so
    /// dispatch events still queued ahead of the sentinel are discarded
    /// rather than processed: in-flight work is abandoned by design, the
    /// process exit closes the descriptors regardless.
    pub fn teardown(self) {
        self.stop.store(true, Ordering::Release);
        for w in &self.workers {
            let _ = w.tx.send(WorkerSignal::Shutdown);
        }
        for w in self.workers {
            drop(w.tx);
            if w.join.join().is_err() {
                warn!(worker = %w.id, "worker panicked during teardown");
            }
        }
    }

    /// Error-path teardown while the pool is still being built.
    fn abort(&mut self) {
        self.stop.store(true, Ordering::Release);
        for w in &self.workers {
            let _ = w.tx.send(WorkerSignal::Shutdown);
        }
        for w in self.workers.drain(..) {
            drop(w.tx);
            let _ = w.join.join();
        }
    }
}

struct WorkerCtx {
    id: WorkerId,
    cpu: usize,
    rx: Receiver<WorkerSignal>,
    wakeback: Arc<WakeBack>,
    handler: Arc<dyn DataHandler>,
    stop: Arc<AtomicBool>,
}

fn worker_loop(ctx: WorkerCtx, mut arena: Arena) {
    info!(
        worker = %ctx.id,
        cpu = ctx.cpu,
        arena_bytes = arena.usable_size(),
        "worker up"
    );

    let Some(buf) = arena.alloc(RECV_BUF) else {
        // Arena sizing is validated against RECV_BUF at config level;
        // reaching this means a misconfigured arena, not a runtime state.
        warn!(worker = %ctx.id, "arena too small for receive buffer, worker exiting");
        return;
    };

    loop {
        match ctx.rx.recv() {
            Ok(WorkerSignal::Conn(fd)) => {
                if ctx.stop.load(Ordering::Acquire) {
                    // Teardown in progress: discard without touching the fd.
                    continue;
                }
                // Safety: buf is RECV_BUF bytes of arena interior owned by
                // this worker; recv writes at most RECV_BUF bytes into it.
                let n = unsafe {
                    libc::recv(fd, buf.as_ptr() as *mut libc::c_void, RECV_BUF, 0)
                };
                if n > 0 {
                    // Safety: recv reported n initialized bytes in buf.
                    let bytes = unsafe { std::slice::from_raw_parts(buf.as_ptr(), n as usize) };
                    ctx.handler.on_data(ctx.id, fd, bytes);
                } else if n == 0 {
                    deregister(&ctx, fd);
                } else {
                    let err = std::io::Error::last_os_error();
                    match err.raw_os_error() {
                        Some(libc::EAGAIN) | Some(libc::EINTR) => {}
                        _ => deregister(&ctx, fd),
                    }
                }
            }
            Ok(WorkerSignal::Shutdown) | Err(_) => break,
        }
    }

    arena.dealloc(buf);
    debug!(worker = %ctx.id, "worker down");
}

/// Hand the descriptor back to the reactor. The worker never closes it;
/// descriptor lifecycle stays with the reactor.
fn deregister(ctx: &WorkerCtx, fd: RawFd) {
    if ctx.wakeback.post(Deregister { fd }).is_err() {
        warn!(worker = %ctx.id, fd, "wake-back queue full, deregistration dropped");
    }
}

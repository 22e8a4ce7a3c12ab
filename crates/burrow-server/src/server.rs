//! Server context
//!
//! `Server::start` replaces the global threadpool / global CPU count /
//! global parent-eventfd trio of older tunnel daemons with one explicit
//! object graph, built at startup and threaded through every operation.
//! Nothing in this crate reads process-wide mutable state.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use burrow_core::config::ServerConfig;
use burrow_core::error::{ReactorError, ServerError};
use burrow_core::handler::DataHandler;
use tracing::warn;

use crate::pool::{PoolConfig, WorkerPool};
use crate::reactor::Reactor;
use crate::rlimit;
use crate::wakeback::WakeBack;

pub struct Server;

impl Server {
    /// Bring the dispatcher up: descriptor limit, worker pool, listener,
    /// reactor thread. Any resource-acquisition failure is returned and
    /// the caller aborts; there is no partial startup.
    pub fn start(
        cfg: ServerConfig,
        handler: Arc<dyn DataHandler>,
    ) -> Result<ServerHandle, ServerError> {
        if cfg.raise_fd_limit {
            if let Err(err) = rlimit::raise_nofile(cfg.fd_limit) {
                warn!(limit = cfg.fd_limit, error = %err, "cannot raise descriptor limit");
            }
        }

        let wakeback = Arc::new(
            WakeBack::new(cfg.wakeback_depth).map_err(ReactorError::EventFd)?,
        );
        let pool = WorkerPool::spawn(&PoolConfig::from_server(&cfg), wakeback.clone(), handler)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let active = Arc::new(AtomicUsize::new(0));
        let mut reactor = Reactor::start(
            &cfg,
            pool,
            wakeback.clone(),
            shutdown.clone(),
            active.clone(),
        )?;
        let local_addr = reactor.local_addr();

        let join = thread::Builder::new()
            .name("burrow-reactor".into())
            .spawn(move || {
                let result = reactor.run();
                reactor.teardown();
                result
            })
            .map_err(ServerError::Spawn)?;

        Ok(ServerHandle {
            local_addr,
            active,
            stopper: Stopper { shutdown, wakeback },
            join,
        })
    }
}

/// Cooperative shutdown trigger.
///
/// `stop` only stores a flag and rings the reactor's doorbell; both are
/// async-signal-safe, so a clone of this can be driven from a signal
/// handler.
#[derive(Clone)]
pub struct Stopper {
    shutdown: Arc<AtomicBool>,
    wakeback: Arc<WakeBack>,
}

impl Stopper {
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.wakeback.wake();
    }
}

/// Handle to a running dispatcher.
pub struct ServerHandle {
    local_addr: SocketAddr,
    active: Arc<AtomicUsize>,
    stopper: Stopper,
    join: JoinHandle<Result<(), ReactorError>>,
}

impl ServerHandle {
    /// Address the listener bound to (resolves port 0 for tests).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Connections currently registered with the reactor.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn stopper(&self) -> Stopper {
        self.stopper.clone()
    }

    /// Request shutdown; the reactor observes it on its next iteration.
    pub fn stop(&self) {
        self.stopper.stop();
    }

    /// Wait for the reactor thread (and with it the pool) to finish.
    pub fn join(self) -> Result<(), ServerError> {
        let result = self.join.join().map_err(|_| ServerError::ReactorPanicked)?;
        result.map_err(ServerError::Reactor)
    }
}

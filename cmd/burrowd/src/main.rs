//! burrowd: the burrow tunnel daemon
//!
//! One reactor thread accepts and multiplexes, `cpus * threads-per-cpu`
//! pinned workers do the socket I/O. SIGINT/SIGTERM request a cooperative
//! shutdown through the reactor's doorbell.
//!
//! Usage:
//!     burrowd [--bind "[::]:6666"] [--threads-per-cpu 2] [--workers N]
//!
//! Logging is controlled with RUST_LOG (default "info").

use std::process::ExitCode;
use std::sync::{Arc, OnceLock};

use burrow_core::config::ServerConfig;
use burrow_core::handler::DebugHandler;
use burrow_server::server::{Server, Stopper};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "burrowd", version, about = "burrow tunnel daemon: connection dispatcher")]
struct Args {
    /// Bind specification (host:port)
    #[arg(long, default_value = "[::]:6666")]
    bind: String,

    /// Listen backlog depth
    #[arg(long, default_value_t = 5)]
    backlog: i32,

    /// Worker threads per logical CPU
    #[arg(long, default_value_t = 2)]
    threads_per_cpu: usize,

    /// Explicit worker count, overriding the per-CPU policy
    #[arg(long)]
    workers: Option<usize>,

    /// Leave RLIMIT_NOFILE alone at startup
    #[arg(long)]
    no_rlimit: bool,

    /// Descriptor ceiling applied when raising the limit
    #[arg(long, default_value_t = 10_000)]
    fd_limit: u64,
}

static STOPPER: OnceLock<Stopper> = OnceLock::new();

extern "C" fn on_signal(_sig: libc::c_int) {
    // Only async-signal-safe work here: Stopper::stop is an atomic
    // store plus an eventfd write.
    if let Some(stopper) = STOPPER.get() {
        stopper.stop();
    }
}

fn install_signal_handlers() {
    let handler = on_signal as extern "C" fn(libc::c_int);
    // Safety: the handler performs only async-signal-safe operations.
    unsafe {
        libc::signal(libc::SIGINT, handler as usize);
        libc::signal(libc::SIGTERM, handler as usize);
    }
}

fn main() -> ExitCode {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_thread_names(true)
        .init();

    let args = Args::parse();
    let cfg = ServerConfig {
        bind: args.bind,
        backlog: args.backlog,
        raise_fd_limit: !args.no_rlimit,
        fd_limit: args.fd_limit,
        threads_per_cpu: args.threads_per_cpu,
        workers: args.workers,
        ..ServerConfig::default()
    };

    info!("burrowd booting");

    let handle = match Server::start(cfg, Arc::new(DebugHandler)) {
        Ok(handle) => handle,
        Err(err) => {
            error!(error = %err, "startup failed");
            return ExitCode::FAILURE;
        }
    };

    // The handle outlives the handler registration below, so the
    // stopper's targets stay alive for the whole process.
    let _ = STOPPER.set(handle.stopper());
    install_signal_handlers();

    match handle.join() {
        Ok(()) => {
            info!("burrowd shut down");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "reactor failed");
            ExitCode::FAILURE
        }
    }
}

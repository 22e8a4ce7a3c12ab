//! End-to-end dispatch behavior against a live listener.

use std::io::Write;
use std::net::TcpStream;
use std::os::fd::RawFd;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use burrow_core::config::ServerConfig;
use burrow_core::event::WorkerId;
use burrow_core::handler::DataHandler;
use burrow_server::server::{Server, ServerHandle};

/// Handler that records which worker delivered which bytes.
#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(usize, usize)>>,
}

impl DataHandler for Recorder {
    fn on_data(&self, worker: WorkerId, _fd: RawFd, bytes: &[u8]) {
        self.seen.lock().unwrap().push((worker.0, bytes.len()));
    }
}

fn test_server(workers: usize, recorder: Arc<Recorder>) -> ServerHandle {
    let cfg = ServerConfig {
        bind: "127.0.0.1:0".to_string(),
        raise_fd_limit: false,
        workers: Some(workers),
        arena_pages: 8,
        ..ServerConfig::default()
    };
    Server::start(cfg, recorder).expect("server start")
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

#[test]
fn round_robin_cycles_through_workers() {
    let recorder = Arc::new(Recorder::default());
    let server = test_server(2, recorder.clone());
    let addr = server.local_addr();

    // Three connections, each sending once, spaced out so the readiness
    // events reach the reactor in connection order.
    let mut clients = Vec::new();
    for _ in 0..3 {
        let mut c = TcpStream::connect(addr).expect("connect");
        c.write_all(b"ping").expect("send");
        assert!(wait_until(Duration::from_secs(2), || {
            recorder.seen.lock().unwrap().len() > clients.len()
        }));
        clients.push(c);
    }

    let seen = recorder.seen.lock().unwrap().clone();
    let workers: Vec<usize> = seen.iter().map(|(w, _)| *w).collect();
    assert_eq!(workers, vec![0, 1, 0]);

    drop(clients);
    server.stop();
    server.join().expect("clean shutdown");
}

#[test]
fn peer_close_deregisters_exactly_once() {
    let recorder = Arc::new(Recorder::default());
    let server = test_server(2, recorder.clone());
    let addr = server.local_addr();

    let mut client = TcpStream::connect(addr).expect("connect");
    client.write_all(b"payload").expect("send");

    assert!(wait_until(Duration::from_secs(2), || {
        recorder.seen.lock().unwrap().len() == 1
    }));
    assert_eq!(server.active_connections(), 1);

    // Closing the peer produces end-of-stream at the worker, which must
    // hand the descriptor back for exactly one deregistration.
    drop(client);
    assert!(wait_until(Duration::from_secs(2), || {
        server.active_connections() == 0
    }));

    // Give any stray duplicate a chance to land; the count must hold.
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(server.active_connections(), 0);
    assert_eq!(recorder.seen.lock().unwrap().len(), 1);

    server.stop();
    server.join().expect("clean shutdown");
}

#[test]
fn stop_releases_a_blocked_reactor() {
    let recorder = Arc::new(Recorder::default());
    let server = test_server(1, recorder);

    // No traffic at all: the reactor sits in epoll_wait. stop() must
    // still bring it down promptly via the doorbell.
    let started = Instant::now();
    server.stop();
    server.join().expect("clean shutdown");
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn accepted_connections_are_counted() {
    let recorder = Arc::new(Recorder::default());
    let server = test_server(1, recorder);
    let addr = server.local_addr();

    let c1 = TcpStream::connect(addr).expect("connect");
    let c2 = TcpStream::connect(addr).expect("connect");
    assert!(wait_until(Duration::from_secs(2), || {
        server.active_connections() == 2
    }));

    drop((c1, c2));
    assert!(wait_until(Duration::from_secs(2), || {
        server.active_connections() == 0
    }));

    server.stop();
    server.join().expect("clean shutdown");
}

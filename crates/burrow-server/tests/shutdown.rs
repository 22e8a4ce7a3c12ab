//! Teardown behavior: shutdown with work still queued.
//!
//! Kept in its own test binary so the process-wide arena region count
//! has no other tests mutating it.

use std::io::Write;
use std::net::TcpStream;
use std::sync::Arc;

use burrow_core::config::ServerConfig;
use burrow_core::handler::DebugHandler;
use burrow_server::arena;
use burrow_server::server::Server;

#[test]
fn shutdown_with_queued_dispatches_releases_everything() {
    assert_eq!(arena::live_regions(), 0);

    let cfg = ServerConfig {
        bind: "127.0.0.1:0".to_string(),
        raise_fd_limit: false,
        workers: Some(2),
        arena_pages: 8,
        ..ServerConfig::default()
    };
    let server = Server::start(cfg, Arc::new(DebugHandler)).expect("server start");
    assert_eq!(arena::live_regions(), 2);

    // Five connections all writing at once, so dispatch events are in
    // flight across both workers when the stop lands.
    let addr = server.local_addr();
    let mut clients = Vec::new();
    for _ in 0..5 {
        let mut c = TcpStream::connect(addr).expect("connect");
        c.write_all(b"queued").expect("send");
        clients.push(c);
    }

    server.stop();
    server.join().expect("clean shutdown");

    // Queued events may have been discarded; what must hold is that the
    // process is intact and every arena was unmapped.
    assert_eq!(arena::live_regions(), 0);
    drop(clients);
}

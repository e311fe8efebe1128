//! Echo server on the raw transport.
//!
//! Usage:
//!   cargo run --example echo_server [BIND_ADDR]
//!   # default: 127.0.0.1:7878

use std::sync::Arc;

use shoreline::{Config, Handler, Io, Peer, ServerBuilder};

struct Echo {
    worker_id: usize,
}

impl Handler for Echo {
    fn create_for_worker(&self, worker_id: usize) -> Echo {
        eprintln!("[worker {worker_id}] starting");
        Echo { worker_id }
    }

    fn on_connection(&mut self, _io: &mut Io, peer: &Arc<Peer>) {
        eprintln!("[worker {}] accepted {peer}", self.worker_id);
    }

    fn on_input(&mut self, io: &mut Io, buf: &[u8], peer: &Arc<Peer>) {
        if let Err(e) = io.async_write(peer.fd(), buf.to_vec(), libc::MSG_NOSIGNAL, |_| {}) {
            eprintln!("[worker {}] write error: {e}", self.worker_id);
        }
    }

    fn on_disconnection(&mut self, _io: &mut Io, peer: &Arc<Peer>) {
        eprintln!("[worker {}] closed {peer}", self.worker_id);
    }
}

fn main() {
    let bind_addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:7878".to_string());

    let config = Config {
        threads: 1,
        ..Config::default()
    };

    eprintln!("starting echo server on {bind_addr}");

    let (_shutdown, handles) = ServerBuilder::new(config)
        .bind(bind_addr.parse().expect("invalid bind address"))
        .launch(Echo { worker_id: 0 })
        .expect("failed to launch workers");

    for handle in handles {
        if let Err(e) = handle.join().expect("worker thread panicked") {
            eprintln!("worker exited with error: {e:?}");
        }
    }
}

//! The HTTP endpoint: router-driven transport handler plus launch glue.

use std::cell::Cell;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use shoreline::{Config, Handler, Io, Peer, ServerBuilder, ShutdownHandle};

use crate::conn::{self, Conn};
use crate::error::HttpError;
use crate::response::{Code, ResponseWriter};
use crate::router::Router;

/// An HTTP server endpoint.
///
/// ```rust,no_run
/// use shoreline_http::{Code, Endpoint, Router};
///
/// let mut router = Router::new();
/// router.get("/ready", |_, response| {
///     let _ = response.send(Code::Ok, "1");
/// });
///
/// let (shutdown, handles) = Endpoint::new("127.0.0.1:9080".parse().unwrap())
///     .threads(2)
///     .serve(router)
///     .unwrap();
/// # let _ = (shutdown, handles);
/// ```
pub struct Endpoint {
    addr: SocketAddr,
    config: Config,
}

impl Endpoint {
    pub fn new(addr: SocketAddr) -> Endpoint {
        Endpoint {
            addr,
            config: Config::default(),
        }
    }

    /// Number of reactor threads. `0` means one per online CPU.
    pub fn threads(mut self, threads: usize) -> Endpoint {
        self.config.threads = threads;
        self
    }

    /// Replace the whole transport configuration.
    pub fn config(mut self, config: Config) -> Endpoint {
        self.config = config;
        self
    }

    /// Bind, launch the reactors, and serve `router` on them. Each
    /// reactor gets its own handler sharing the compiled routes.
    pub fn serve(
        self,
        router: Router,
    ) -> Result<
        (
            ShutdownHandle,
            Vec<thread::JoinHandle<Result<(), shoreline::Error>>>,
        ),
        HttpError,
    > {
        let prototype = RouterHandler {
            router: Arc::new(router),
        };
        ServerBuilder::new(self.config)
            .bind(self.addr)
            .launch(prototype)
            .map_err(HttpError::from)
    }
}

/// Transport handler bridging framed bytes to the router: per-peer
/// request decoding, dispatch, and the handler-failure boundary.
struct RouterHandler {
    router: Arc<Router>,
}

impl RouterHandler {
    /// Route one request. A panicking route handler is converted into a
    /// 500 unless it already responded.
    fn dispatch(&self, io: &mut Io, peer: &Arc<Peer>, request: crate::request::Request) {
        let sent = Cell::new(false);
        let router = self.router.clone();

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let writer = ResponseWriter::new(io, peer, &sent);
            router.handle(request, writer);
        }));

        if outcome.is_err() && !sent.get() {
            let writer = ResponseWriter::new(io, peer, &sent);
            let _ = writer.send(Code::InternalServerError, "Internal Server Error");
        }
    }
}

impl Handler for RouterHandler {
    fn create_for_worker(&self, _worker_id: usize) -> RouterHandler {
        RouterHandler {
            router: self.router.clone(),
        }
    }

    fn on_connection(&mut self, _io: &mut Io, peer: &Arc<Peer>) {
        peer.set_data(Conn::new());
    }

    fn on_input(&mut self, io: &mut Io, buf: &[u8], peer: &Arc<Peer>) {
        peer.with_data(|conn: &mut Conn| conn.decoder.feed(buf));

        loop {
            let decoded = match peer.with_data(|conn: &mut Conn| conn.decoder.decode()) {
                Some(decoded) => decoded,
                None => return,
            };

            match decoded {
                Ok(Some(request)) => {
                    let close = request
                        .header("connection")
                        .map(|v| v.eq_ignore_ascii_case("close"))
                        .unwrap_or(false);

                    self.dispatch(io, peer, request);

                    if close {
                        conn::close_when_flushed(io, peer);
                        return;
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    let sent = Cell::new(false);
                    let writer = ResponseWriter::new(io, peer, &sent);
                    let _ = writer.send(Code::BadRequest, e.to_string());
                    conn::close_when_flushed(io, peer);
                    return;
                }
            }
        }
    }

    fn on_write_drained(&mut self, io: &mut Io, peer: &Arc<Peer>) {
        conn::pump(io, peer);
    }

    fn on_disconnection(&mut self, _io: &mut Io, peer: &Arc<Peer>) {
        // Anything still queued has nowhere to go.
        let _ = peer.take_data::<Conn>();
    }
}

//! shoreline — an embeddable epoll reactor for building TCP servers.
//!
//! shoreline runs one transport per reactor thread over an edge-triggered
//! poller. A dedicated acceptor thread distributes new connections to the
//! reactors round-robin; every other cross-thread interaction goes
//! through pollable MPSC queues, never shared table locks. Outbound
//! writes buffer their remainder on would-block (with a `sendfile(2)`
//! path for file payloads), and one-shot timers ride kernel timer
//! descriptors.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use shoreline::{Config, Handler, Io, Peer, ServerBuilder};
//!
//! struct Echo;
//!
//! impl Handler for Echo {
//!     fn create_for_worker(&self, _worker_id: usize) -> Echo {
//!         Echo
//!     }
//!
//!     fn on_input(&mut self, io: &mut Io, buf: &[u8], peer: &Arc<Peer>) {
//!         let _ = io.async_write(peer.fd(), buf.to_vec(), 0, |_| {});
//!     }
//! }
//!
//! fn main() -> Result<(), shoreline::Error> {
//!     let (_shutdown, handles) = ServerBuilder::new(Config::default())
//!         .bind("127.0.0.1:7878".parse().unwrap())
//!         .launch(Echo)?;
//!     for h in handles {
//!         h.join().unwrap()?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Platform
//!
//! Linux only: epoll, eventfd, timerfd, and sendfile.

pub(crate) mod acceptor;

pub mod config;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod notify;
pub mod peer;
pub mod poller;
pub mod queue;
pub mod transport;
pub mod worker;

/// Reactor configuration.
pub use config::Config;
/// Reactor errors.
pub use error::Error;
/// Transport event handler trait.
pub use handler::Handler;
/// Counting event descriptor for cross-thread wake-ups.
pub use notify::NotifyFd;
/// A connected client.
pub use peer::Peer;
/// A single readiness event.
pub use poller::Event;
/// Readiness interest bit-set.
pub use poller::Interest;
/// Level or edge-triggered registration.
pub use poller::Mode;
/// Wrapper over an epoll instance.
pub use poller::Poller;
/// Opaque per-registration event tag.
pub use poller::Tag;
/// Consumer side of a pollable cross-thread queue.
pub use queue::PollableQueue;
/// Producer handle for a pollable queue.
pub use queue::QueueSender;
/// Create a timer descriptor for [`Io::arm_timer`].
pub use transport::create_timerfd;
/// Cross-thread handle to one reactor.
pub use transport::Handle;
/// Reactor-thread transport state, passed to handler callbacks.
pub use transport::Io;
/// Outbound payload (owned bytes or a sendfile segment).
pub use transport::Payload;
/// CPU time consumed by a reactor thread.
pub use transport::ThreadUsage;
/// One reactor: poller, tables, and handler.
pub use transport::Transport;
/// Size of the per-turn incoming scratch buffer.
pub use transport::MAX_BUFFER;
/// Builder for launching reactor threads.
pub use worker::ServerBuilder;
/// Handle for triggering graceful shutdown.
pub use worker::ShutdownHandle;
/// Number of online CPU cores.
pub use worker::num_cpus;

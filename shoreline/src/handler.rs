//! Transport event handler trait.

use std::sync::Arc;

use crate::peer::Peer;
use crate::transport::Io;

/// Receives transport events on a reactor thread.
///
/// A handler value passed to [`ServerBuilder::launch`](crate::ServerBuilder::launch)
/// acts as a prototype: every reactor thread gets its own instance via
/// [`create_for_worker`](Handler::create_for_worker), so implementations
/// never need internal synchronization for per-worker state.
///
/// Callbacks receive the reactor's [`Io`] and may use it to issue writes,
/// arm timers, or close peers.
pub trait Handler: Send + 'static {
    /// Build the instance for one reactor thread.
    fn create_for_worker(&self, worker_id: usize) -> Self
    where
        Self: Sized;

    /// A new peer was admitted on this reactor.
    fn on_connection(&mut self, _io: &mut Io, _peer: &Arc<Peer>) {}

    /// Bytes arrived from a peer. `buf` holds everything drained from the
    /// socket this readiness turn, in arrival order.
    fn on_input(&mut self, io: &mut Io, buf: &[u8], peer: &Arc<Peer>);

    /// A buffered write for the peer finished draining (resolved or
    /// rejected) and its descriptor reverted to read interest. Not called
    /// for writes that complete on first submission.
    fn on_write_drained(&mut self, _io: &mut Io, _peer: &Arc<Peer>) {}

    /// The peer is going away. Fired before its descriptor is closed, but
    /// the descriptor must not be assumed usable.
    fn on_disconnection(&mut self, _io: &mut Io, _peer: &Arc<Peer>) {}
}

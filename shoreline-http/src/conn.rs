//! Per-connection state: request decoding and response ordering.
//!
//! The transport allows one buffered write per descriptor, so pipelined
//! responses cannot all be handed to it at once. Each connection keeps an
//! outbox: the first response goes straight to the transport, later ones
//! wait their turn and are submitted from [`pump`] as the transport
//! reports drains. Responses therefore leave in request order.

use std::collections::VecDeque;
use std::sync::Arc;

use shoreline::{Io, Peer};

use crate::codec::RequestDecoder;
use crate::error::HttpError;

/// Held in the peer's data slot for the lifetime of the connection.
pub(crate) struct Conn {
    pub(crate) decoder: RequestDecoder,
    outbox: VecDeque<Vec<u8>>,
    close_pending: bool,
}

impl Conn {
    pub(crate) fn new() -> Conn {
        Conn {
            decoder: RequestDecoder::new(),
            outbox: VecDeque::new(),
            close_pending: false,
        }
    }
}

/// Send `bytes` to the peer, or queue them behind a response that is
/// still draining. A peer without connection state is already tearing
/// down; the bytes are dropped.
pub(crate) fn send(io: &mut Io, peer: &Arc<Peer>, bytes: Vec<u8>) -> Result<(), HttpError> {
    let draining = io.has_pending_write(peer.fd());

    let mut bytes = Some(bytes);
    let queued = peer
        .with_data(|conn: &mut Conn| {
            if draining || !conn.outbox.is_empty() {
                conn.outbox.push_back(bytes.take().unwrap());
                true
            } else {
                false
            }
        })
        .unwrap_or(true);

    if queued {
        return Ok(());
    }

    io.async_write(peer.fd(), bytes.take().unwrap(), libc::MSG_NOSIGNAL, |_| {})?;
    Ok(())
}

/// Submit queued responses now that the transport's write slot is free,
/// then honor a close requested while the outbox was still full.
pub(crate) fn pump(io: &mut Io, peer: &Arc<Peer>) {
    loop {
        if io.has_pending_write(peer.fd()) {
            // Back to draining; the next drain pumps again.
            return;
        }
        let next = peer
            .with_data(|conn: &mut Conn| conn.outbox.pop_front())
            .flatten();
        match next {
            Some(bytes) => {
                if io
                    .async_write(peer.fd(), bytes, libc::MSG_NOSIGNAL, |_| {})
                    .is_err()
                {
                    return;
                }
            }
            None => break,
        }
    }

    let close = peer
        .with_data(|conn: &mut Conn| conn.close_pending)
        .unwrap_or(false);
    if close {
        io.close_peer(peer.fd());
    }
}

/// Close the peer once every queued response has been handed to the
/// transport. The transport itself waits out a still-draining write
/// before the descriptor actually closes.
pub(crate) fn close_when_flushed(io: &mut Io, peer: &Arc<Peer>) {
    let queued = peer
        .with_data(|conn: &mut Conn| !conn.outbox.is_empty())
        .unwrap_or(false);
    if queued {
        peer.with_data(|conn: &mut Conn| conn.close_pending = true);
    } else {
        io.close_peer(peer.fd());
    }
}

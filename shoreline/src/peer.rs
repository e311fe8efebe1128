//! Connected remote clients.

use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::sync::Mutex;

/// A connected client.
///
/// Exactly one transport owns a peer for its entire lifetime; handlers
/// receive shared references for the duration of a call. The data slot
/// holds opaque per-peer state (a protocol decoder, session data, ...).
pub struct Peer {
    fd: RawFd,
    addr: SocketAddr,
    data: Mutex<Option<Box<dyn Any + Send>>>,
}

impl Peer {
    pub(crate) fn new(fd: RawFd, addr: SocketAddr) -> Peer {
        Peer {
            fd,
            addr,
            data: Mutex::new(None),
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Replace the per-peer data slot.
    pub fn set_data<T: Any + Send>(&self, value: T) {
        *self.data.lock().unwrap() = Some(Box::new(value));
    }

    /// Run `f` against the data slot if it holds a `T`. Returns `None`
    /// when the slot is empty or holds a different type.
    pub fn with_data<T: Any + Send, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut slot = self.data.lock().unwrap();
        slot.as_mut()?.downcast_mut::<T>().map(f)
    }

    /// Take the data slot out of the peer.
    pub fn take_data<T: Any + Send>(&self) -> Option<Box<T>> {
        let mut slot = self.data.lock().unwrap();
        match slot.take() {
            Some(boxed) => match boxed.downcast::<T>() {
                Ok(value) => Some(value),
                Err(other) => {
                    *slot = Some(other);
                    None
                }
            },
            None => None,
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (fd {})", self.addr, self.fd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_peer() -> Peer {
        Peer::new(7, "127.0.0.1:4242".parse().unwrap())
    }

    #[test]
    fn data_slot_round_trip() {
        let peer = test_peer();
        assert_eq!(peer.with_data(|n: &mut u32| *n), None);

        peer.set_data(41u32);
        assert_eq!(peer.with_data(|n: &mut u32| {
            *n += 1;
            *n
        }), Some(42));

        // Wrong type leaves the slot untouched.
        assert_eq!(peer.with_data(|s: &mut String| s.clone()), None);
        assert_eq!(*peer.take_data::<u32>().unwrap(), 42);
        assert!(peer.take_data::<u32>().is_none());
    }
}

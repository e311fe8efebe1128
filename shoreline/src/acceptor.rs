//! TCP listener and the acceptor loop.
//!
//! A single acceptor thread blocks in `accept4` and hands each new
//! descriptor to a reactor through its peers queue. The queue push
//! itself wakes the target reactor, so distribution is one submission
//! per connection.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::os::fd::RawFd;
use std::time::Duration;

use crate::error::Error;
use crate::transport::Handle;

pub(crate) struct AcceptorConfig {
    /// The listening socket fd, in blocking mode.
    pub listen_fd: RawFd,
    /// Reactor handles receiving accepted connections in rotation.
    pub workers: Vec<Handle>,
    /// Whether to set TCP_NODELAY on accepted connections.
    pub tcp_nodelay: bool,
}

enum Accept {
    Conn(RawFd, SocketAddr),
    Retry,
    Done,
}

/// Run the acceptor loop. Returns when the listen fd is closed (shutdown)
/// or no live reactor remains.
pub(crate) fn run_acceptor(config: AcceptorConfig) {
    let mut workers = config.workers;
    let mut next = 0usize;

    loop {
        let (fd, addr) = match accept_one(config.listen_fd) {
            Accept::Conn(fd, addr) => (fd, addr),
            Accept::Retry => continue,
            Accept::Done => return,
        };

        if config.tcp_nodelay {
            set_nodelay(fd);
        }

        // Rotate over the reactors; a failed push means that reactor is
        // gone and drops out of the rotation.
        loop {
            if workers.is_empty() {
                unsafe {
                    libc::close(fd);
                }
                return;
            }
            next %= workers.len();
            if workers[next].add_peer(fd, addr).is_ok() {
                next += 1;
                break;
            }
            workers.remove(next);
        }
    }
}

fn accept_one(listen_fd: RawFd) -> Accept {
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut addr_len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

    let fd = unsafe {
        libc::accept4(
            listen_fd,
            &mut storage as *mut _ as *mut libc::sockaddr,
            &mut addr_len,
            libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
        )
    };

    if fd >= 0 {
        return Accept::Conn(fd, peer_addr(&storage));
    }

    match io::Error::last_os_error().raw_os_error() {
        Some(libc::EINTR) => Accept::Retry,
        // Out of descriptors; give closes elsewhere a moment to free
        // some.
        Some(libc::EMFILE) | Some(libc::ENFILE) => {
            std::thread::sleep(Duration::from_millis(10));
            Accept::Retry
        }
        // The listen fd was closed (shutdown) or accept failed fatally.
        _ => Accept::Done,
    }
}

fn set_nodelay(fd: RawFd) {
    let on: libc::c_int = 1;
    unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_NODELAY,
            &on as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }
}

/// Peer address out of the storage filled by `accept4`. Unknown address
/// families come back as the unspecified address.
fn peer_addr(storage: &libc::sockaddr_storage) -> SocketAddr {
    let (ip, port) = match storage.ss_family as libc::c_int {
        libc::AF_INET => {
            let v4 = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            (
                IpAddr::V4(Ipv4Addr::from(u32::from_be(v4.sin_addr.s_addr))),
                v4.sin_port,
            )
        }
        libc::AF_INET6 => {
            let v6 = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            (IpAddr::V6(Ipv6Addr::from(v6.sin6_addr.s6_addr)), v6.sin6_port)
        }
        _ => return SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
    };
    SocketAddr::new(ip, u16::from_be(port))
}

/// Create a TCP listener with SO_REUSEADDR, left in blocking mode for the
/// acceptor thread's `accept4`.
pub(crate) fn create_listener(addr: SocketAddr, backlog: i32) -> Result<RawFd, Error> {
    let domain = if addr.is_ipv4() {
        libc::AF_INET
    } else {
        libc::AF_INET6
    };

    let fd = unsafe { libc::socket(domain, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(Error::syscall("socket"));
    }

    let optval: libc::c_int = 1;
    unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }

    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let addr_len = socket_addr_to_sockaddr(addr, &mut storage);

    let ret = unsafe { libc::bind(fd, &storage as *const _ as *const libc::sockaddr, addr_len) };
    if ret < 0 {
        let err = Error::syscall("bind");
        unsafe {
            libc::close(fd);
        }
        return Err(err);
    }

    let ret = unsafe { libc::listen(fd, backlog) };
    if ret < 0 {
        let err = Error::syscall("listen");
        unsafe {
            libc::close(fd);
        }
        return Err(err);
    }

    Ok(fd)
}

/// Fill a `sockaddr_storage` from a `SocketAddr`, returning its length.
fn socket_addr_to_sockaddr(
    addr: SocketAddr,
    storage: &mut libc::sockaddr_storage,
) -> libc::socklen_t {
    match addr {
        SocketAddr::V4(v4) => {
            let sa = unsafe { &mut *(storage as *mut _ as *mut libc::sockaddr_in) };
            sa.sin_family = libc::AF_INET as libc::sa_family_t;
            sa.sin_port = v4.port().to_be();
            sa.sin_addr.s_addr = u32::from(*v4.ip()).to_be();
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t
        }
        SocketAddr::V6(v6) => {
            let sa = unsafe { &mut *(storage as *mut _ as *mut libc::sockaddr_in6) };
            sa.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sa.sin6_port = v6.port().to_be();
            sa.sin6_addr.s6_addr = v6.ip().octets();
            sa.sin6_scope_id = v6.scope_id();
            std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t
        }
    }
}

//! Epoll-backed readiness poller.
//!
//! Registrations default to edge-triggered: a readiness transition is
//! reported once, and the consumer must drain the descriptor until the
//! syscall returns would-block before the next event can fire.

use std::io;
use std::ops::BitOr;
use std::os::fd::RawFd;
use std::time::Duration;

use crate::error::Error;

/// Readiness interest bit-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest(u32);

impl Interest {
    pub const READ: Interest = Interest(1);
    pub const WRITE: Interest = Interest(1 << 1);
    pub const HANGUP: Interest = Interest(1 << 2);
    pub const SHUTDOWN: Interest = Interest(1 << 3);

    pub(crate) const NONE: Interest = Interest(0);

    pub const fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

/// Level or edge-triggered registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Level,
    Edge,
}

/// Opaque 64-bit value attached to a registration and returned with every
/// event for that descriptor. Callers typically store the fd itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag(u64);

impl Tag {
    pub const fn new(value: u64) -> Tag {
        Tag(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    pub const fn fd(self) -> RawFd {
        self.0 as RawFd
    }
}

impl From<RawFd> for Tag {
    fn from(fd: RawFd) -> Tag {
        Tag(fd as u64)
    }
}

/// A single readiness event.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    tag: Tag,
    ready: Interest,
}

impl Event {
    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn is_readable(&self) -> bool {
        self.ready.contains(Interest::READ)
    }

    pub fn is_writable(&self) -> bool {
        self.ready.contains(Interest::WRITE)
    }

    pub fn is_hangup(&self) -> bool {
        self.ready.contains(Interest::HANGUP)
    }

    pub fn is_shutdown(&self) -> bool {
        self.ready.contains(Interest::SHUTDOWN)
    }
}

/// Wrapper over an epoll instance.
pub struct Poller {
    epoll_fd: RawFd,
}

impl Poller {
    pub fn new() -> Result<Poller, Error> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(Error::syscall("epoll_create1"));
        }
        Ok(Poller { epoll_fd: fd })
    }

    /// Register `fd` for `interest`, reporting events under `tag`.
    pub fn add(&self, fd: RawFd, interest: Interest, tag: Tag, mode: Mode) -> Result<(), Error> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, to_epoll_events(interest, mode), tag)
    }

    /// Like [`add`](Self::add), but the registration is disarmed after one
    /// event and must be re-armed to fire again.
    pub fn add_oneshot(
        &self,
        fd: RawFd,
        interest: Interest,
        tag: Tag,
        mode: Mode,
    ) -> Result<(), Error> {
        let events = to_epoll_events(interest, mode) | libc::EPOLLONESHOT as u32;
        self.ctl(libc::EPOLL_CTL_ADD, fd, events, tag)
    }

    /// Replace the interest set of an already-registered descriptor.
    pub fn modify(&self, fd: RawFd, interest: Interest, tag: Tag, mode: Mode) -> Result<(), Error> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, to_epoll_events(interest, mode), tag)
    }

    /// Deregister a descriptor.
    pub fn remove(&self, fd: RawFd) -> Result<(), Error> {
        // A non-null event pointer keeps pre-2.6.9 kernels happy.
        self.ctl(libc::EPOLL_CTL_DEL, fd, 0, Tag::new(0))
    }

    /// Block for up to `timeout`, appending up to `max_events` ready events
    /// to `events`. Returns the number of events observed; `0` on timeout
    /// or interruption.
    pub fn poll(
        &self,
        events: &mut Vec<Event>,
        max_events: usize,
        timeout: Duration,
    ) -> Result<usize, Error> {
        const CAPACITY: usize = 1024;
        let max = max_events.min(CAPACITY);

        let mut evs: [libc::epoll_event; CAPACITY] = unsafe { std::mem::zeroed() };
        let ready = unsafe {
            libc::epoll_wait(
                self.epoll_fd,
                evs.as_mut_ptr(),
                max as libc::c_int,
                timeout.as_millis() as libc::c_int,
            )
        };

        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(Error::Syscall {
                op: "epoll_wait",
                source: err,
            });
        }

        for ev in &evs[..ready as usize] {
            events.push(Event {
                tag: Tag::new(ev.u64),
                ready: to_interest(ev.events),
            });
        }

        Ok(ready as usize)
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, events: u32, tag: Tag) -> Result<(), Error> {
        let mut ev = libc::epoll_event {
            events,
            u64: tag.value(),
        };
        let ret = unsafe { libc::epoll_ctl(self.epoll_fd, op, fd, &mut ev) };
        if ret < 0 {
            return Err(Error::syscall("epoll_ctl"));
        }
        Ok(())
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epoll_fd);
        }
    }
}

fn to_epoll_events(interest: Interest, mode: Mode) -> u32 {
    let mut events = 0u32;
    if interest.contains(Interest::READ) {
        events |= libc::EPOLLIN as u32;
    }
    if interest.contains(Interest::WRITE) {
        events |= libc::EPOLLOUT as u32;
    }
    if interest.contains(Interest::HANGUP) {
        events |= libc::EPOLLHUP as u32;
    }
    if interest.contains(Interest::SHUTDOWN) {
        events |= libc::EPOLLRDHUP as u32;
    }
    if mode == Mode::Edge {
        events |= libc::EPOLLET as u32;
    }
    events
}

fn to_interest(events: u32) -> Interest {
    let mut interest = Interest::NONE;
    if events & libc::EPOLLIN as u32 != 0 {
        interest = interest | Interest::READ;
    }
    if events & libc::EPOLLOUT as u32 != 0 {
        interest = interest | Interest::WRITE;
    }
    if events & libc::EPOLLHUP as u32 != 0 {
        interest = interest | Interest::HANGUP;
    }
    if events & libc::EPOLLRDHUP as u32 != 0 {
        interest = interest | Interest::SHUTDOWN;
    }
    interest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interest_composition() {
        let both = Interest::READ | Interest::WRITE;
        assert!(both.contains(Interest::READ));
        assert!(both.contains(Interest::WRITE));
        assert!(!both.contains(Interest::SHUTDOWN));
        assert!(both.contains(Interest::READ | Interest::WRITE));
    }

    #[test]
    fn event_flags_round_trip() {
        let events = to_epoll_events(Interest::READ | Interest::SHUTDOWN, Mode::Level);
        let back = to_interest(events);
        assert!(back.contains(Interest::READ));
        assert!(back.contains(Interest::SHUTDOWN));
        assert!(!back.contains(Interest::WRITE));
    }

    #[test]
    fn eventfd_becomes_readable() {
        let poller = Poller::new().unwrap();
        let efd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        assert!(efd >= 0);

        poller
            .add(efd, Interest::READ, Tag::from(efd), Mode::Edge)
            .unwrap();

        let mut events = Vec::new();
        let n = poller
            .poll(&mut events, 16, Duration::from_millis(10))
            .unwrap();
        assert_eq!(n, 0);

        let val: u64 = 1;
        unsafe {
            libc::write(efd, &val as *const u64 as *const libc::c_void, 8);
        }

        let n = poller
            .poll(&mut events, 16, Duration::from_millis(500))
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(events[0].tag().fd(), efd);
        assert!(events[0].is_readable());

        poller.remove(efd).unwrap();
        unsafe {
            libc::close(efd);
        }
    }
}

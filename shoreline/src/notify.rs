//! Counting event descriptor for cross-thread wake-ups.

use std::io;
use std::os::fd::RawFd;

use crate::error::Error;
use crate::poller::{Interest, Mode, Poller, Tag};

/// A non-blocking eventfd. The owning reactor registers it for Read|Edge
/// via [`bind`](NotifyFd::bind); any thread holding the raw fd can wake
/// that reactor with [`notify`](NotifyFd::notify).
pub struct NotifyFd {
    event_fd: RawFd,
    bound: bool,
}

impl NotifyFd {
    pub fn new() -> Result<NotifyFd, Error> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(Error::syscall("eventfd"));
        }
        Ok(NotifyFd {
            event_fd: fd,
            bound: false,
        })
    }

    /// Register with the poller. Called exactly once.
    pub fn bind(&mut self, poller: &Poller) -> Result<Tag, Error> {
        assert!(!self.bound, "notify fd is already bound");
        let tag = self.tag();
        poller.add(self.event_fd, Interest::READ, tag, Mode::Edge)?;
        self.bound = true;
        Ok(tag)
    }

    pub fn tag(&self) -> Tag {
        Tag::from(self.event_fd)
    }

    pub fn fd(&self) -> RawFd {
        self.event_fd
    }

    /// Increment the counter, waking the bound poller. Valid from any
    /// thread.
    pub fn notify(&self) -> Result<(), Error> {
        notify_raw(self.event_fd)
    }

    /// Clear the counter, returning whether a count was present.
    pub fn try_read(&self) -> Result<bool, Error> {
        let mut val: u64 = 0;
        let ret = unsafe {
            libc::read(
                self.event_fd,
                &mut val as *mut u64 as *mut libc::c_void,
                8,
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(false);
            }
            return Err(Error::Syscall {
                op: "eventfd read",
                source: err,
            });
        }
        Ok(true)
    }

    /// Clear the counter, returning its value. Fails with would-block if
    /// nothing is pending; callers that want a quiet probe use
    /// [`try_read`](NotifyFd::try_read).
    pub fn read(&self) -> Result<u64, Error> {
        let mut val: u64 = 0;
        let ret = unsafe {
            libc::read(
                self.event_fd,
                &mut val as *mut u64 as *mut libc::c_void,
                8,
            )
        };
        if ret < 0 {
            return Err(Error::syscall("eventfd read"));
        }
        Ok(val)
    }
}

impl Drop for NotifyFd {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.event_fd);
        }
    }
}

/// Wake the reactor owning `fd`. Used by senders holding only the raw fd.
pub(crate) fn notify_raw(fd: RawFd) -> Result<(), Error> {
    let val: u64 = 1;
    let ret = unsafe { libc::write(fd, &val as *const u64 as *const libc::c_void, 8) };
    if ret < 0 {
        return Err(Error::syscall("eventfd write"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn notify_and_clear() {
        let poller = Poller::new().unwrap();
        let mut notify = NotifyFd::new().unwrap();
        notify.bind(&poller).unwrap();

        assert!(!notify.try_read().unwrap());

        notify.notify().unwrap();
        notify.notify().unwrap();

        let mut events = Vec::new();
        let n = poller
            .poll(&mut events, 16, Duration::from_millis(500))
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(events[0].tag(), notify.tag());

        // Both notifies collapse into one counter read.
        assert!(notify.try_read().unwrap());
        assert!(!notify.try_read().unwrap());
    }
}

//! Pollable MPSC queues for cross-thread submissions.
//!
//! Each queue pairs a lock-free multi-producer channel with its own
//! [`NotifyFd`] registered in the owning reactor's poller. Producers
//! enqueue and then notify, in that order, so a push that has completed is
//! always observed by the consumer's current or next wake.

use std::os::fd::RawFd;

use crossbeam_channel::{Receiver, Sender};

use crate::error::Error;
use crate::notify::{notify_raw, NotifyFd};
use crate::poller::{Poller, Tag};

/// Consumer side of a pollable queue. Owned by one reactor; drained to
/// empty on every wake.
pub struct PollableQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    notify: NotifyFd,
}

impl<T: Send> PollableQueue<T> {
    pub fn new() -> Result<PollableQueue<T>, Error> {
        let (tx, rx) = crossbeam_channel::unbounded();
        Ok(PollableQueue {
            tx,
            rx,
            notify: NotifyFd::new()?,
        })
    }

    /// Register the queue's notify descriptor with the poller.
    pub fn bind(&mut self, poller: &Poller) -> Result<Tag, Error> {
        self.notify.bind(poller)
    }

    pub fn tag(&self) -> Tag {
        self.notify.tag()
    }

    /// A cloneable producer handle usable from any thread.
    pub fn sender(&self) -> QueueSender<T> {
        QueueSender {
            tx: self.tx.clone(),
            notify_fd: self.notify.fd(),
        }
    }

    /// Next entry, or `None` when the queue is empty.
    pub fn pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Clear the wake counter. Done before draining entries so a notify
    /// racing with the drain produces a fresh event.
    pub fn acknowledge(&self) -> Result<(), Error> {
        while self.notify.try_read()? {}
        Ok(())
    }
}

/// Producer handle for a [`PollableQueue`].
pub struct QueueSender<T> {
    tx: Sender<T>,
    notify_fd: RawFd,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        QueueSender {
            tx: self.tx.clone(),
            notify_fd: self.notify_fd,
        }
    }
}

impl<T: Send> QueueSender<T> {
    /// Enqueue `item` and wake the owning reactor.
    pub fn push(&self, item: T) -> Result<(), Error> {
        self.tx.send(item).map_err(|_| Error::QueueClosed)?;
        // The notify write is ordered after the enqueue; a failure here
        // means the consumer is already gone, which the next push reports.
        let _ = notify_raw(self.notify_fd);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn push_wakes_and_drains() {
        let poller = Poller::new().unwrap();
        let mut queue: PollableQueue<u32> = PollableQueue::new().unwrap();
        queue.bind(&poller).unwrap();

        let sender = queue.sender();
        let producer = std::thread::spawn(move || {
            for i in 0..100u32 {
                sender.push(i).unwrap();
            }
        });
        producer.join().unwrap();

        let mut events = Vec::new();
        let n = poller
            .poll(&mut events, 16, Duration::from_millis(500))
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(events[0].tag(), queue.tag());

        queue.acknowledge().unwrap();
        let mut drained = Vec::new();
        while let Some(item) = queue.pop() {
            drained.push(item);
        }
        assert_eq!(drained, (0..100).collect::<Vec<u32>>());

        // Nothing left, no stray wake.
        events.clear();
        let n = poller
            .poll(&mut events, 16, Duration::from_millis(10))
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn push_after_consumer_drop_errors() {
        let queue: PollableQueue<u32> = PollableQueue::new().unwrap();
        let sender = queue.sender();
        drop(queue);
        assert!(matches!(sender.push(1), Err(Error::QueueClosed)));
    }
}

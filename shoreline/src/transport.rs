//! The reactor transport: per-thread peer ownership, buffered non-blocking
//! writes, timerfd-backed one-shot timers, and cross-thread submission
//! queues.
//!
//! One [`Transport`] runs per reactor thread and owns all of its tables.
//! Direct table access requires `&mut Io`, which only the owning thread
//! ever holds; every other thread goes through a [`Handle`], which can
//! only enqueue work and wake the reactor.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Buf, Bytes};

use crate::config::Config;
use crate::error::Error;
use crate::handler::Handler;
use crate::metrics;
use crate::notify::{notify_raw, NotifyFd};
use crate::peer::Peer;
use crate::poller::{Event, Interest, Mode, Poller, Tag};
use crate::queue::{PollableQueue, QueueSender};

/// Size of the per-turn incoming scratch buffer. A single readiness turn
/// accumulates at most this many bytes before delivery.
pub const MAX_BUFFER: usize = 16 * 1024;

/// One-shot completion for an asynchronous write; resolves with the total
/// number of bytes delivered.
pub type WriteCompletion = Box<dyn FnOnce(Result<u64, Error>) + Send>;

/// One-shot completion for a timer; resolves with the wake-up count read
/// from the timer descriptor.
pub type TimerCompletion = Box<dyn FnOnce(Result<u64, Error>) + Send>;

/// One-shot completion for a reactor load query.
pub type LoadCompletion = Box<dyn FnOnce(Result<ThreadUsage, Error>) + Send>;

/// CPU time consumed by a reactor thread, from `getrusage(RUSAGE_THREAD)`.
#[derive(Debug, Clone, Copy)]
pub struct ThreadUsage {
    pub user: Duration,
    pub system: Duration,
}

impl ThreadUsage {
    fn from_rusage(usage: &libc::rusage) -> ThreadUsage {
        fn timeval(tv: &libc::timeval) -> Duration {
            Duration::new(tv.tv_sec as u64, (tv.tv_usec as u32) * 1_000)
        }
        ThreadUsage {
            user: timeval(&usage.ru_utime),
            system: timeval(&usage.ru_stime),
        }
    }
}

/// Outbound payload: owned bytes, or a file segment sent with
/// `sendfile(2)`.
pub enum Payload {
    Raw(Bytes),
    File {
        fd: RawFd,
        offset: u64,
        len: usize,
    },
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Payload::Raw(bytes) => bytes.len(),
            Payload::File { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the first `n` bytes: the detach step when a partial write is
    /// stashed. A raw payload advances its view; a file payload advances
    /// its offset only.
    fn advance(&mut self, n: usize) {
        match self {
            Payload::Raw(bytes) => bytes.advance(n),
            Payload::File { offset, len, .. } => {
                *offset += n as u64;
                *len -= n;
            }
        }
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Payload {
        Payload::Raw(bytes)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Payload {
        Payload::Raw(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for Payload {
    fn from(bytes: &'static [u8]) -> Payload {
        Payload::Raw(Bytes::from_static(bytes))
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Payload {
        Payload::Raw(Bytes::from(s))
    }
}

/// The single buffered write allowed per descriptor while its socket is
/// unwritable.
struct WriteEntry {
    payload: Payload,
    flags: libc::c_int,
    /// Bytes already accepted by the kernel for this submission.
    done: u64,
    completion: WriteCompletion,
}

struct TimerEntry {
    active: bool,
    completion: TimerCompletion,
}

struct WriteRequest {
    fd: RawFd,
    payload: Payload,
    flags: libc::c_int,
    completion: WriteCompletion,
}

struct TimerRequest {
    fd: RawFd,
    value: Duration,
    completion: TimerCompletion,
}

struct PeerRequest {
    fd: RawFd,
    addr: SocketAddr,
}

/// Create a non-blocking monotonic timer descriptor for use with
/// [`Io::arm_timer`]. The caller owns the descriptor and may re-arm it
/// after it fires.
pub fn create_timerfd() -> Result<RawFd, Error> {
    let fd = unsafe {
        libc::timerfd_create(
            libc::CLOCK_MONOTONIC,
            libc::TFD_NONBLOCK | libc::TFD_CLOEXEC,
        )
    };
    if fd < 0 {
        return Err(Error::syscall("timerfd_create"));
    }
    Ok(fd)
}

// ── Io: reactor-thread state ────────────────────────────────────────────

/// The reactor-thread face of the transport. Handlers receive `&mut Io`
/// in every callback and use it to write, arm timers, or close peers.
pub struct Io {
    poller: Poller,
    peers: HashMap<RawFd, Arc<Peer>>,
    pending_writes: HashMap<RawFd, WriteEntry>,
    timers: HashMap<RawFd, TimerEntry>,
    writes_q: PollableQueue<WriteRequest>,
    timers_q: PollableQueue<TimerRequest>,
    peers_q: PollableQueue<PeerRequest>,
    notifier: NotifyFd,
    load_request: Arc<Mutex<Option<LoadCompletion>>>,
    deferred_close: Vec<RawFd>,
    /// Peers torn down during the current dispatch turn; later events in
    /// the same batch for these fds are stale, not unknown.
    closed_this_turn: Vec<RawFd>,
}

impl Io {
    fn new() -> Result<Io, Error> {
        let poller = Poller::new()?;
        let mut writes_q = PollableQueue::new()?;
        writes_q.bind(&poller)?;
        let mut timers_q = PollableQueue::new()?;
        timers_q.bind(&poller)?;
        let mut peers_q = PollableQueue::new()?;
        peers_q.bind(&poller)?;
        let mut notifier = NotifyFd::new()?;
        notifier.bind(&poller)?;

        Ok(Io {
            poller,
            peers: HashMap::new(),
            pending_writes: HashMap::new(),
            timers: HashMap::new(),
            writes_q,
            timers_q,
            peers_q,
            notifier,
            load_request: Arc::new(Mutex::new(None)),
            deferred_close: Vec::new(),
            closed_this_turn: Vec::new(),
        })
    }

    /// A cloneable cross-thread handle to this reactor.
    pub fn handle(&self) -> Handle {
        Handle {
            writes: self.writes_q.sender(),
            timers: self.timers_q.sender(),
            peers: self.peers_q.sender(),
            notify_fd: self.notifier.fd(),
            load_request: self.load_request.clone(),
        }
    }

    pub fn peer(&self, fd: RawFd) -> Option<&Arc<Peer>> {
        self.peers.get(&fd)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Whether a buffered write is currently draining on `fd`.
    pub fn has_pending_write(&self, fd: RawFd) -> bool {
        self.pending_writes.contains_key(&fd)
    }

    /// Write `payload` to `fd`, buffering the remainder if the socket
    /// would block. At most one write may be in flight per descriptor;
    /// submitting a second while one is pending is a programmer error.
    ///
    /// `completion` resolves exactly once with the total bytes delivered,
    /// or rejects with the failing syscall.
    pub fn async_write(
        &mut self,
        fd: RawFd,
        payload: impl Into<Payload>,
        flags: libc::c_int,
        completion: impl FnOnce(Result<u64, Error>) + Send + 'static,
    ) -> Result<(), Error> {
        self.submit_write(WriteRequest {
            fd,
            payload: payload.into(),
            flags,
            completion: Box::new(completion),
        })
    }

    /// Arm `fd` (a timer descriptor) to fire once after `value`.
    ///
    /// Durations under one second are programmed with nanosecond
    /// precision; from one second up, only whole seconds are kept and the
    /// remainder is dropped. Arming an already-armed descriptor rejects
    /// the completion with [`Error::TimerAlreadyArmed`].
    pub fn arm_timer(
        &mut self,
        fd: RawFd,
        value: Duration,
        completion: impl FnOnce(Result<u64, Error>) + Send + 'static,
    ) -> Result<(), Error> {
        self.arm_timer_impl(TimerRequest {
            fd,
            value,
            completion: Box::new(completion),
        })
    }

    /// Suppress a pending fire. The entry is still removed when the
    /// descriptor next becomes readable; its completion is never invoked.
    ///
    /// # Panics
    ///
    /// Panics if no timer is armed for `fd`.
    pub fn disarm_timer(&mut self, fd: RawFd) {
        match self.timers.get_mut(&fd) {
            Some(entry) => entry.active = false,
            None => panic!("timer has not been armed for fd {fd}"),
        }
    }

    /// Close a peer from the local side. The teardown (disconnection
    /// callback, table erase, descriptor close) runs at the end of a
    /// dispatch turn, once no write remains buffered for the peer.
    pub fn close_peer(&mut self, fd: RawFd) {
        if !self.deferred_close.contains(&fd) {
            self.deferred_close.push(fd);
        }
    }

    fn submit_write(&mut self, req: WriteRequest) -> Result<(), Error> {
        if self.pending_writes.contains_key(&req.fd) {
            panic!("a write is already pending on fd {}", req.fd);
        }
        let entry = WriteEntry {
            payload: req.payload,
            flags: req.flags,
            done: 0,
            completion: req.completion,
        };
        self.write_impl(req.fd, entry)
    }

    /// Tight write loop. On would-block the remainder is detached into
    /// `pending_writes` and the descriptor armed for write readiness; the
    /// writable-event path re-enters here with the stored entry.
    fn write_impl(&mut self, fd: RawFd, mut entry: WriteEntry) -> Result<(), Error> {
        loop {
            if entry.payload.is_empty() {
                (entry.completion)(Ok(entry.done));
                return Ok(());
            }

            let (n, op) = match &entry.payload {
                Payload::Raw(bytes) => {
                    let n = unsafe {
                        libc::send(
                            fd,
                            bytes.as_ptr() as *const libc::c_void,
                            bytes.len(),
                            entry.flags,
                        )
                    };
                    (n, "send")
                }
                Payload::File {
                    fd: src_fd,
                    offset,
                    len,
                } => {
                    let mut off = *offset as libc::off_t;
                    let n = unsafe { libc::sendfile(fd, *src_fd, &mut off, *len) };
                    (n, "sendfile")
                }
            };

            if n < 0 {
                let err = io::Error::last_os_error();
                match err.kind() {
                    io::ErrorKind::WouldBlock => {
                        self.pending_writes.insert(fd, entry);
                        metrics::WRITES_BUFFERED.increment();
                        self.poller.modify(
                            fd,
                            Interest::READ | Interest::WRITE | Interest::SHUTDOWN,
                            Tag::from(fd),
                            Mode::Edge,
                        )?;
                    }
                    io::ErrorKind::Interrupted => continue,
                    _ => {
                        (entry.completion)(Err(Error::Syscall { op, source: err }));
                    }
                }
                return Ok(());
            }

            metrics::BYTES_SENT.add(n as u64);
            entry.done += n as u64;
            entry.payload.advance(n as usize);
        }
    }

    fn arm_timer_impl(&mut self, req: TimerRequest) -> Result<(), Error> {
        if self.timers.contains_key(&req.fd) {
            (req.completion)(Err(Error::TimerAlreadyArmed));
            return Ok(());
        }

        let mut spec: libc::itimerspec = unsafe { std::mem::zeroed() };
        if req.value < Duration::from_secs(1) {
            // A zero it_value would disarm the descriptor outright.
            spec.it_value.tv_nsec = (req.value.as_nanos() as libc::c_long).max(1);
        } else {
            spec.it_value.tv_sec = req.value.as_secs() as libc::time_t;
        }

        let ret = unsafe { libc::timerfd_settime(req.fd, 0, &spec, std::ptr::null_mut()) };
        if ret == -1 {
            (req.completion)(Err(Error::syscall("timerfd_settime")));
            return Ok(());
        }

        self.poller
            .add_oneshot(req.fd, Interest::READ, Tag::from(req.fd), Mode::Edge)?;
        self.timers.insert(
            req.fd,
            TimerEntry {
                active: true,
                completion: req.completion,
            },
        );
        Ok(())
    }
}

// ── Handle: the cross-thread face ───────────────────────────────────────

/// Cloneable cross-thread handle to one reactor. Every operation enqueues
/// onto the reactor's pollable queues and wakes it; nothing is mutated
/// from the calling thread.
#[derive(Clone)]
pub struct Handle {
    writes: QueueSender<WriteRequest>,
    timers: QueueSender<TimerRequest>,
    peers: QueueSender<PeerRequest>,
    notify_fd: RawFd,
    load_request: Arc<Mutex<Option<LoadCompletion>>>,
}

impl Handle {
    /// Submit a write; the reactor runs the same path as
    /// [`Io::async_write`] on its next wake.
    pub fn async_write(
        &self,
        fd: RawFd,
        payload: impl Into<Payload>,
        flags: libc::c_int,
        completion: impl FnOnce(Result<u64, Error>) + Send + 'static,
    ) -> Result<(), Error> {
        self.writes.push(WriteRequest {
            fd,
            payload: payload.into(),
            flags,
            completion: Box::new(completion),
        })
    }

    /// Submit a timer to be armed on the reactor thread.
    pub fn arm_timer(
        &self,
        fd: RawFd,
        value: Duration,
        completion: impl FnOnce(Result<u64, Error>) + Send + 'static,
    ) -> Result<(), Error> {
        self.timers.push(TimerRequest {
            fd,
            value,
            completion: Box::new(completion),
        })
    }

    /// Hand a freshly-accepted connection to the reactor for admission.
    pub fn add_peer(&self, fd: RawFd, addr: SocketAddr) -> Result<(), Error> {
        self.peers.push(PeerRequest { fd, addr })
    }

    /// Ask the reactor for its thread's CPU usage.
    pub fn load(
        &self,
        completion: impl FnOnce(Result<ThreadUsage, Error>) + Send + 'static,
    ) -> Result<(), Error> {
        *self.load_request.lock().unwrap() = Some(Box::new(completion));
        self.wake()
    }

    /// Wake the reactor without submitting work.
    pub fn wake(&self) -> Result<(), Error> {
        notify_raw(self.notify_fd)
    }
}

// ── Transport: the event loop ───────────────────────────────────────────

/// One reactor: a poller, the tables behind it, and the handler that
/// consumes its events.
pub struct Transport<H: Handler> {
    io: Io,
    handler: H,
    events: Vec<Event>,
    poll_timeout: Duration,
    max_events: usize,
    shutdown: Arc<AtomicBool>,
}

impl<H: Handler> Transport<H> {
    pub fn new(handler: H, config: &Config, shutdown: Arc<AtomicBool>) -> Result<Self, Error> {
        Ok(Transport {
            io: Io::new()?,
            handler,
            events: Vec::new(),
            poll_timeout: config.poll_timeout,
            max_events: config.max_events,
            shutdown,
        })
    }

    pub fn handle(&self) -> Handle {
        self.io.handle()
    }

    /// Run the reactor until the shutdown flag is raised. Blocks the
    /// current thread; scaffolding failures (poller registration, queue
    /// plumbing) abort the loop with an error.
    pub fn run(&mut self) -> Result<(), Error> {
        loop {
            self.io.closed_this_turn.clear();
            self.events.clear();
            self.io
                .poller
                .poll(&mut self.events, self.max_events, self.poll_timeout)?;

            let mut i = 0;
            while i < self.events.len() {
                let event = self.events[i];
                self.dispatch(event)?;
                i += 1;
            }

            self.flush_deferred_closes();

            if self.shutdown.load(Ordering::Acquire) {
                self.run_shutdown();
                return Ok(());
            }
        }
    }

    fn dispatch(&mut self, event: Event) -> Result<(), Error> {
        if event.tag() == self.io.writes_q.tag() {
            return self.handle_write_queue();
        }
        if event.tag() == self.io.timers_q.tag() {
            return self.handle_timer_queue();
        }
        if event.tag() == self.io.peers_q.tag() {
            return self.handle_peer_queue();
        }
        if event.tag() == self.io.notifier.tag() {
            return self.handle_notify();
        }

        let fd = event.tag().fd();
        if self.io.closed_this_turn.contains(&fd) {
            // Stale event for a peer torn down earlier in this batch.
            return Ok(());
        }

        let mut handled = false;
        if event.is_readable() || event.is_shutdown() || event.is_hangup() {
            if let Some(peer) = self.io.peers.get(&fd).cloned() {
                self.handle_incoming(&peer);
            } else if self.io.timers.contains_key(&fd) {
                self.handle_timer(fd);
            } else {
                panic!("unknown descriptor on readiness event: fd {fd}");
            }
            handled = true;
        }

        if event.is_writable() && !self.io.closed_this_turn.contains(&fd) {
            match self.io.pending_writes.remove(&fd) {
                Some(entry) => {
                    self.io.poller.modify(
                        fd,
                        Interest::READ | Interest::SHUTDOWN,
                        Tag::from(fd),
                        Mode::Edge,
                    )?;
                    self.io.write_impl(fd, entry)?;
                    // Tell the handler once the slot is free again so it
                    // can submit a queued follow-up write.
                    if !self.io.pending_writes.contains_key(&fd) {
                        if let Some(peer) = self.io.peers.get(&fd).cloned() {
                            self.handler.on_write_drained(&mut self.io, &peer);
                        }
                    }
                }
                None if !handled => panic!("no pending write for writable fd {fd}"),
                None => {}
            }
        }

        Ok(())
    }

    /// Admit a peer: table insert, poller registration, connection
    /// callback. Registration happens before the callback so the peer
    /// table invariant (every owned fd is registered) holds inside it and
    /// so writes issued from the callback can arm write interest.
    fn handle_peer(&mut self, peer: Arc<Peer>) -> Result<(), Error> {
        let fd = peer.fd();
        self.io.peers.insert(fd, peer.clone());
        metrics::CONNECTIONS_ACCEPTED.increment();
        metrics::CONNECTIONS_ACTIVE.increment();
        self.io.poller.add(
            fd,
            Interest::READ | Interest::SHUTDOWN,
            Tag::from(fd),
            Mode::Edge,
        )?;
        self.handler.on_connection(&mut self.io, &peer);
        Ok(())
    }

    /// Drain the peer's socket into the scratch buffer and deliver once
    /// would-block is observed. The loop only exits on would-block,
    /// closure, or a full buffer; a partial read does not guarantee
    /// another wake-up in edge mode.
    fn handle_incoming(&mut self, peer: &Arc<Peer>) {
        let mut buffer = [0u8; MAX_BUFFER];
        let mut total = 0usize;
        let fd = peer.fd();

        loop {
            let n = unsafe {
                libc::recv(
                    fd,
                    buffer.as_mut_ptr().add(total) as *mut libc::c_void,
                    MAX_BUFFER - total,
                    0,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                match err.kind() {
                    io::ErrorKind::WouldBlock => {
                        if total > 0 {
                            metrics::BYTES_RECEIVED.add(total as u64);
                            self.handler.on_input(&mut self.io, &buffer[..total], peer);
                        }
                    }
                    io::ErrorKind::Interrupted => continue,
                    io::ErrorKind::ConnectionReset => self.handle_disconnection(peer),
                    _ => {
                        // Fatal for this peer only; the reactor keeps going.
                        eprintln!("shoreline: recv from {peer}: {err}");
                        self.handle_disconnection(peer);
                    }
                }
                break;
            } else if n == 0 {
                self.handle_disconnection(peer);
                break;
            } else {
                total += n as usize;
                if total >= MAX_BUFFER {
                    metrics::OVERSIZED_READS.increment();
                    eprintln!("shoreline: dropping oversized read from {peer}");
                    break;
                }
            }
        }
    }

    fn handle_disconnection(&mut self, peer: &Arc<Peer>) {
        self.handler.on_disconnection(&mut self.io, peer);

        let fd = peer.fd();
        if self.io.peers.remove(&fd).is_none() {
            panic!("no peer entry to erase for fd {fd}");
        }
        // Closing tears down any write still buffered for this peer.
        if let Some(entry) = self.io.pending_writes.remove(&fd) {
            (entry.completion)(Err(Error::PeerGone));
        }
        self.io.closed_this_turn.push(fd);
        unsafe {
            libc::close(fd);
        }
        metrics::CONNECTIONS_CLOSED.increment();
        metrics::CONNECTIONS_ACTIVE.decrement();
    }

    /// One-shot timer fire. A disarmed entry is dropped without
    /// resolving; a spurious wake leaves the timer armed for its real
    /// expiry.
    fn handle_timer(&mut self, fd: RawFd) {
        let mut wakeups: u64 = 0;
        let ret = unsafe {
            libc::read(fd, &mut wakeups as *mut u64 as *mut libc::c_void, 8)
        };

        if ret == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                // Spurious wake. This event consumed the one-shot
                // registration, so re-arm delivery and keep the entry.
                let _ = self
                    .io
                    .poller
                    .modify(fd, Interest::READ, Tag::from(fd), Mode::Edge);
                return;
            }
            let entry = self
                .io
                .timers
                .remove(&fd)
                .expect("timer entry for readable timer fd");
            let _ = self.io.poller.remove(fd);
            (entry.completion)(Err(Error::Syscall {
                op: "timerfd read",
                source: err,
            }));
            return;
        }

        // The registration goes with the entry so the descriptor can be
        // re-armed with a fresh one-shot add.
        let entry = self
            .io
            .timers
            .remove(&fd)
            .expect("timer entry for readable timer fd");
        let _ = self.io.poller.remove(fd);

        if entry.active {
            (entry.completion)(Ok(wakeups));
        }
    }

    fn handle_write_queue(&mut self) -> Result<(), Error> {
        self.io.writes_q.acknowledge()?;
        while let Some(req) = self.io.writes_q.pop() {
            self.io.submit_write(req)?;
        }
        Ok(())
    }

    fn handle_timer_queue(&mut self) -> Result<(), Error> {
        self.io.timers_q.acknowledge()?;
        while let Some(req) = self.io.timers_q.pop() {
            self.io.arm_timer_impl(req)?;
        }
        Ok(())
    }

    fn handle_peer_queue(&mut self) -> Result<(), Error> {
        self.io.peers_q.acknowledge()?;
        while let Some(req) = self.io.peers_q.pop() {
            let peer = Arc::new(Peer::new(req.fd, req.addr));
            self.handle_peer(peer)?;
        }
        Ok(())
    }

    fn handle_notify(&mut self) -> Result<(), Error> {
        while self.io.notifier.try_read()? {}

        if let Some(completion) = self.io.load_request.lock().unwrap().take() {
            let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
            let ret = unsafe { libc::getrusage(libc::RUSAGE_THREAD, &mut usage) };
            if ret == -1 {
                completion(Err(Error::syscall("getrusage")));
            } else {
                completion(Ok(ThreadUsage::from_rusage(&usage)));
            }
        }
        Ok(())
    }

    fn flush_deferred_closes(&mut self) {
        let mut still_draining = Vec::new();
        while let Some(fd) = self.io.deferred_close.pop() {
            if self.io.pending_writes.contains_key(&fd) {
                // A buffered write is still going out; close once it
                // completes.
                still_draining.push(fd);
                continue;
            }
            if let Some(peer) = self.io.peers.get(&fd).cloned() {
                self.handle_disconnection(&peer);
            }
        }
        self.io.deferred_close = still_draining;
    }

    fn run_shutdown(&mut self) {
        let peers: Vec<Arc<Peer>> = self.io.peers.values().cloned().collect();
        for peer in peers {
            self.handle_disconnection(&peer);
        }
    }
}

//! Worker launch and shutdown plumbing.

use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::acceptor::{create_listener, run_acceptor, AcceptorConfig};
use crate::config::Config;
use crate::error::Error;
use crate::handler::Handler;
use crate::transport::{Handle, Transport};

/// Result type for `ServerBuilder::launch`.
type LaunchResult = Result<(ShutdownHandle, Vec<thread::JoinHandle<Result<(), Error>>>), Error>;

/// Handle returned by `launch()` to trigger graceful shutdown.
pub struct ShutdownHandle {
    shutdown_flag: Arc<AtomicBool>,
    workers: Vec<Handle>,
    listen_fd: Option<RawFd>,
    listen_fd_closed: Option<Arc<AtomicBool>>,
}

impl ShutdownHandle {
    /// Per-reactor cross-thread handles, in worker order. External
    /// threads can use these to submit writes or timers.
    pub fn worker_handles(&self) -> &[Handle] {
        &self.workers
    }

    /// Signal all reactors to shut down gracefully.
    ///
    /// Closes the listen fd to unblock the acceptor, raises the flag, and
    /// wakes every reactor so the flag is observed promptly. Each reactor
    /// tears down its remaining peers and exits `run()` with `Ok(())`.
    pub fn shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Release);
        if let (Some(fd), Some(closed)) = (self.listen_fd, &self.listen_fd_closed) {
            if !closed.swap(true, Ordering::AcqRel) {
                unsafe {
                    libc::close(fd);
                }
            }
        }
        for handle in &self.workers {
            let _ = handle.wake();
        }
    }
}

/// Builder for launching reactor threads with an optional listener.
///
/// Create a builder with [`ServerBuilder::new`], call
/// [`.bind(addr)`](Self::bind) to accept inbound connections, then
/// [`.launch(handler)`](Self::launch) to start the reactors. Without a
/// bind address no listener or acceptor thread is created; peers are then
/// submitted through [`Handle::add_peer`](crate::Handle::add_peer).
pub struct ServerBuilder {
    config: Config,
    bind_addr: Option<SocketAddr>,
}

impl ServerBuilder {
    pub fn new(config: Config) -> ServerBuilder {
        ServerBuilder {
            config,
            bind_addr: None,
        }
    }

    /// Set the bind address for the TCP listener.
    pub fn bind(mut self, addr: SocketAddr) -> ServerBuilder {
        self.bind_addr = Some(addr);
        self
    }

    /// Launch one transport per reactor thread. `prototype` supplies each
    /// worker's handler instance via
    /// [`Handler::create_for_worker`](crate::Handler::create_for_worker).
    pub fn launch<H: Handler>(self, prototype: H) -> LaunchResult {
        self.config.validate()?;

        let num_threads = if self.config.threads == 0 {
            num_cpus()
        } else {
            self.config.threads
        };

        let shutdown_flag = Arc::new(AtomicBool::new(false));

        // Build every transport up front so the acceptor can hold all the
        // handles before the first connection arrives.
        let mut transports = Vec::with_capacity(num_threads);
        for worker_id in 0..num_threads {
            let handler = prototype.create_for_worker(worker_id);
            let transport = Transport::new(handler, &self.config, shutdown_flag.clone())?;
            transports.push(transport);
        }
        let workers: Vec<Handle> = transports.iter().map(|t| t.handle()).collect();

        let (listen_fd, listen_fd_closed) = if let Some(addr) = self.bind_addr {
            let fd = create_listener(addr, self.config.backlog)?;
            let closed = Arc::new(AtomicBool::new(false));

            let acceptor_config = AcceptorConfig {
                listen_fd: fd,
                workers: workers.clone(),
                tcp_nodelay: self.config.tcp_nodelay,
            };

            let acceptor_closed = closed.clone();
            thread::Builder::new()
                .name("shoreline-acceptor".to_string())
                .spawn(move || {
                    run_acceptor(acceptor_config);
                    if !acceptor_closed.swap(true, Ordering::AcqRel) {
                        unsafe {
                            libc::close(fd);
                        }
                    }
                })
                .map_err(Error::Io)?;

            (Some(fd), Some(closed))
        } else {
            (None, None)
        };

        let mut handles = Vec::with_capacity(num_threads);
        for (worker_id, mut transport) in transports.into_iter().enumerate() {
            let pin = self
                .config
                .pin_to_core
                .then_some(self.config.core_offset + worker_id);
            let handle = thread::Builder::new()
                .name(format!("shoreline-worker-{worker_id}"))
                .spawn(move || {
                    if let Some(core) = pin {
                        pin_to_core(core)?;
                    }
                    transport.run()
                })
                .map_err(Error::Io)?;
            handles.push(handle);
        }

        let shutdown_handle = ShutdownHandle {
            shutdown_flag,
            workers,
            listen_fd,
            listen_fd_closed,
        };

        Ok((shutdown_handle, handles))
    }
}

/// Pin the current thread to a specific CPU core.
fn pin_to_core(core: usize) -> Result<(), Error> {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core, &mut set);
        let ret = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
        if ret != 0 {
            return Err(Error::syscall("sched_setaffinity"));
        }
    }
    Ok(())
}

/// Number of online CPU cores.
pub fn num_cpus() -> usize {
    let ret = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if ret < 1 {
        1
    } else {
        ret as usize
    }
}

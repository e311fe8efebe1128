use std::io;

use thiserror::Error;

/// Errors returned by the shoreline reactor.
#[derive(Debug, Error)]
pub enum Error {
    /// A syscall failed; carries the operation name and errno.
    #[error("{op}: {source}")]
    Syscall {
        op: &'static str,
        source: io::Error,
    },
    /// I/O error without a more specific operation context.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// A timer was armed while an entry for its descriptor already exists.
    #[error("timer is already armed")]
    TimerAlreadyArmed,
    /// The peer went away before the operation could complete.
    #[error("peer is gone")]
    PeerGone,
    /// A cross-thread submission found the receiving reactor gone.
    #[error("queue disconnected")]
    QueueClosed,
    /// Invalid configuration value.
    #[error("config: {0}")]
    Config(String),
}

impl Error {
    /// Capture `errno` for a failed syscall.
    pub(crate) fn syscall(op: &'static str) -> Self {
        Error::Syscall {
            op,
            source: io::Error::last_os_error(),
        }
    }
}

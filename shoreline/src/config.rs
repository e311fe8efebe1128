//! Reactor configuration.

use std::time::Duration;

use crate::error::Error;

/// Configuration for a set of reactor threads.
#[derive(Clone)]
pub struct Config {
    /// Number of reactor threads. `0` means one per online CPU.
    pub threads: usize,
    /// TCP listen backlog.
    pub backlog: i32,
    /// Set `TCP_NODELAY` on accepted connections.
    pub tcp_nodelay: bool,
    /// Upper bound on one blocking poll; also the cadence at which a
    /// reactor notices the shutdown flag without being woken.
    pub poll_timeout: Duration,
    /// Maximum readiness events consumed per poll turn.
    pub max_events: usize,
    /// Pin each reactor thread to a CPU core.
    pub pin_to_core: bool,
    /// First core used when pinning; worker `i` goes to
    /// `core_offset + i`.
    pub core_offset: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            threads: 2,
            backlog: 1024,
            tcp_nodelay: true,
            poll_timeout: Duration::from_millis(500),
            max_events: 1024,
            pin_to_core: false,
            core_offset: 0,
        }
    }
}

impl Config {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), Error> {
        if self.backlog <= 0 {
            return Err(Error::Config("backlog must be positive".into()));
        }
        if self.max_events == 0 {
            return Err(Error::Config("max_events must be positive".into()));
        }
        if self.poll_timeout.is_zero() {
            return Err(Error::Config("poll_timeout must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_max_events() {
        let config = Config {
            max_events: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}

//! Session configuration
//!
//! Tunables for the context pool and the chunked I/O paths.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmbConfig {
    /// Largest single read request sent to the server
    pub max_read_size: u64,
    /// Largest single write request sent to the server
    pub max_write_size: u64,
    /// How long an unreferenced context stays warm before teardown
    pub idle_ttl: Duration,
    /// Polling cadence for directory watchers
    pub watch_interval: Duration,
}

impl Default for SmbConfig {
    fn default() -> Self {
        Self {
            max_read_size: 8 * 1024 * 1024,  // 8 MiB
            max_write_size: 8 * 1024 * 1024, // 8 MiB
            idle_ttl: Duration::from_secs(30),
            watch_interval: Duration::from_millis(500),
        }
    }
}

impl SmbConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the read chunk ceiling
    pub fn max_read_size(mut self, bytes: u64) -> Self {
        self.max_read_size = bytes;
        self
    }

    /// Set the write chunk ceiling
    pub fn max_write_size(mut self, bytes: u64) -> Self {
        self.max_write_size = bytes;
        self
    }

    /// Set the idle teardown grace period
    pub fn idle_ttl(mut self, ttl: Duration) -> Self {
        self.idle_ttl = ttl;
        self
    }

    /// Set the watcher polling cadence
    pub fn watch_interval(mut self, interval: Duration) -> Self {
        self.watch_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SmbConfig::default();
        assert_eq!(config.max_read_size, 8 * 1024 * 1024);
        assert_eq!(config.max_write_size, 8 * 1024 * 1024);
        assert_eq!(config.idle_ttl, Duration::from_secs(30));
    }

    #[test]
    fn test_builder() {
        let config = SmbConfig::new()
            .max_read_size(1024)
            .idle_ttl(Duration::from_secs(5));
        assert_eq!(config.max_read_size, 1024);
        assert_eq!(config.idle_ttl, Duration::from_secs(5));
    }
}

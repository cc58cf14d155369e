//! Runtime settings for the reassembly server.
//!
//! [`ReassemblerConfig`] bounds every timer and buffer the server owns.
//! Build one through [`ReassemblerConfig::builder`]; zero durations and
//! sizes are rejected because tokio intervals panic on zero periods and a
//! zero-length receive buffer would truncate every datagram.

use std::time::Duration;

use thiserror::Error;

/// Largest UDP payload carried over IPv4.
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// Errors raised while validating configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A duration setting was zero.
    #[error("{name} must be greater than zero")]
    ZeroDuration {
        /// Setting name.
        name: &'static str,
    },
    /// The receive buffer size was zero.
    #[error("receive buffer size must be greater than zero")]
    ZeroBuffer,
}

/// Validated timer and buffer settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReassemblerConfig {
    cache_ttl: Duration,
    sweep_interval: Duration,
    grace_period: Duration,
    recv_buffer_size: usize,
}

impl Default for ReassemblerConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(1),
            grace_period: Duration::from_secs(30),
            recv_buffer_size: MAX_UDP_PAYLOAD,
        }
    }
}

impl ReassemblerConfig {
    /// Start from the default settings.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use udp_reassembler::ReassemblerConfig;
    ///
    /// let config = ReassemblerConfig::builder()
    ///     .grace_period(Duration::from_secs(10))
    ///     .build()
    ///     .expect("valid config");
    /// assert_eq!(config.grace_period(), Duration::from_secs(10));
    /// ```
    #[must_use]
    pub fn builder() -> ConfigBuilder { ConfigBuilder::default() }

    /// How long a staged fragment suppresses retransmitted copies.
    #[must_use]
    pub const fn cache_ttl(&self) -> Duration { self.cache_ttl }

    /// Time between cleanup sweeps.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration { self.sweep_interval }

    /// Age beyond which an incomplete message is evicted.
    #[must_use]
    pub const fn grace_period(&self) -> Duration { self.grace_period }

    /// Size of the datagram receive buffer.
    #[must_use]
    pub const fn recv_buffer_size(&self) -> usize { self.recv_buffer_size }
}

/// Builder for [`ReassemblerConfig`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ConfigBuilder {
    config: ReassemblerConfig,
}

impl ConfigBuilder {
    /// Set the duplicate suppression window.
    #[must_use]
    pub const fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl = ttl;
        self
    }

    /// Set the sweep interval.
    #[must_use]
    pub const fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    /// Set the grace period for incomplete messages.
    #[must_use]
    pub const fn grace_period(mut self, grace: Duration) -> Self {
        self.config.grace_period = grace;
        self
    }

    /// Set the receive buffer size in bytes.
    #[must_use]
    pub const fn recv_buffer_size(mut self, size: usize) -> Self {
        self.config.recv_buffer_size = size;
        self
    }

    /// Validate and produce the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any duration or the buffer size is zero.
    pub fn build(self) -> Result<ReassemblerConfig, ConfigError> {
        let config = self.config;
        for (name, value) in [
            ("cache TTL", config.cache_ttl),
            ("sweep interval", config.sweep_interval),
            ("grace period", config.grace_period),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration { name });
            }
        }
        if config.recv_buffer_size == 0 {
            return Err(ConfigError::ZeroBuffer);
        }
        Ok(config)
    }
}

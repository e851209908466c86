//! Per-fetch configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Response header a filtering resolver sets on its block page.
pub const DEFAULT_BLOCK_HEADER: &str = "x-dns-filter";

/// Value of [`DEFAULT_BLOCK_HEADER`] that marks a blocked request.
pub const DEFAULT_BLOCK_VALUE: &str = "blocked";

/// Limits applied to a single fetch.
///
/// Deserializes with defaults for missing fields, so it can be embedded in a
/// caller's own configuration file.
///
/// ```rust
/// use ssrf_fetch::FetchConfig;
///
/// let config = FetchConfig::default()
///     .with_timeout_seconds(5)
///     .with_max_bytes(1024 * 1024);
/// assert_eq!(config.max_bytes, 1024 * 1024);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Bound on connecting and on the whole exchange, body included.
    /// Zero is treated as one second.
    pub timeout_seconds: u64,

    /// Hard cap on response body bytes. Must be non-zero.
    pub max_bytes: u64,

    /// Header that signals the resolver itself blocked the request.
    pub block_signal: BlockSignal,
}

impl FetchConfig {
    pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10;
    pub const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_block_signal(mut self, signal: BlockSignal) -> Self {
        self.block_signal = signal;
        self
    }

    /// The timeout as a [`Duration`], never zero.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }

    /// Reject configurations no fetch could honor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `max_bytes` is zero or the block
    /// signal header name is empty.
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_bytes == 0 {
            return Err(Error::InvalidConfig {
                reason: "max_bytes must be greater than zero".to_string(),
            });
        }

        if self.block_signal.header.trim().is_empty() {
            return Err(Error::InvalidConfig {
                reason: "block_signal.header must not be empty".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: Self::DEFAULT_TIMEOUT_SECONDS,
            max_bytes: Self::DEFAULT_MAX_BYTES,
            block_signal: BlockSignal::default(),
        }
    }
}

/// A response header/value pair meaning "blocked by DNS filtering".
///
/// Header names match case-insensitively, values match exactly after
/// trimming surrounding whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockSignal {
    pub header: String,
    pub value: String,
}

impl BlockSignal {
    pub fn new(header: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            value: value.into(),
        }
    }

    /// Whether a header/value pair matches this signal.
    pub fn matches(&self, name: &str, value: &[u8]) -> bool {
        name.eq_ignore_ascii_case(&self.header)
            && std::str::from_utf8(value).is_ok_and(|v| v.trim() == self.value)
    }
}

impl Default for BlockSignal {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_HEADER, DEFAULT_BLOCK_VALUE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FetchConfig::default();
        assert_eq!(config.timeout_seconds, 10);
        assert_eq!(config.max_bytes, 10 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_is_clamped() {
        let config = FetchConfig::default().with_timeout_seconds(0);
        assert_eq!(config.timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_zero_max_bytes_rejected() {
        let config = FetchConfig::default().with_max_bytes(0);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_empty_block_header_rejected() {
        let config = FetchConfig::default().with_block_signal(BlockSignal::new(" ", "x"));
        assert!(matches!(config.validate(), Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: FetchConfig = serde_json::from_str(r#"{"max_bytes": 2048}"#).unwrap();
        assert_eq!(config.max_bytes, 2048);
        assert_eq!(config.timeout_seconds, FetchConfig::DEFAULT_TIMEOUT_SECONDS);
        assert_eq!(config.block_signal, BlockSignal::default());
    }

    #[test]
    fn test_deserialize_block_signal() {
        let config: FetchConfig = serde_json::from_str(
            r#"{"timeout_seconds": 3, "block_signal": {"header": "X-Filtered", "value": "1"}}"#,
        )
        .unwrap();
        assert_eq!(config.timeout(), Duration::from_secs(3));
        assert!(config.block_signal.matches("x-filtered", b"1"));
    }

    #[test]
    fn test_block_signal_matching() {
        let signal = BlockSignal::default();
        assert!(signal.matches("X-DNS-Filter", b"blocked"));
        assert!(signal.matches("x-dns-filter", b" blocked "));
        assert!(!signal.matches("x-dns-filter", b"allowed"));
        assert!(!signal.matches("x-other", b"blocked"));
        assert!(!signal.matches("x-dns-filter", &[0xff, 0xfe]));
    }
}

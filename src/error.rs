//! Error types for ssrf-fetch.

use std::net::IpAddr;
use thiserror::Error;

/// Errors that can occur while validating or fetching a URL.
#[derive(Debug, Error)]
pub enum Error {
    /// The URL was rejected before any network I/O.
    #[error("Unsafe URL: {url} - {reason}")]
    UnsafeUrl { url: String, reason: &'static str },

    /// The address being connected to is forbidden.
    #[error("Private address detected: {host} resolved to {ip}")]
    PrivateAddressDetected { host: String, ip: IpAddr },

    /// DNS resolution failed.
    #[error("DNS error for {host}: {message}")]
    ResolutionFailed { host: String, message: String },

    /// The response carried the DNS-filter block signal.
    #[error("Blocked by DNS filtering: {url}")]
    BlockedByFiltering { url: String },

    /// Declared or actual body size exceeds the limit.
    #[error("Response size exceeds limit of {max} bytes")]
    SizeExceeded { url: String, size: Option<u64>, max: u64 },

    /// The response is malformed in a way a retry won't fix.
    #[error("Invalid response from {url}: {reason}")]
    InvalidResponse { url: String, reason: &'static str },

    /// The fetch configuration is unusable.
    #[error("Invalid config: {reason}")]
    InvalidConfig { reason: String },

    /// Any other network-layer failure (timeout, refused, TLS, body read).
    #[cfg(feature = "fetch")]
    #[error("HTTP error for {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    pub(crate) fn unsafe_url(url: impl Into<String>, reason: &'static str) -> Self {
        Self::UnsafeUrl {
            url: url.into(),
            reason,
        }
    }

    #[cfg(feature = "fetch")]
    pub(crate) fn private_address(host: impl Into<String>, ip: IpAddr) -> Self {
        Self::PrivateAddressDetected {
            host: host.into(),
            ip,
        }
    }

    #[cfg(feature = "fetch")]
    pub(crate) fn resolution_failed(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ResolutionFailed {
            host: host.into(),
            message: message.into(),
        }
    }

    #[cfg(feature = "fetch")]
    pub(crate) fn size_exceeded(url: impl Into<String>, size: Option<u64>, max: u64) -> Self {
        Self::SizeExceeded {
            url: url.into(),
            size,
            max,
        }
    }

    #[cfg(feature = "fetch")]
    pub(crate) fn invalid_response(url: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidResponse {
            url: url.into(),
            reason,
        }
    }

    #[cfg(feature = "fetch")]
    pub(crate) fn transport(
        url: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Transport {
            url: url.into(),
            source: source.into(),
        }
    }

    /// Security rejections are final and must not be retried.
    pub fn is_security_rejection(&self) -> bool {
        matches!(
            self,
            Self::UnsafeUrl { .. } | Self::PrivateAddressDetected { .. }
        )
    }

    /// Whether the caller may reasonably retry the fetch.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ResolutionFailed { .. } => true,
            #[cfg(feature = "fetch")]
            Self::Transport { .. } => true,
            _ => false,
        }
    }

    /// Whether the failure was a timeout at any network stage.
    pub fn is_timeout(&self) -> bool {
        match self {
            #[cfg(feature = "fetch")]
            Self::Transport { source, .. } => chain_has_timeout(&**source),
            _ => false,
        }
    }
}

#[cfg(feature = "fetch")]
fn chain_has_timeout(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(reqwest_err) = err.downcast_ref::<reqwest::Error>() {
            if reqwest_err.is_timeout() {
                return true;
            }
        }
        if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
            if io_err.kind() == std::io::ErrorKind::TimedOut {
                return true;
            }
            // io::Error::source skips the wrapped error itself
            if let Some(inner) = io_err.get_ref() {
                if chain_has_timeout(inner) {
                    return true;
                }
            }
        }
        current = err.source();
    }
    false
}

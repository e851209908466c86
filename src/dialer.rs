//! Connect-time address checks (DNS rebinding defense).
//!
//! A hostname that looked safe during validation can point somewhere else by
//! the time the socket is opened. [`PinnedResolver`] is handed to the HTTP
//! client as its DNS resolver, so the address actually dialed is resolved and
//! classified at the last moment, immediately before the connection.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;

use hickory_resolver::TokioResolver;
use once_cell::sync::OnceCell;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use thiserror::Error;

use crate::classify::forbidden_reason;
use crate::error::Error;

/// Boxed future returned by [`HostLookup::lookup`].
pub type LookupFuture<'a> = Pin<Box<dyn Future<Output = Result<IpAddr, DialError>> + Send + 'a>>;

/// Resolves a hostname to the single address that will be dialed.
///
/// Implementations must be deterministic about which address they return
/// when DNS yields several.
pub trait HostLookup: Send + Sync + 'static {
    fn lookup<'a>(&'a self, host: &'a str) -> LookupFuture<'a>;
}

/// Lookup through the system resolver configuration.
///
/// Uses the first address in the order the resolver returns them; there is
/// no fallback to later records.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLookup;

impl HostLookup for SystemLookup {
    fn lookup<'a>(&'a self, host: &'a str) -> LookupFuture<'a> {
        Box::pin(async move {
            let resolver = TokioResolver::builder_tokio()
                .map_err(|e| DialError::resolution(host, e.to_string()))?
                .build();

            let response = resolver
                .lookup_ip(host)
                .await
                .map_err(|e| DialError::resolution(host, e.to_string()))?;

            response
                .iter()
                .next()
                .ok_or_else(|| DialError::resolution(host, "no IP addresses found"))
        })
    }
}

/// Why the resolver refused to produce an address.
#[derive(Debug, Clone, Error)]
pub enum DialError {
    #[error("refusing to connect to {host} at {ip}: {reason}")]
    Forbidden {
        host: String,
        ip: IpAddr,
        reason: &'static str,
    },

    #[error("failed to resolve {host}: {message}")]
    Resolution { host: String, message: String },

    #[error("resolver for {expected} was asked to resolve {requested}")]
    UnexpectedHost { expected: String, requested: String },
}

impl DialError {
    pub(crate) fn resolution(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resolution {
            host: host.into(),
            message: message.into(),
        }
    }
}

impl From<DialError> for Error {
    fn from(err: DialError) -> Self {
        match err {
            DialError::Forbidden { host, ip, .. } => Error::private_address(host, ip),
            DialError::Resolution { host, message } => Error::resolution_failed(host, message),
            DialError::UnexpectedHost { requested, .. } => Error::unsafe_url(
                requested,
                "connection to a host other than the validated one",
            ),
        }
    }
}

/// A DNS resolver bound to one validated host, built fresh for each fetch.
///
/// Resolves (or parses) the host, classifies the address and hands back only
/// that address. The port is left at zero so the connector keeps the port
/// from the URL.
#[derive(Clone)]
pub struct PinnedResolver {
    host: String,
    lookup: Arc<dyn HostLookup>,
    rejection: Arc<OnceCell<DialError>>,
}

impl PinnedResolver {
    pub fn new(host: impl Into<String>, lookup: Arc<dyn HostLookup>) -> Self {
        Self {
            host: host.into(),
            lookup,
            rejection: Arc::new(OnceCell::new()),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// The first error this resolver produced, if any.
    pub fn rejection(&self) -> Option<&DialError> {
        self.rejection.get()
    }

    /// Resolve the bound host and check the result.
    ///
    /// # Errors
    ///
    /// Returns [`DialError::Resolution`] when the host cannot be resolved and
    /// [`DialError::Forbidden`] when it resolves to a forbidden address.
    pub async fn resolve_checked(&self) -> Result<IpAddr, DialError> {
        let result = self.resolve_inner().await;
        if let Err(ref err) = result {
            let _ = self.rejection.set(err.clone());
        }
        result
    }

    async fn resolve_inner(&self) -> Result<IpAddr, DialError> {
        let ip = match self.host.parse::<IpAddr>() {
            Ok(ip) => ip,
            Err(_) => self.lookup.lookup(&self.host).await?,
        };

        if let Some(reason) = forbidden_reason(ip) {
            tracing::warn!(host = %self.host, %ip, reason, "refusing connection to forbidden address");
            return Err(DialError::Forbidden {
                host: self.host.clone(),
                ip,
                reason,
            });
        }

        tracing::debug!(host = %self.host, %ip, "resolved connection target");
        Ok(ip)
    }

    async fn resolve_name(&self, name: &str) -> Result<IpAddr, DialError> {
        if !name.eq_ignore_ascii_case(&self.host) {
            let err = DialError::UnexpectedHost {
                expected: self.host.clone(),
                requested: name.to_string(),
            };
            let _ = self.rejection.set(err.clone());
            return Err(err);
        }

        self.resolve_checked().await
    }
}

impl std::fmt::Debug for PinnedResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinnedResolver")
            .field("host", &self.host)
            .field("rejection", &self.rejection.get())
            .finish_non_exhaustive()
    }
}

impl Resolve for PinnedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let resolver = self.clone();
        Box::pin(async move {
            let ip = resolver.resolve_name(name.as_str()).await?;
            let addrs: Addrs = Box::new(std::iter::once(SocketAddr::new(ip, 0)));
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(addrs)
        })
    }
}

/// Find a resolver rejection inside an error chain.
pub(crate) fn find_dial_error<'a>(
    err: &'a (dyn std::error::Error + 'static),
) -> Option<&'a DialError> {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(dial) = err.downcast_ref::<DialError>() {
            return Some(dial);
        }
        current = err.source();
    }
    None
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::str::FromStr;

    /// Answers from a fixed table, standing in for an attacker's DNS server.
    pub(crate) struct StaticLookup(pub HashMap<String, IpAddr>);

    impl StaticLookup {
        pub(crate) fn single(host: &str, ip: &str) -> Arc<dyn HostLookup> {
            let mut table = HashMap::new();
            table.insert(host.to_string(), ip.parse().unwrap());
            Arc::new(Self(table))
        }
    }

    impl HostLookup for StaticLookup {
        fn lookup<'a>(&'a self, host: &'a str) -> LookupFuture<'a> {
            Box::pin(async move {
                self.0
                    .get(host)
                    .copied()
                    .ok_or_else(|| DialError::resolution(host, "NXDOMAIN"))
            })
        }
    }

    #[tokio::test]
    async fn test_public_address_passes() {
        let resolver = PinnedResolver::new(
            "public.example.com",
            StaticLookup::single("public.example.com", "93.184.216.34"),
        );
        let ip = resolver.resolve_checked().await.unwrap();
        assert_eq!(ip, "93.184.216.34".parse::<IpAddr>().unwrap());
        assert!(resolver.rejection().is_none());
    }

    #[tokio::test]
    async fn test_rebinding_to_metadata_is_refused() {
        let resolver = PinnedResolver::new(
            "rebind.example.com",
            StaticLookup::single("rebind.example.com", "169.254.169.254"),
        );
        let err = resolver.resolve_checked().await.unwrap_err();
        assert!(matches!(err, DialError::Forbidden { ip, .. } if ip.to_string() == "169.254.169.254"));
        assert!(resolver.rejection().is_some());
    }

    #[tokio::test]
    async fn test_rebinding_to_mapped_address_is_refused() {
        let resolver = PinnedResolver::new(
            "mapped.example.com",
            StaticLookup::single("mapped.example.com", "::ffff:8.8.8.8"),
        );
        assert!(matches!(
            resolver.resolve_checked().await,
            Err(DialError::Forbidden { .. })
        ));
    }

    #[tokio::test]
    async fn test_literal_address_skips_lookup() {
        // The lookup table is empty; a literal must not need it.
        let resolver = PinnedResolver::new("8.8.8.8", Arc::new(StaticLookup(HashMap::new())));
        assert!(resolver.resolve_checked().await.is_ok());

        let resolver = PinnedResolver::new("127.0.0.1", Arc::new(StaticLookup(HashMap::new())));
        assert!(matches!(
            resolver.resolve_checked().await,
            Err(DialError::Forbidden { .. })
        ));
    }

    #[tokio::test]
    async fn test_resolution_failure() {
        let resolver = PinnedResolver::new("nx.example.com", Arc::new(StaticLookup(HashMap::new())));
        let err = resolver.resolve_checked().await.unwrap_err();
        assert!(matches!(err, DialError::Resolution { .. }));
        assert!(matches!(Error::from(err), Error::ResolutionFailed { .. }));
    }

    #[tokio::test]
    async fn test_resolve_returns_single_address_with_zero_port() {
        let resolver = PinnedResolver::new(
            "public.example.com",
            StaticLookup::single("public.example.com", "1.1.1.1"),
        );
        let addrs: Vec<SocketAddr> = resolver
            .resolve(Name::from_str("public.example.com").unwrap())
            .await
            .unwrap()
            .collect();
        assert_eq!(addrs, vec!["1.1.1.1:0".parse::<SocketAddr>().unwrap()]);
    }

    #[tokio::test]
    async fn test_resolve_refuses_other_names() {
        let resolver = PinnedResolver::new(
            "public.example.com",
            StaticLookup::single("other.example.com", "1.1.1.1"),
        );
        let result = resolver
            .resolve(Name::from_str("other.example.com").unwrap())
            .await;
        assert!(result.is_err());
        assert!(matches!(
            resolver.rejection(),
            Some(DialError::UnexpectedHost { .. })
        ));
    }

    #[tokio::test]
    async fn test_rejection_is_found_in_boxed_chain() {
        let resolver = PinnedResolver::new(
            "rebind.example.com",
            StaticLookup::single("rebind.example.com", "10.0.0.1"),
        );
        let err = match resolver
            .resolve(Name::from_str("rebind.example.com").unwrap())
            .await
        {
            Ok(_) => panic!("expected rejection"),
            Err(err) => err,
        };
        assert!(matches!(
            find_dial_error(err.as_ref()),
            Some(DialError::Forbidden { .. })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_resolvers_are_independent() {
        let good = PinnedResolver::new(
            "good.example.com",
            StaticLookup::single("good.example.com", "8.8.4.4"),
        );
        let bad = PinnedResolver::new(
            "bad.example.com",
            StaticLookup::single("bad.example.com", "192.168.0.10"),
        );

        let (good_result, bad_result) = tokio::join!(good.resolve_checked(), bad.resolve_checked());
        assert!(good_result.is_ok());
        assert!(bad_result.is_err());
        assert!(good.rejection().is_none());
    }
}

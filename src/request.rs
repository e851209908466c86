//! Secure fetching: validation, pinned dialing, header checks and a capped body.
//!
//! Every fetch builds its own HTTP client around its own [`PinnedResolver`].
//! Nothing about the connection setup is shared between fetches, so
//! concurrent fetches cannot see each other's host binding.

use std::io;
use std::net::IpAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, CONTENT_LENGTH};
use reqwest::redirect::Policy as RedirectPolicy;
use reqwest::{Client, Method, Request, Response, StatusCode};
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;
use url::Url;

use crate::config::{BlockSignal, FetchConfig};
use crate::dialer::{find_dial_error, HostLookup, PinnedResolver, SystemLookup};
use crate::error::Error;
use crate::limit::SizeLimited;
use crate::validate::check_url;

/// Response body capped at the fetch's `max_bytes`.
pub type ResponseBody = SizeLimited<StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>>;

/// A request that is only sent if it is safe to send.
///
/// # Example
///
/// ```rust,no_run
/// use ssrf_fetch::{FetchConfig, SecureRequest};
///
/// # async fn example() -> Result<(), ssrf_fetch::Error> {
/// let url = "https://example.com/feed.xml".parse().unwrap();
/// let request = reqwest::Request::new(reqwest::Method::GET, url);
///
/// let response = SecureRequest::new(request, FetchConfig::default())
///     .send()
///     .await?;
/// println!("{} {} bytes", response.status(), response.bytes().await?.len());
/// # Ok(())
/// # }
/// ```
pub struct SecureRequest {
    request: Request,
    config: FetchConfig,
    lookup: Arc<dyn HostLookup>,
}

impl SecureRequest {
    pub fn new(request: Request, config: FetchConfig) -> Self {
        Self {
            request,
            config,
            lookup: Arc::new(SystemLookup),
        }
    }

    /// Replace the DNS lookup used at connect time.
    pub fn with_lookup(mut self, lookup: Arc<dyn HostLookup>) -> Self {
        self.lookup = lookup;
        self
    }

    /// Validate, connect through the pinned resolver and return the response.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] if the config is unusable
    /// - [`Error::UnsafeUrl`] if the URL fails validation (nothing is sent)
    /// - [`Error::PrivateAddressDetected`] if the dialed address is forbidden
    /// - [`Error::ResolutionFailed`] if the host does not resolve
    /// - [`Error::BlockedByFiltering`] if the response carries the block signal
    /// - [`Error::SizeExceeded`] if `Content-Length` is above `max_bytes`
    /// - [`Error::InvalidResponse`] if `Content-Length` is not a number
    /// - [`Error::Transport`] for any other network failure, including the
    ///   timeout running out while the host is still being resolved
    pub async fn send(self) -> Result<FetchResponse, Error> {
        let Self {
            request,
            config,
            lookup,
        } = self;

        config.validate()?;

        let raw_url = request.url().as_str().to_string();
        let url = check_url(&raw_url).inspect_err(|e| {
            tracing::debug!(url = %raw_url, error = %e, "rejected unsafe URL");
        })?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::unsafe_url(raw_url.as_str(), "URL must have a host"))?;

        let resolver = PinnedResolver::new(host, lookup);

        // The connector never consults the resolver for literal addresses.
        if host.parse::<IpAddr>().is_ok() {
            resolver.resolve_checked().await?;
        }

        let client = build_client(&resolver, &config, &raw_url)?;

        tracing::debug!(url = %raw_url, method = %request.method(), "sending request");
        let response = client
            .execute(request)
            .await
            .map_err(|e| send_error(&raw_url, &resolver, e))?;

        check_block_signal(&raw_url, response.headers(), &config.block_signal)?;
        check_declared_length(&raw_url, response.headers(), config.max_bytes)?;

        Ok(FetchResponse::new(response, config.max_bytes))
    }
}

impl std::fmt::Debug for SecureRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureRequest")
            .field("method", self.request.method())
            .field("url", &self.request.url().as_str())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Send a caller-built request with the given limits.
///
/// Shorthand for [`SecureRequest::new`] followed by [`SecureRequest::send`].
pub async fn send(request: Request, config: FetchConfig) -> Result<FetchResponse, Error> {
    SecureRequest::new(request, config).send().await
}

/// `GET` a URL with the given limits.
///
/// # Errors
///
/// Same as [`SecureRequest::send`]; a URL that does not parse is
/// [`Error::UnsafeUrl`].
pub async fn get(url: &str, config: FetchConfig) -> Result<FetchResponse, Error> {
    let url = check_url(url)?;
    send(Request::new(Method::GET, url), config).await
}

fn build_client(
    resolver: &PinnedResolver,
    config: &FetchConfig,
    url: &str,
) -> Result<Client, Error> {
    let timeout = config.timeout();

    // No proxy: a proxy would resolve the host itself, out of our sight.
    Client::builder()
        .dns_resolver(Arc::new(resolver.clone()))
        .connect_timeout(timeout)
        .timeout(timeout)
        .redirect(RedirectPolicy::none())
        .no_proxy()
        .https_only(true)
        .pool_max_idle_per_host(0)
        .build()
        .map_err(|e| Error::transport(url, e))
}

fn send_error(url: &str, resolver: &PinnedResolver, err: reqwest::Error) -> Error {
    let dial = find_dial_error(&err)
        .or_else(|| resolver.rejection())
        .cloned();

    match dial {
        Some(dial) => dial.into(),
        None => {
            tracing::debug!(url, error = %err, "request failed");
            Error::transport(url, err)
        }
    }
}

fn check_block_signal(url: &str, headers: &HeaderMap, signal: &BlockSignal) -> Result<(), Error> {
    let blocked = headers
        .iter()
        .any(|(name, value)| signal.matches(name.as_str(), value.as_bytes()));

    if blocked {
        tracing::warn!(url, header = %signal.header, "response blocked by DNS filtering");
        return Err(Error::BlockedByFiltering {
            url: url.to_string(),
        });
    }

    Ok(())
}

fn check_declared_length(url: &str, headers: &HeaderMap, max_bytes: u64) -> Result<(), Error> {
    let Some(value) = headers.get(CONTENT_LENGTH) else {
        return Ok(());
    };

    let length = value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(|| Error::invalid_response(url, "invalid Content-Length header"))?;

    if length > max_bytes {
        tracing::debug!(url, length, max_bytes, "declared length over limit");
        return Err(Error::size_exceeded(url, Some(length), max_bytes));
    }

    Ok(())
}

/// A response whose body yields at most `max_bytes` bytes.
///
/// Dropping it (or its body) closes the connection.
pub struct FetchResponse {
    status: StatusCode,
    headers: HeaderMap,
    url: Url,
    max_bytes: u64,
    body: ResponseBody,
}

impl FetchResponse {
    pub(crate) fn new(response: Response, max_bytes: u64) -> Self {
        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();

        let stream = response.bytes_stream().map_err(io::Error::other).boxed();

        Self {
            status,
            headers,
            url,
            max_bytes,
            body: SizeLimited::new(StreamReader::new(stream), max_bytes),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The byte cap applied to the body.
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// The capped body as an [`AsyncRead`](tokio::io::AsyncRead).
    pub fn body_mut(&mut self) -> &mut ResponseBody {
        &mut self.body
    }

    pub fn into_body(self) -> ResponseBody {
        self.body
    }

    /// Read the whole body.
    ///
    /// Unlike reading [`body_mut`](Self::body_mut) directly, which simply
    /// stops at the cap, this fails when the server had more to send.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SizeExceeded`] if the body is longer than
    /// `max_bytes` (the partial data is dropped) and [`Error::Transport`] if
    /// reading fails.
    pub async fn bytes(mut self) -> Result<Bytes, Error> {
        let mut buf = Vec::new();
        self.body
            .read_to_end(&mut buf)
            .await
            .map_err(|e| Error::transport(self.url.as_str(), e))?;

        if self.body.is_exhausted() {
            let mut probe = [0u8; 1];
            let extra = self
                .body
                .get_mut()
                .read(&mut probe)
                .await
                .map_err(|e| Error::transport(self.url.as_str(), e))?;

            if extra > 0 {
                tracing::debug!(url = %self.url, max_bytes = self.max_bytes, "body over limit");
                return Err(Error::size_exceeded(self.url.as_str(), None, self.max_bytes));
            }
        }

        Ok(Bytes::from(buf))
    }
}

impl std::fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchResponse")
            .field("status", &self.status)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .field("max_bytes", &self.max_bytes)
            .field("remaining", &self.body.remaining())
            .finish_non_exhaustive()
    }
}

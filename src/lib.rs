//! # ssrf-fetch
//!
//! SSRF-resistant outbound HTTP fetching.
//!
//! `ssrf-fetch` fetches attacker-influenced URLs only when the scheme, the
//! host and the address actually dialed are all safe, and it caps how much
//! of the response body can be read no matter what the server claims.
//!
//! Three layers work together:
//!
//! - [`is_safe_url`] rejects URLs before any network I/O (`https` only, no
//!   credentials, no odd ports, no bare or IPv6-literal hosts, no forbidden
//!   literal addresses).
//! - A per-fetch resolver re-resolves the host when the socket is opened and
//!   refuses forbidden addresses, which defeats DNS rebinding.
//! - The body is wrapped in [`SizeLimited`], a hard byte cap independent of
//!   `Content-Length`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ssrf_fetch::{get, Error, FetchConfig};
//!
//! # async fn example() -> Result<(), Error> {
//! match get("https://example.com/avatar.png", FetchConfig::default()).await {
//!     Ok(response) => {
//!         let body = response.bytes().await?;
//!         println!("fetched {} bytes", body.len());
//!     }
//!     Err(e) if e.is_security_rejection() => eprintln!("refused: {e}"),
//!     Err(e) => return Err(e),
//! }
//! # Ok(())
//! # }
//! ```

mod classify;
mod config;
mod error;
mod limit;
mod validate;

#[cfg(feature = "fetch")]
mod dialer;
#[cfg(feature = "fetch")]
mod request;

pub use classify::{forbidden_reason, is_forbidden, is_forbidden_str};
pub use config::{BlockSignal, FetchConfig, DEFAULT_BLOCK_HEADER, DEFAULT_BLOCK_VALUE};
pub use error::Error;
pub use limit::SizeLimited;
pub use validate::{check_url, is_safe_url};

#[cfg(feature = "fetch")]
pub use dialer::{DialError, HostLookup, LookupFuture, PinnedResolver, SystemLookup};
#[cfg(feature = "fetch")]
pub use request::{get, send, FetchResponse, ResponseBody, SecureRequest};

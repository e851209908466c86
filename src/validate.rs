//! Static URL validation, performed before any network I/O.

use std::net::IpAddr;

use url::Url;

use crate::classify::forbidden_reason;
use crate::error::Error;

/// Check whether a URL is safe to attempt at all.
///
/// This never touches DNS. A hostname that passes here is still re-checked
/// against the address actually being dialed when the connection is made.
///
/// # Example
///
/// ```rust
/// use ssrf_fetch::is_safe_url;
///
/// assert!(is_safe_url("https://example.com/feed.xml"));
/// assert!(!is_safe_url("http://example.com/feed.xml"));
/// assert!(!is_safe_url("https://127.0.0.1/"));
/// ```
pub fn is_safe_url(url: &str) -> bool {
    check_url(url).is_ok()
}

/// Validate a URL and return it parsed.
///
/// Rules, in order:
/// 1. Must parse as an absolute URL
/// 2. Scheme must be `https`
/// 3. Hostname must not contain `:` (IPv6 literals, socket pseudo-URLs)
/// 4. Hostname must contain a `.` (no bare intranet names)
/// 5. No userinfo (`user:pass@`). An empty userinfo (`https://@host`) is
///    caught from the raw text; once parsed into a [`Url`] it is gone and
///    carries no credential.
/// 6. Explicit port must be 80 or 443
/// 7. A literal IP hostname must not be forbidden
///
/// # Errors
///
/// Returns [`Error::UnsafeUrl`] naming the first rule that failed.
pub fn check_url(input: &str) -> Result<Url, Error> {
    let url = Url::parse(input).map_err(|_| Error::unsafe_url(input, "malformed URL"))?;

    if url.scheme() != "https" {
        return Err(Error::unsafe_url(input, "scheme must be https"));
    }

    let host = url.host_str().unwrap_or_default();

    if host.contains(':') {
        return Err(Error::unsafe_url(
            input,
            "IPv6 literal or non-host URL not allowed",
        ));
    }

    if !host.contains('.') {
        return Err(Error::unsafe_url(input, "hostname must contain a dot"));
    }

    // The parser drops an empty userinfo (`https://@host`), so look at the raw text as well.
    if !url.username().is_empty() || url.password().is_some() || raw_has_userinfo(input) {
        return Err(Error::unsafe_url(input, "userinfo (user:pass@) not allowed"));
    }

    if let Some(port) = url.port() {
        if port != 80 && port != 443 {
            return Err(Error::unsafe_url(input, "port must be 80 or 443"));
        }
    }

    // Non-standard IPv4 forms (octal, hex, decimal) are already normalized by the parser.
    if let Ok(ip) = host.parse::<IpAddr>() {
        if let Some(reason) = forbidden_reason(ip) {
            return Err(Error::unsafe_url(input, reason));
        }
    }

    Ok(url)
}

/// Look for `@` in the authority of the raw input.
fn raw_has_userinfo(input: &str) -> bool {
    let Some((_, after_scheme)) = input.split_once("://") else {
        return false;
    };

    let authority_end = after_scheme
        .find(['/', '\\', '?', '#'])
        .unwrap_or(after_scheme.len());

    after_scheme[..authority_end].contains('@')
}

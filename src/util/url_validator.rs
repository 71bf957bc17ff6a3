use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Errors returned when user input does not name a usable feed URL.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// Nothing was entered.
    #[error("Feed URL is empty")]
    Empty,
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
    /// The URL points at localhost or a private network address.
    #[error("Private or local address not allowed: {0}")]
    PrivateHost(String),
}

/// Turns user input into a feed URL.
///
/// Input is trimmed, and a bare host such as `example.com/rss` gets an
/// `https://` prefix. Only http(s) URLs with a host are accepted. Unless
/// `allow_private` is set, loopback, private, link-local and unspecified
/// addresses (and the name `localhost`) are rejected so a subscription
/// cannot be used to probe the local network.
///
/// # Examples
///
/// ```
/// use feedloom::util::validate_feed_url;
///
/// let url = validate_feed_url(" example.com/feed.xml ", false).unwrap();
/// assert_eq!(url.as_str(), "https://example.com/feed.xml");
///
/// assert!(validate_feed_url("http://192.168.1.1/feed", false).is_err());
/// assert!(validate_feed_url("http://192.168.1.1/feed", true).is_ok());
/// assert!(validate_feed_url("file:///etc/passwd", true).is_err());
/// ```
pub fn validate_feed_url(input: &str, allow_private: bool) -> Result<Url, UrlValidationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(UrlValidationError::Empty);
    }

    let url = if trimmed.contains("://") {
        Url::parse(trimmed)?
    } else {
        Url::parse(&format!("https://{trimmed}"))?
    };

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    let host = url.host_str().ok_or(UrlValidationError::MissingHost)?;
    if !allow_private && is_local_host(host) {
        return Err(UrlValidationError::PrivateHost(host.to_owned()));
    }

    Ok(url)
}

fn is_local_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }

    let bare = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    match bare.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            ip.is_private() || ip.is_loopback() || ip.is_link_local() || ip.is_unspecified()
        }
        Ok(IpAddr::V6(ip)) => {
            let first = ip.segments()[0];
            ip.is_loopback()
                || ip.is_unspecified()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
        }
        Err(_) => false,
    }
}

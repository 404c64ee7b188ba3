//! Remote metadata probe.
//!
//! A HEAD request tells the engine how large the resource is and whether the
//! server will serve byte ranges. The probe never fails: servers that reject
//! HEAD must not block a file that a plain GET would still deliver, so every
//! error degrades to [`RemoteMetadata::unknown`].

use reqwest::header::{HeaderMap, ACCEPT_RANGES, CONTENT_LENGTH, ETAG, LAST_MODIFIED};
use reqwest::Client;
use tracing::{debug, warn};

/// What the server told us about a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteMetadata {
    /// Total size in bytes, `None` when unknown.
    pub content_length: Option<u64>,
    /// Whether `Accept-Ranges: bytes` was advertised.
    pub supports_ranges: bool,
    /// Raw `Last-Modified` header.
    pub last_modified: Option<String>,
    /// Raw `ETag` header.
    pub etag: Option<String>,
}

impl RemoteMetadata {
    /// Conservative default: unknown length, no range support.
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Extract metadata from response headers.
    ///
    /// Reads `Content-Length` from the header itself: a HEAD response has no
    /// body, so a body-derived length would always be zero.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        let content_length = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok());

        let supports_ranges = headers
            .get(ACCEPT_RANGES)
            .map(|v| v.to_str().unwrap_or("") == "bytes")
            .unwrap_or(false);

        Self {
            content_length,
            supports_ranges,
            last_modified: text(LAST_MODIFIED),
            etag: text(ETAG),
        }
    }

    /// Total length if it is known and non-zero.
    pub fn known_length(&self) -> Option<u64> {
        self.content_length.filter(|&len| len > 0)
    }
}

/// Probe `url` with a HEAD request.
pub async fn probe(client: &Client, url: &str) -> RemoteMetadata {
    let response = match client.head(url).send().await {
        Ok(response) => response,
        Err(e) => {
            warn!(url = %url, error = %e, "HEAD request failed, assuming no range support");
            return RemoteMetadata::unknown();
        }
    };

    let status = response.status();
    if !status.is_success() {
        debug!(url = %url, status = %status, "HEAD rejected, assuming no range support");
        return RemoteMetadata::unknown();
    }

    let metadata = RemoteMetadata::from_headers(response.headers());
    debug!(
        url = %url,
        content_length = ?metadata.content_length,
        supports_ranges = metadata.supports_ranges,
        etag = ?metadata.etag,
        last_modified = ?metadata.last_modified,
        "Probed remote metadata"
    );
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_full_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("30000000"));
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        headers.insert(ETAG, HeaderValue::from_static("\"v42\""));
        headers.insert(
            LAST_MODIFIED,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );

        let metadata = RemoteMetadata::from_headers(&headers);
        assert_eq!(metadata.content_length, Some(30_000_000));
        assert!(metadata.supports_ranges);
        assert_eq!(metadata.etag.as_deref(), Some("\"v42\""));
        assert_eq!(
            metadata.last_modified.as_deref(),
            Some("Wed, 21 Oct 2015 07:28:00 GMT")
        );
    }

    #[test]
    fn test_accept_ranges_must_be_bytes() {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("none"));
        assert!(!RemoteMetadata::from_headers(&headers).supports_ranges);

        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("Bytes"));
        assert!(!RemoteMetadata::from_headers(&headers).supports_ranges);
    }

    #[test]
    fn test_missing_headers_are_unknown() {
        let metadata = RemoteMetadata::from_headers(&HeaderMap::new());
        assert_eq!(metadata, RemoteMetadata::unknown());
        assert_eq!(metadata.known_length(), None);
    }

    #[test]
    fn test_garbage_length_is_unknown() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("lots"));
        assert_eq!(RemoteMetadata::from_headers(&headers).content_length, None);
    }

    #[test]
    fn test_zero_length_is_not_known() {
        let metadata = RemoteMetadata {
            content_length: Some(0),
            ..Default::default()
        };
        assert_eq!(metadata.known_length(), None);
    }
}

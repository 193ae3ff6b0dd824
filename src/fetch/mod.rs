//! Bounded remote fetch with DNS resolution guard
//!
//! Network retrieval for the image pipeline:
//! - Every target passes [`SsrfPolicy`](crate::ssrf::SsrfPolicy) validation
//!   before a socket is opened
//! - Hostnames are resolved independently of the HTTP client and every
//!   resolved address is re-checked (defeats DNS rebinding); the validated
//!   IP is pinned onto the connection
//! - Automatic redirect following is disabled; 3xx responses are
//!   intercepted and the Location target re-enters the full validation
//!   path, up to [`MAX_REDIRECT_HOPS`] hops
//! - Response bodies stream through an incremental size ceiling; the
//!   transfer aborts the moment the ceiling is crossed
//! - One wall-clock budget covers the entire redirect chain

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use reqwest::Client;
use thiserror::Error;
use url::Url;

use crate::ssrf::{SsrfError, SsrfPolicy};

/// Default maximum response size (50 MiB).
pub const DEFAULT_MAX_SIZE: u64 = 50 * 1024 * 1024;

/// Default fetch timeout in milliseconds (10s), covering all redirect hops.
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;

/// Maximum fetch timeout in milliseconds (1 minute).
pub const MAX_FETCH_TIMEOUT_MS: u64 = 60_000;

/// Maximum redirect hops before the fetch is abandoned.
pub const MAX_REDIRECT_HOPS: usize = 5;

/// Errors that can occur during a remote fetch.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    /// URL failed validation or an address was classified as blocked.
    #[error(transparent)]
    Ssrf(#[from] SsrfError),

    /// DNS lookup failed for reasons unrelated to blocking. Retryable at
    /// the caller's discretion, unlike [`SsrfError::Blocked`].
    #[error("DNS resolution failed for {host}: {message}")]
    Resolution { host: String, message: String },

    #[error("upstream returned HTTP {0}")]
    HttpStatus(u16),

    #[error("response too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: u64 },

    #[error("fetch timed out after {0} ms")]
    Timeout(u64),

    #[error("too many redirects: exceeded {0} hops")]
    TooManyRedirects(usize),

    #[error("network error: {0}")]
    Network(String),
}

/// Result of a successful fetch.
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// The fetched bytes.
    pub bytes: Vec<u8>,

    /// Content-Type from the final response, if present.
    pub content_type: Option<String>,

    /// Actual size of the fetched content.
    pub size: u64,
}

/// Configuration for remote fetching.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Maximum response size in bytes (default: 50 MiB).
    pub max_size: u64,

    /// Wall-clock budget in milliseconds for the whole fetch, redirects
    /// included (default: 10s, capped at 1 minute).
    pub timeout_ms: u64,

    /// Maximum redirect hops to follow (default: 5).
    pub max_redirects: usize,

    /// Address-classification policy applied to every hop.
    pub policy: SsrfPolicy,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            max_redirects: MAX_REDIRECT_HOPS,
            policy: SsrfPolicy::default(),
        }
    }
}

impl FetchConfig {
    /// Set a custom maximum response size.
    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set a custom timeout, capped at [`MAX_FETCH_TIMEOUT_MS`].
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms.min(MAX_FETCH_TIMEOUT_MS);
        self
    }

    /// Set a custom redirect hop limit.
    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    /// Permit loopback targets. For local development and tests only.
    pub fn allow_loopback(mut self) -> Self {
        self.policy.allow_loopback = true;
        self
    }
}

/// Remote fetcher with SSRF protection.
///
/// Stateless aside from its configuration; each call performs exactly one
/// logical retrieval with no retries. Retry policy belongs to the caller.
#[derive(Debug, Clone, Default)]
pub struct RemoteFetcher {
    config: FetchConfig,
}

impl RemoteFetcher {
    /// Create a fetcher with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fetcher with custom configuration.
    pub fn with_config(config: FetchConfig) -> Self {
        Self { config }
    }

    /// The active configuration.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetch a URL, following redirects manually with per-hop validation.
    ///
    /// The configured timeout bounds the entire call including DNS
    /// resolution and every redirect hop.
    pub async fn fetch(&self, url: &str) -> Result<FetchResult, FetchError> {
        let budget = Duration::from_millis(self.config.timeout_ms.min(MAX_FETCH_TIMEOUT_MS));
        match tokio::time::timeout(budget, self.fetch_following_redirects(url)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.config.timeout_ms)),
        }
    }

    async fn fetch_following_redirects(&self, url: &str) -> Result<FetchResult, FetchError> {
        let mut current = url.to_string();

        for hop in 0..=self.config.max_redirects {
            // Full validation re-runs on every hop; a public URL that
            // redirects to an internal address dies here.
            let parsed = match self.config.policy.validate_url(&current) {
                Ok(parsed) => parsed,
                Err(err) => {
                    if matches!(err, SsrfError::Blocked(_)) {
                        tracing::warn!(
                            target: "ssrf",
                            url = %current,
                            hop,
                            "blocked fetch target"
                        );
                    }
                    return Err(err.into());
                }
            };

            let response = self.request(&parsed).await?;
            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        FetchError::Network(format!("HTTP {} without Location header", status))
                    })?;

                // Location may be relative; resolve against the current URL.
                let next = parsed
                    .join(location)
                    .map_err(|e| SsrfError::InvalidUrl(format!("redirect target: {e}")))?;

                tracing::debug!(
                    target: "fetch",
                    from = %current,
                    to = %next,
                    hop,
                    "intercepted redirect"
                );

                current = next.into();
                continue;
            }

            if status.as_u16() >= 400 {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }

            // Content-Length precheck saves streaming an obviously
            // oversized body; the incremental limit still applies below.
            if let Some(content_length) = response.content_length() {
                if content_length > self.config.max_size {
                    return Err(FetchError::TooLarge {
                        size: content_length,
                        max: self.config.max_size,
                    });
                }
            }

            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());

            let bytes = self.read_with_limit(response).await?;
            let size = bytes.len() as u64;

            tracing::debug!(target: "fetch", url = %current, size, "fetch complete");

            return Ok(FetchResult {
                bytes,
                content_type,
                size,
            });
        }

        tracing::warn!(
            target: "fetch",
            url = %url,
            max = self.config.max_redirects,
            "redirect chain exceeded hop limit"
        );
        Err(FetchError::TooManyRedirects(self.config.max_redirects))
    }

    /// Issue a single GET with redirects disabled and, for hostname
    /// targets, the guarded-and-validated IP pinned onto the connection.
    async fn request(&self, url: &Url) -> Result<reqwest::Response, FetchError> {
        let host = url
            .host_str()
            .ok_or_else(|| SsrfError::InvalidUrl("URL has no host".to_string()))?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(443);

        let timeout = Duration::from_millis(self.config.timeout_ms.min(MAX_FETCH_TIMEOUT_MS));

        let mut builder = Client::builder()
            .timeout(timeout)
            // Redirects are followed manually so each hop re-enters
            // validation; the transport must never follow them itself.
            .redirect(reqwest::redirect::Policy::none());

        // Literal-IP hosts were classified during validation; hostnames go
        // through the resolution guard and get their validated IP pinned.
        if host.parse::<IpAddr>().is_err() && !host.starts_with('[') {
            let pinned = self.resolve_and_guard(&host).await?;
            builder = builder.resolve(&host, SocketAddr::new(pinned, port));

            tracing::debug!(
                target: "fetch",
                host = %host,
                resolved_ip = %pinned,
                "DNS resolved and validated"
            );
        }

        let client = builder
            .build()
            .map_err(|e| FetchError::Network(format!("failed to build HTTP client: {e}")))?;

        client.get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(self.config.timeout_ms)
            } else {
                FetchError::Network(format!("request failed: {e}"))
            }
        })
    }

    /// Resolve a hostname and require every returned address to be public.
    ///
    /// Returns the first validated address for connection pinning.
    /// Distinguishes lookup failures (retryable, [`FetchError::Resolution`])
    /// from deliberate blocking ([`SsrfError::Blocked`]).
    async fn resolve_and_guard(&self, host: &str) -> Result<IpAddr, FetchError> {
        let resolver =
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());

        let lookup = resolver
            .lookup_ip(host)
            .await
            .map_err(|e| FetchError::Resolution {
                host: host.to_string(),
                message: e.to_string(),
            })?;

        let mut pinned: Option<IpAddr> = None;

        for ip in lookup.iter() {
            if let Err(err) = self.config.policy.check_resolved_ip(&ip, host) {
                tracing::warn!(
                    target: "ssrf",
                    host = %host,
                    resolved_ip = %ip,
                    "hostname resolved to blocked address"
                );
                return Err(err.into());
            }
            if pinned.is_none() {
                pinned = Some(ip);
            }
        }

        pinned.ok_or_else(|| FetchError::Resolution {
            host: host.to_string(),
            message: "no addresses returned".to_string(),
        })
    }

    /// Stream the response body, aborting the instant the running total
    /// crosses the configured ceiling.
    async fn read_with_limit(&self, response: reqwest::Response) -> Result<Vec<u8>, FetchError> {
        use futures_util::StreamExt;

        let max_size = self.config.max_size;
        let mut body = Vec::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result
                .map_err(|e| FetchError::Network(format!("failed to read chunk: {e}")))?;

            let new_size = body.len() as u64 + chunk.len() as u64;
            if new_size > max_size {
                return Err(FetchError::TooLarge {
                    size: new_size,
                    max: max_size,
                });
            }

            body.extend_from_slice(&chunk);
        }

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_config_defaults() {
        let config = FetchConfig::default();
        assert_eq!(config.max_size, DEFAULT_MAX_SIZE);
        assert_eq!(config.timeout_ms, DEFAULT_FETCH_TIMEOUT_MS);
        assert_eq!(config.max_redirects, MAX_REDIRECT_HOPS);
        assert!(!config.policy.allow_loopback);
    }

    #[test]
    fn test_fetch_config_builder() {
        let config = FetchConfig::default()
            .with_max_size(10 * 1024 * 1024)
            .with_timeout_ms(5_000)
            .with_max_redirects(2)
            .allow_loopback();

        assert_eq!(config.max_size, 10 * 1024 * 1024);
        assert_eq!(config.timeout_ms, 5_000);
        assert_eq!(config.max_redirects, 2);
        assert!(config.policy.allow_loopback);
    }

    #[test]
    fn test_fetch_config_timeout_capped() {
        let config = FetchConfig::default().with_timeout_ms(MAX_FETCH_TIMEOUT_MS + 100_000);
        assert_eq!(config.timeout_ms, MAX_FETCH_TIMEOUT_MS);
    }

    #[tokio::test]
    async fn test_fetch_blocks_localhost() {
        let fetcher = RemoteFetcher::new();

        for url in [
            "https://localhost/image.png",
            "https://127.0.0.1/image.png",
            "https://[::1]/image.png",
        ] {
            let result = fetcher.fetch(url).await;
            assert!(
                matches!(result, Err(FetchError::Ssrf(SsrfError::Blocked(_)))),
                "{url}"
            );
        }
    }

    #[tokio::test]
    async fn test_fetch_blocks_private_ranges() {
        let fetcher = RemoteFetcher::new();

        for url in [
            "https://10.0.0.1/image.png",
            "https://172.16.0.1/image.png",
            "https://192.168.1.1/image.png",
            "https://169.254.1.1/image.png",
            "https://169.254.169.254/latest/meta-data/",
            "https://[fc00::1]/image.png",
            "https://[fe80::1]/image.png",
        ] {
            let result = fetcher.fetch(url).await;
            assert!(
                matches!(result, Err(FetchError::Ssrf(SsrfError::Blocked(_)))),
                "{url}"
            );
        }
    }

    #[tokio::test]
    async fn test_fetch_rejects_disallowed_schemes() {
        let fetcher = RemoteFetcher::new();

        let result = fetcher.fetch("file:///etc/passwd").await;
        assert!(matches!(
            result,
            Err(FetchError::Ssrf(SsrfError::SchemeNotAllowed(_)))
        ));

        let result = fetcher.fetch("ftp://ftp.example.com/file").await;
        assert!(matches!(
            result,
            Err(FetchError::Ssrf(SsrfError::SchemeNotAllowed(_)))
        ));
    }

    #[tokio::test]
    async fn test_fetch_rejects_overlong_url() {
        let fetcher = RemoteFetcher::new();
        let long_url = format!("https://example.com/{}", "x".repeat(4096));
        let result = fetcher.fetch(&long_url).await;
        assert!(matches!(
            result,
            Err(FetchError::Ssrf(SsrfError::InvalidUrl(_)))
        ));
    }

    #[tokio::test]
    async fn test_blocked_before_any_network_io() {
        // Validation failures must short-circuit; a sub-millisecond budget
        // would trip if any I/O happened first.
        let fetcher =
            RemoteFetcher::with_config(FetchConfig::default().with_max_size(0).with_timeout_ms(1));
        let result = fetcher.fetch("https://192.168.0.10/logo.png").await;
        assert!(matches!(
            result,
            Err(FetchError::Ssrf(SsrfError::Blocked(_)))
        ));
    }
}

//! URL validation and private-address classification
//!
//! First line of defense against Server-Side Request Forgery: every
//! candidate URL is parsed and classified before any network action.
//!
//! - HTTP/HTTPS only (no file://, ftp://, javascript:, etc.)
//! - Blocks private IPv4/IPv6 ranges, link-local, localhost variants
//! - Blocks cloud metadata endpoints (169.254.169.254, fd00:ec2::254)
//! - Re-checks IPv4-mapped IPv6 addresses against the IPv4 table
//!
//! Literal-address checks alone do not defeat DNS rebinding; the fetch
//! layer re-applies [`SsrfPolicy::check_resolved_ip`] to every address a
//! hostname resolves to, on every redirect hop.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use thiserror::Error;
use url::Url;

/// Maximum URL length (2 KiB), checked before parsing.
pub const MAX_URL_LENGTH: usize = 2048;

/// Validation and classification errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SsrfError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("scheme not allowed: {0} (only http/https)")]
    SchemeNotAllowed(String),

    /// The address is private/reserved. The message names only what the
    /// caller already supplied; resolved internal IPs go to the audit log,
    /// not into this error.
    #[error("cannot access this address: {0}")]
    Blocked(String),
}

/// Address-classification policy.
#[derive(Debug, Clone, Default)]
pub struct SsrfPolicy {
    /// Permit loopback targets (127.0.0.0/8, ::1, "localhost").
    /// For local development and test origins only. Default: false.
    pub allow_loopback: bool,
}

impl SsrfPolicy {
    /// Parse and validate a candidate URL without touching the network.
    ///
    /// Rejects malformed URLs, disallowed schemes, and hosts that are
    /// literal private/loopback/reserved addresses or known metadata
    /// endpoints. Returns the parsed URL for the fetch layer.
    pub fn validate_url(&self, raw: &str) -> Result<Url, SsrfError> {
        if raw.len() > MAX_URL_LENGTH {
            return Err(SsrfError::InvalidUrl(format!(
                "URL too long: {} chars (max {})",
                raw.len(),
                MAX_URL_LENGTH
            )));
        }

        let parsed = Url::parse(raw).map_err(|e| SsrfError::InvalidUrl(e.to_string()))?;

        match parsed.scheme() {
            "http" | "https" => {}
            scheme => return Err(SsrfError::SchemeNotAllowed(scheme.to_string())),
        }

        // Normalize: lowercase, and strip the trailing dot of a
        // fully-qualified form ("localhost." is still localhost).
        let mut host = parsed
            .host_str()
            .ok_or_else(|| SsrfError::InvalidUrl("URL has no host".to_string()))?
            .to_lowercase();
        if host.ends_with('.') {
            host.pop();
        }

        if !self.allow_loopback && is_localhost_name(&host) {
            return Err(SsrfError::Blocked(host));
        }

        if is_metadata_endpoint(&host) {
            return Err(SsrfError::Blocked(host));
        }

        // Literal IP hosts are classified immediately; hostname targets are
        // re-checked after DNS resolution by the fetch layer.
        if let Some(ip) = parse_ip_host(&host) {
            if self.is_blocked_ip(&ip) {
                return Err(SsrfError::Blocked(host));
            }
        }

        Ok(parsed)
    }

    /// Classify an IP address obtained from DNS resolution.
    ///
    /// Must be called for every address a hostname resolves to, before
    /// connecting, and again for every redirect target. A public-looking
    /// hostname that resolves to a private address is rejected here.
    pub fn check_resolved_ip(&self, ip: &IpAddr, original_host: &str) -> Result<(), SsrfError> {
        if self.is_blocked_ip(ip) {
            return Err(SsrfError::Blocked(original_host.to_string()));
        }
        Ok(())
    }

    /// Whether an address falls in a private/reserved range under this policy.
    pub fn is_blocked_ip(&self, ip: &IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => self.is_blocked_ipv4(v4),
            IpAddr::V6(v6) => self.is_blocked_ipv6(v6),
        }
    }

    fn is_blocked_ipv4(&self, ip: &Ipv4Addr) -> bool {
        let octets = ip.octets();

        // 127.0.0.0/8 - Loopback
        if octets[0] == 127 {
            return !self.allow_loopback;
        }

        // 10.0.0.0/8 - Private Class A
        if octets[0] == 10 {
            return true;
        }

        // 172.16.0.0/12 - Private Class B
        if octets[0] == 172 && (16..=31).contains(&octets[1]) {
            return true;
        }

        // 192.168.0.0/16 - Private Class C
        if octets[0] == 192 && octets[1] == 168 {
            return true;
        }

        // 169.254.0.0/16 - Link-local (includes cloud metadata 169.254.169.254)
        if octets[0] == 169 && octets[1] == 254 {
            return true;
        }

        // 0.0.0.0/8 - Current network
        if octets[0] == 0 {
            return true;
        }

        // 100.64.0.0/10 - Carrier-grade NAT
        if octets[0] == 100 && (64..=127).contains(&octets[1]) {
            return true;
        }

        // 192.0.0.0/24 - IETF protocol assignments
        if octets[0] == 192 && octets[1] == 0 && octets[2] == 0 {
            return true;
        }

        // 192.0.2.0/24, 198.51.100.0/24, 203.0.113.0/24 - TEST-NETs
        if octets[0] == 192 && octets[1] == 0 && octets[2] == 2 {
            return true;
        }
        if octets[0] == 198 && octets[1] == 51 && octets[2] == 100 {
            return true;
        }
        if octets[0] == 203 && octets[1] == 0 && octets[2] == 113 {
            return true;
        }

        // 224.0.0.0/4 - Multicast
        if (224..=239).contains(&octets[0]) {
            return true;
        }

        // 240.0.0.0/4 - Reserved for future use
        if octets[0] >= 240 {
            return true;
        }

        false
    }

    fn is_blocked_ipv6(&self, ip: &Ipv6Addr) -> bool {
        let segments = ip.segments();

        // ::1 - Loopback
        if *ip == Ipv6Addr::LOCALHOST {
            return !self.allow_loopback;
        }

        // :: - Unspecified
        if *ip == Ipv6Addr::UNSPECIFIED {
            return true;
        }

        // fc00::/7 - Unique local addresses
        if (segments[0] & 0xfe00) == 0xfc00 {
            return true;
        }

        // fe80::/10 - Link-local
        if (segments[0] & 0xffc0) == 0xfe80 {
            return true;
        }

        // ff00::/8 - Multicast
        if (segments[0] & 0xff00) == 0xff00 {
            return true;
        }

        // ::ffff:0:0/96 - IPv4-mapped, re-check the embedded IPv4 address
        if let Some(v4) = ip.to_ipv4_mapped() {
            return self.is_blocked_ipv4(&v4);
        }

        // 2001:db8::/32 - Documentation
        if segments[0] == 0x2001 && segments[1] == 0x0db8 {
            return true;
        }

        false
    }
}

/// Extract an IP literal from a normalized host string, handling
/// bracketed IPv6 forms (e.g. `[fc00::1]`).
fn parse_ip_host(host: &str) -> Option<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Some(ip);
    }
    if let Some(inner) = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        if let Ok(ip) = inner.parse::<Ipv6Addr>() {
            return Some(IpAddr::V6(ip));
        }
    }
    None
}

/// Localhost hostname variants (case-normalized input expected).
fn is_localhost_name(host: &str) -> bool {
    host == "localhost" || host == "localhost.localdomain" || host.ends_with(".localhost")
}

/// Cloud metadata endpoints that must never be reachable, by name or literal.
fn is_metadata_endpoint(host: &str) -> bool {
    // AWS/GCP/Azure IPv4 metadata endpoint
    if host == "169.254.169.254" {
        return true;
    }

    // AWS EC2 IPv6 metadata endpoint
    if host == "fd00:ec2::254" || host == "[fd00:ec2::254]" {
        return true;
    }

    // AWS metadata hostnames
    if host == "instance-data" || host.ends_with(".internal") {
        return true;
    }

    // GCP metadata hostnames
    if host == "metadata.google.internal" || host == "metadata" {
        return true;
    }

    false
}

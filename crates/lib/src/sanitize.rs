//! Stateless input checks: remote URLs, hosts content, IPs, hostnames, HTML escaping, and
//! shell quoting.
//!
//! URL and hosts-content checks back `POST /api/check/url` and `POST /api/check/hosts`.
//! The remaining helpers are library API for embedders composing hosts entries or commands.

use regex::Regex;
use std::net::IpAddr;
use std::sync::OnceLock;

/// Max hosts content size in bytes.
pub const MAX_HOSTS_CONTENT: usize = 10 * 1024 * 1024;

/// Accept only http(s) URLs whose host is not localhost, loopback, unspecified, or private IPv4.
pub fn is_valid_url(url: &str) -> Result<(), String> {
    if url.trim().is_empty() {
        return Err("URL is required".to_string());
    }
    let parsed = reqwest::Url::parse(url).map_err(|e| format!("Invalid URL: {}", e))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err("Only HTTP and HTTPS protocols are allowed".to_string());
    }
    let host = parsed
        .host_str()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']'))
        .unwrap_or("");
    if is_private_host(host) {
        return Err("Private IP addresses and localhost are not allowed".to_string());
    }
    Ok(())
}

fn is_private_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.is_loopback() || v4.is_private() || v4.is_unspecified(),
        Ok(IpAddr::V6(v6)) => v6.is_loopback(),
        Err(_) => false,
    }
}

/// Escape `& < > " ' /` for safe embedding in HTML.
pub fn sanitize_input(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '/' => out.push_str("&#x2F;"),
            _ => out.push(c),
        }
    }
    out
}

fn dangerous_content_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [r"(?i)javascript:", r"(?i)<script", r"(?i)on\w+\s*=", r"(?i)data:text/html"]
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

/// Reject empty, oversized, or script-bearing hosts content.
pub fn validate_hosts_content(content: &str) -> Result<(), String> {
    if content.is_empty() {
        return Err("Content is required".to_string());
    }
    if dangerous_content_patterns().iter().any(|re| re.is_match(content)) {
        return Err("Content contains dangerous patterns".to_string());
    }
    if content.len() > MAX_HOSTS_CONTENT {
        return Err("Content is too large".to_string());
    }
    Ok(())
}

pub fn is_valid_ip(ip: &str) -> bool {
    ip.parse::<IpAddr>().is_ok()
}

/// RFC 1123 hostname: dot-separated labels of 1-63 alphanumerics/hyphens, no leading or
/// trailing hyphen, at most 253 characters overall.
pub fn is_valid_hostname(hostname: &str) -> bool {
    if hostname.is_empty() || hostname.len() > 253 {
        return false;
    }
    hostname.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

/// Quote a value for a POSIX shell: wrap in single quotes, escaping embedded quotes as `'\''`.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

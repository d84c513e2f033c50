//! Host name matching.
//!
//! # Responsibilities
//! - Normalize names from SNI, `Host` headers and configuration alike
//! - Identify a virtual host by (port, name)
//!
//! # Design Decisions
//! - Host matching is case-insensitive (RFC 9110)
//! - A trailing root dot and a `:port` suffix are ignored
//! - No wildcards or regex: exact names only, so lookups are O(1)

use std::fmt;

/// Canonical form of a host name, or `None` when the input is not a usable name.
pub fn normalize_host(raw: &str) -> Option<String> {
    let raw = raw.trim();

    if let Some(rest) = raw.strip_prefix('[') {
        // IPv6 literal, optionally followed by :port
        let end = rest.find(']')?;
        let (literal, tail) = rest.split_at(end);
        let tail = &tail[1..];
        if !tail.is_empty() && !is_port_suffix(tail) {
            return None;
        }
        if literal.is_empty() || !literal.chars().all(|c| c.is_ascii_hexdigit() || c == ':' || c == '.') {
            return None;
        }
        return Some(format!("[{}]", literal.to_ascii_lowercase()));
    }

    let host = match raw.rsplit_once(':') {
        Some((host, _)) if !host.contains(':') => {
            if !is_port_suffix(&raw[host.len()..]) {
                return None;
            }
            host
        }
        Some(_) => return None,
        None => raw,
    };

    let host = host.strip_suffix('.').unwrap_or(host);
    if host.is_empty() || host.len() > 253 {
        return None;
    }
    if !host
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_')
    {
        return None;
    }
    if host.split('.').any(str::is_empty) {
        return None;
    }
    Some(host.to_ascii_lowercase())
}

fn is_port_suffix(s: &str) -> bool {
    match s.strip_prefix(':') {
        Some(digits) => !digits.is_empty() && digits.len() <= 5 && digits.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

/// Identity of a virtual host: the port it is bound to plus its primary name.
/// A `None` name identifies the port's default host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostKey {
    pub port: u16,
    pub server_name: Option<String>,
}

impl HostKey {
    pub fn new(port: u16, server_name: Option<&str>) -> Self {
        Self {
            port,
            server_name: server_name
                .map(|name| normalize_host(name).unwrap_or_else(|| name.to_ascii_lowercase())),
        }
    }

    pub fn is_default(&self) -> bool {
        self.server_name.is_none()
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.server_name {
            Some(name) => write!(f, "{}:{}", name, self.port),
            None => write!(f, "_default_:{}", self.port),
        }
    }
}

//! Parsing of user-entered destination entries.
//!
//! Users type destinations in many shapes.  All of the following are accepted:
//!
//! - Simple domains: `google.com`
//! - Subdomain wildcards: `*.firebaseapp.com`
//! - Paths: `google.com/maps`
//! - Full URLs: `https://google.com/maps`
//! - Local development hosts: `localhost`, `localhost:3000`, `127.0.0.1`,
//!   `127.0.0.1:5173`, `[::1]:8080`, `::1`
//!
//! Anything else that lacks a dot (for example `*.pdf` or `intranet`) is
//! dropped.  Parsing never fails loudly: an unusable entry simply produces
//! `None` and is skipped by [`parse_entries`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// A destination entry after normalisation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParsedEntry {
    /// Lower-cased host, possibly with a port (`localhost:3000`).
    pub domain: String,
    /// Path including its leading `/`, when the entry named one.
    pub path: Option<String>,
    /// `true` when the entry was written as `*.domain`.
    pub is_wildcard_subdomain: bool,
}

impl ParsedEntry {
    /// Composite key used for de-duplication: `domain` followed by `path`.
    pub fn dedup_key(&self) -> String {
        format!("{}{}", self.domain, self.path.as_deref().unwrap_or(""))
    }
}

/// Parses a single raw entry.
///
/// Returns `None` when the entry is empty, has an empty host, or has a host
/// without a dot that is not a recognised local host.
pub fn parse_entry(raw: &str) -> Option<ParsedEntry> {
    let trimmed = raw.trim().to_lowercase();
    if trimmed.is_empty() {
        return None;
    }

    let without_scheme = trimmed
        .strip_prefix("http://")
        .or_else(|| trimmed.strip_prefix("https://"))
        .unwrap_or(&trimmed);

    let (is_wildcard_subdomain, rest) = match without_scheme.strip_prefix("*.") {
        Some(rest) => (true, rest),
        None => (false, without_scheme),
    };
    let rest = rest.strip_prefix('.').unwrap_or(rest);

    let (domain, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], Some(rest[idx..].to_string())),
        None => (rest, None),
    };

    if domain.is_empty() {
        return None;
    }
    if !domain.contains('.') && !is_local_host(domain) {
        return None;
    }

    Some(ParsedEntry {
        domain: domain.to_string(),
        path,
        is_wildcard_subdomain,
    })
}

/// Parses and de-duplicates a list of raw entries.
///
/// Duplicates are detected on `domain + path`; the first occurrence wins and
/// the original order is preserved, which keeps rule ids deterministic.
pub fn parse_entries<S: AsRef<str>>(raw: &[S]) -> Vec<ParsedEntry> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for entry in raw {
        let Some(parsed) = parse_entry(entry.as_ref()) else {
            debug!("dropping unusable entry {:?}", entry.as_ref());
            continue;
        };
        if seen.insert(parsed.dedup_key()) {
            out.push(parsed);
        }
    }
    out
}

/// Renders the URL filter for a parsed entry.
///
/// - With a path: `||domain/path`, no trailing anchor, so the path and
///   everything below it match.
/// - Without a path: `||domain^`, which matches the domain and all of its
///   subdomains.
pub fn build_url_filter(entry: &ParsedEntry) -> String {
    match &entry.path {
        Some(path) => format!("||{}{}", entry.domain, path),
        None => format!("||{}^", entry.domain),
    }
}

// ── Local host grammar ────────────────────────────────────────────────────────

fn is_valid_port(port: &str) -> bool {
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    matches!(port.parse::<u32>(), Ok(n) if (1..=65535).contains(&n))
}

fn is_valid_ipv4(host: &str) -> bool {
    let parts: Vec<&str> = host.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    parts.iter().all(|p| {
        (1..=3).contains(&p.len())
            && p.bytes().all(|b| b.is_ascii_digit())
            && matches!(p.parse::<u16>(), Ok(n) if n <= 255)
    })
}

/// Returns `true` for hosts that are usable even though they lack a dot.
fn is_local_host(host: &str) -> bool {
    // Bracketed IPv6, optionally with a port: [::1] or [::1]:3000
    if let Some(inner) = host.strip_prefix('[') {
        let Some(close) = inner.find(']') else {
            return false;
        };
        let (addr, rest) = (&inner[..close], &inner[close + 1..]);
        if addr.is_empty() {
            return false;
        }
        if rest.is_empty() {
            return true;
        }
        return rest.strip_prefix(':').is_some_and(is_valid_port);
    }

    if host == "localhost" {
        return true;
    }
    if let Some(port) = host.strip_prefix("localhost:") {
        return is_valid_port(port);
    }

    // Exactly one colon: IPv4 with a port.
    if let (Some(first), Some(last)) = (host.find(':'), host.rfind(':')) {
        if first == last {
            return is_valid_ipv4(&host[..first]) && is_valid_port(&host[first + 1..]);
        }
    }
    if is_valid_ipv4(host) {
        return true;
    }

    // Bare IPv6, best effort: anything with several colons.
    host.contains(':')
}

// ── Tests ─────────────────────────────────────────────────────────────────────

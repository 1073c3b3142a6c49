//! Outbound target sandbox.
//!
//! Blocks actions whose target points at loopback, private, reserved, or
//! cloud-metadata address space. URL targets are judged by their host;
//! bare targets by literal form. Anything that looks like an address but
//! cannot be parsed is blocked.

use std::net::{Ipv4Addr, Ipv6Addr};

const METADATA_FRAGMENTS: [&str; 3] = ["169.254.", "metadata.internal", "metadata.google"];

/// Whether the execution target must be refused.
pub fn is_forbidden_target(target: &str) -> bool {
    let lowered = target.trim().to_ascii_lowercase();

    if let Some(rest) = lowered
        .strip_prefix("http://")
        .or_else(|| lowered.strip_prefix("https://"))
    {
        return match extract_host(rest) {
            Some(host) => is_forbidden_host(&host),
            // Unparseable authority: fail closed.
            None => true,
        };
    }

    // Bare targets: opaque names like "project:SEC" pass; anything
    // host-shaped is judged like a URL host.
    if METADATA_FRAGMENTS.iter().any(|f| lowered.contains(f)) {
        return true;
    }
    if lowered.contains("localhost") || lowered.contains("0.0.0.0") {
        return true;
    }
    if let Some(host) = extract_host(&lowered) {
        if host.parse::<Ipv4Addr>().is_ok()
            || host.parse::<Ipv6Addr>().is_ok()
            || lowered.starts_with('[')
        {
            return is_forbidden_host(&host);
        }
    }
    false
}

/// Pull the host out of `authority[/path...]`, handling userinfo, ports,
/// and bracketed IPv6 literals. Returns `None` when the syntax is broken.
fn extract_host(rest: &str) -> Option<String> {
    let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
    let authority = authority.rsplit('@').next().unwrap_or(authority);

    if let Some(bracketed) = authority.strip_prefix('[') {
        let end = bracketed.find(']')?;
        return Some(bracketed[..end].to_string());
    }

    let host = authority.split(':').next().unwrap_or(authority);
    if host.is_empty() {
        return None;
    }
    Some(host.to_string())
}

fn is_forbidden_host(host: &str) -> bool {
    if host.is_empty() {
        return true;
    }
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }
    if METADATA_FRAGMENTS.iter().any(|f| host.contains(f)) {
        return true;
    }

    if let Ok(v4) = host.parse::<Ipv4Addr>() {
        return is_forbidden_v4(v4);
    }
    if let Ok(v6) = host.parse::<Ipv6Addr>() {
        return is_forbidden_v6(v6);
    }

    // Digits-and-dots that did not parse as IPv4 (octal, overflow,
    // decimal-int forms) are address obfuscation attempts.
    if !host.is_empty() && host.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return true;
    }
    if host.starts_with("0x") {
        return true;
    }
    false
}

fn is_forbidden_v4(addr: Ipv4Addr) -> bool {
    let octets = addr.octets();
    addr.is_loopback()                                      // 127/8
        || addr.is_private()                                // 10/8, 172.16/12, 192.168/16
        || addr.is_link_local()                             // 169.254/16
        || addr.is_unspecified()                            // 0.0.0.0
        || octets[0] == 0                                   // 0/8
        || (octets[0] == 100 && (octets[1] & 0xc0) == 64)   // 100.64/10
        || (octets[0] == 198 && (octets[1] & 0xfe) == 18)   // 198.18/15
}

fn is_forbidden_v6(addr: Ipv6Addr) -> bool {
    if addr.is_loopback() || addr.is_unspecified() {
        return true;
    }
    let segments = addr.segments();
    if (segments[0] & 0xfe00) == 0xfc00 {
        // Unique-local fc00::/7.
        return true;
    }
    if (segments[0] & 0xffc0) == 0xfe80 {
        // Link-local fe80::/10.
        return true;
    }
    if let Some(mapped) = addr.to_ipv4_mapped() {
        return is_forbidden_v4(mapped);
    }
    false
}

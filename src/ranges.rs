use anyhow::{Context, Result};
use ipnet::{IpNet, Ipv4Net};
use std::collections::HashSet;
use std::fs;
use std::net::IpAddr;
use std::path::Path;

/// Parse target range lines into validated range strings for a start command.
///
/// One IP or CIDR per line. Everything after `#` is a comment; whitespace and
/// blank lines are ignored. Duplicates are removed, first appearance wins.
/// Entries are validated here so a malformed range is a line-numbered error
/// before anything is sent to the service.
pub fn parse_ranges_str(s: &str) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    let mut seen = HashSet::new();

    for (idx, raw_line) in s.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.split('#').next().map(str::trim).unwrap_or("");
        if line.is_empty() {
            continue;
        }
        let canonical = if line.contains('/') {
            line.parse::<IpNet>()
                .with_context(|| format!("line {line_no}: invalid CIDR: {line}"))?
                .to_string()
        } else {
            line.parse::<IpAddr>()
                .with_context(|| format!("line {line_no}: invalid IP: {line}"))?
                .to_string()
        };
        if seen.insert(canonical.clone()) {
            out.push(canonical);
        }
    }

    Ok(out)
}

/// Load ranges from a file. Errors if the file cannot be read or parsed.
pub fn load_ranges_from_path(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read ranges file: {}", path.as_ref().display()))?;
    parse_ranges_str(&content)
}

/// Approximate number of scannable hosts the ranges cover, for display.
///
/// A plain IP counts 1. IPv4 networks exclude the network and broadcast
/// addresses; `/31` and `/32` have no such split and count every address.
/// IPv6 networks are not scanned by the service and count 0.
pub fn count_targets(ranges: &[String]) -> u64 {
    ranges
        .iter()
        .map(|r| {
            if let Ok(net) = r.parse::<IpNet>() {
                match net {
                    IpNet::V4(n4) => ipv4_host_count(n4),
                    IpNet::V6(_) => 0,
                }
            } else {
                // Validated upstream, so anything else is a single address.
                1
            }
        })
        .sum()
}

fn ipv4_host_count(net: Ipv4Net) -> u64 {
    let start = u32::from(net.network());
    let end = u32::from(net.broadcast());
    let total = u64::from(end - start) + 1;
    if net.prefix_len() >= 31 {
        total
    } else {
        total - 2
    }
}

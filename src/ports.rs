use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

/// Parse a port list into deduplicated TCP ports (1..=65535).
///
/// This is the format the service accepts in scan settings: entries separated
/// by commas or newlines. Supported entry forms:
/// - single port number: `443`
/// - inclusive range: `2053-2096`
/// - comments: everything after `#` is ignored
/// - whitespace and blank entries are ignored
pub fn parse_ports_str(s: &str) -> Result<Vec<u16>> {
    let mut out: Vec<u16> = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for (idx, raw_line) in s.lines().enumerate() {
        let line_no = idx + 1;
        // Strip comments, then split the remainder on commas.
        let line = raw_line.split('#').next().unwrap_or("");
        for entry in line.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }

            // Range `start-end`
            if let Some((a, b)) = entry.split_once('-') {
                let start = parse_port_str(a.trim())
                    .with_context(|| format!("line {line_no}: invalid start in range: {a}"))?;
                let end = parse_port_str(b.trim())
                    .with_context(|| format!("line {line_no}: invalid end in range: {b}"))?;
                if start > end {
                    bail!("line {line_no}: invalid range {start}-{end} (start > end)");
                }
                for p in start..=end {
                    if seen.insert(p) {
                        out.push(p);
                    }
                }
                continue;
            }

            // Single number
            let p = parse_port_str(entry)
                .with_context(|| format!("line {line_no}: invalid port value: {entry}"))?;
            if seen.insert(p) {
                out.push(p);
            }
        }
    }

    Ok(out)
}

/// Load a ports list from a file path. Errors if the file cannot be read or parsed.
pub fn load_ports_from_path(path: impl AsRef<Path>) -> Result<Vec<u16>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read ports file: {}", path.as_ref().display()))?;
    parse_ports_str(&content)
}

/// Parse a ports string, or fall back to the service defaults if missing/empty.
pub fn parse_ports_or_default(s: &str) -> Vec<u16> {
    match parse_ports_str(s) {
        Ok(v) if !v.is_empty() => v,
        _ => default_ports(),
    }
}

/// The CDN edge ports the service probes when none are configured.
pub fn default_ports() -> Vec<u16> {
    const DEFAULT: &[u16] = &[443, 80, 8443, 2053, 2083, 2087, 2096];
    DEFAULT.to_vec()
}

/// Render a ports list back into the comma-separated settings form.
pub fn ports_to_settings_str(ports: &[u16]) -> String {
    ports
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn parse_port_str(s: &str) -> Result<u16> {
    let val: u32 = s.parse::<u32>().map_err(|e| anyhow::anyhow!(e))?;
    if val == 0 || val > 65535 {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}

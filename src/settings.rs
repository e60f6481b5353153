use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

/// Scan parameters carried inside a start command and persisted between runs.
///
/// Mirrors the service's settings object. `ports` keeps the service's
/// comma-separated string form; parse with [`crate::ports::parse_ports_str`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ScanSettings {
    /// Probe intensity preset understood by the service.
    pub mode: String,
    /// Stop once this many targets are found; `None` scans until exhausted.
    pub target_count: Option<u64>,
    /// Latency filter window in milliseconds.
    pub ping_min: u64,
    pub ping_max: u64,
    pub ports: String,
    pub log_enabled: bool,
    pub debug_enabled: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            mode: "hyper".to_string(),
            target_count: Some(100),
            ping_min: 0,
            ping_max: 9999,
            ports: "443,80,8443,2053,2083,2087,2096".to_string(),
            log_enabled: true,
            debug_enabled: false,
        }
    }
}

/// Load settings from a JSON file, or defaults if the file does not exist.
pub fn load(path: impl AsRef<Path>) -> Result<ScanSettings> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(ScanSettings::default());
    }
    let file = File::open(path)
        .with_context(|| format!("failed to open settings file: {}", path.display()))?;
    serde_json::from_reader(file)
        .with_context(|| format!("failed to parse settings file: {}", path.display()))
}

/// Persist settings as pretty JSON.
pub fn save(path: impl AsRef<Path>, settings: &ScanSettings) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)
        .with_context(|| format!("failed to write settings file: {}", path.display()))?;
    serde_json::to_writer_pretty(file, settings)?;
    Ok(())
}

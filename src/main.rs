use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cdn_scan_client::channel::{self, ChannelConfig};
use cdn_scan_client::controller::{ControllerSnapshot, SessionController, StartRequest};
use cdn_scan_client::session::SessionState;
use cdn_scan_client::types::ScanMethod;
use cdn_scan_client::{ports, ranges, settings};

/// cdn-scan-client — drive a scan session on a remote CDN IP scan service and
/// follow its live event stream.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "cdn-scan-client",
    version,
    about = "Async session controller and live event-stream client for a remote CDN IP scan service.",
    long_about = None
)]
struct Cli {
    /// WebSocket endpoint of the scan service.
    #[arg(long, default_value = "ws://127.0.0.1:5000/events")]
    url: String,

    /// CIDR/IP to scan, or path to a file with ranges (one IP/CIDR per line).
    /// May be omitted for --method operators.
    #[arg(long)]
    ranges: Option<String>,

    /// Scan method: cloud, operators, or custom.
    #[arg(long, default_value = "cloud")]
    method: String,

    /// Path to a JSON settings file (created with defaults if absent).
    #[arg(long, default_value = "scan-settings.json")]
    settings: PathBuf,

    /// Override the settings port list (comma-separated, ranges allowed).
    #[arg(long)]
    ports: Option<String>,

    /// Override the found-target count at which the service stops.
    #[arg(long = "target-count")]
    target_count: Option<u64>,

    /// Wait this long for the channel to come up before giving up.
    #[arg(long = "connect-timeout-secs", default_value_t = 30)]
    connect_timeout_secs: u64,

    /// Write the final session snapshot as pretty JSON to this path.
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let method = parse_method(&cli.method)?;

    let mut scan_settings = settings::load(&cli.settings)?;
    if let Some(ports_str) = &cli.ports {
        // Validate eagerly so a typo fails here, not on the service.
        let parsed = ports::parse_ports_str(ports_str)?;
        scan_settings.ports = ports::ports_to_settings_str(&parsed);
    }
    if let Some(count) = cli.target_count {
        scan_settings.target_count = Some(count);
    }

    let range_list = match cli.ranges.as_deref() {
        Some(arg) => load_ranges(arg)?,
        None => Vec::new(),
    };
    if range_list.is_empty() && method != ScanMethod::Operators {
        bail!("no target ranges: pass --ranges (or use --method operators)");
    }

    println!("cdn-scan-client configuration:");
    println!("  url          : {}", cli.url);
    println!("  method       : {}", cli.method);
    println!(
        "  ranges       : {} ({} targets approx)",
        range_list.len(),
        ranges::count_targets(&range_list)
    );
    println!("  ports        : {}", scan_settings.ports);
    println!(
        "  target count : {}",
        scan_settings
            .target_count
            .map(|c| c.to_string())
            .unwrap_or_else(|| "unlimited".to_string())
    );

    let (handle, events) = channel::connect(ChannelConfig::new(&cli.url));
    let controller = Arc::new(SessionController::new(handle.clone()));
    let drain = tokio::spawn({
        let controller = controller.clone();
        async move { controller.drain(events).await }
    });

    // Wait for the channel before starting, otherwise the start command is
    // dropped on the floor and the session errors immediately.
    let mut view_rx = controller.subscribe();
    let connected = {
        let waited = tokio::time::timeout(
            Duration::from_secs(cli.connect_timeout_secs),
            view_rx.wait_for(|v| v.connected),
        )
        .await;
        matches!(waited, Ok(Ok(_)))
    };
    if !connected {
        handle.shutdown();
        bail!("could not reach scan service at {}", cli.url);
    }

    controller.start_scan(StartRequest {
        ranges: range_list,
        method,
        settings: scan_settings,
    })?;
    println!("Scan starting... (Ctrl+C to stop)");

    let mut last_found = 0u64;
    let mut last_percent = -1.0f64;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nStop requested, waiting for the service to wind down...");
                controller.stop_scan();
            }
            changed = view_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = view_rx.borrow_and_update().clone();
                let agg = &view.aggregate;
                if agg.found_count != last_found || agg.percent_complete != last_percent {
                    last_found = agg.found_count;
                    last_percent = agg.percent_complete;
                    println!(
                        "  {:>5.1}% | found {:>4} | {:>6.1} IP/s | latest {} | elapsed {:.0}s",
                        agg.percent_complete,
                        agg.found_count,
                        agg.throughput_per_second,
                        agg.latest_latency_ms
                            .map(|ms| format!("{ms:.0} ms"))
                            .unwrap_or_else(|| "—".to_string()),
                        agg.elapsed_seconds,
                    );
                }
                if matches!(view.state, SessionState::Completed | SessionState::Errored) {
                    break;
                }
            }
        }
    }

    let snapshot = controller.snapshot();
    print_results_table(&snapshot);

    if let Some(path) = cli.output.as_deref() {
        match write_snapshot_json(path, &snapshot) {
            Ok(()) => println!("Wrote JSON snapshot to {}", path.display()),
            Err(e) => eprintln!("Failed to write JSON to {}: {}", path.display(), e),
        }
    }

    handle.shutdown();
    let _ = drain.await;

    if snapshot.view.state == SessionState::Errored {
        bail!(
            "scan failed: {}",
            snapshot.view.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn parse_method(s: &str) -> Result<ScanMethod> {
    match s {
        "cloud" => Ok(ScanMethod::Cloud),
        "operators" => Ok(ScanMethod::Operators),
        "custom" => Ok(ScanMethod::Custom),
        other => bail!("unknown scan method: {other} (expected cloud|operators|custom)"),
    }
}

/// An argument that parses as an IP or CIDR is used directly; anything else is
/// treated as a path to a ranges file.
fn load_ranges(arg: &str) -> Result<Vec<String>> {
    let trimmed = arg.trim();
    if trimmed.parse::<std::net::IpAddr>().is_ok() || trimmed.parse::<ipnet::IpNet>().is_ok() {
        ranges::parse_ranges_str(trimmed)
    } else {
        ranges::load_ranges_from_path(trimmed)
    }
}

fn print_results_table(snapshot: &ControllerSnapshot) {
    let results = &snapshot.aggregate.results;
    let mut target_w = "target".len();
    let mut op_w = "operator".len();
    for r in results {
        target_w = target_w.max(r.target.len());
        if let Some(op) = &r.operator_label {
            op_w = op_w.max(op.chars().count().min(30));
        }
    }
    let lat_w = "latency_ms".len();
    let score_w = "score".len().max(5);

    println!(
        "\nSession {} {}: {} found (service reported {})",
        snapshot
            .view
            .session_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "—".to_string()),
        snapshot.view.state,
        snapshot.aggregate.view.found_count,
        snapshot
            .aggregate
            .reported_total_found
            .map(|n| n.to_string())
            .unwrap_or_else(|| "—".to_string()),
    );
    println!(
        "{:<target_w$}  {:>lat_w$}  {:>score_w$}  {:<op_w$}  ports",
        "target",
        "latency_ms",
        "score",
        "operator",
        target_w = target_w,
        lat_w = lat_w,
        score_w = score_w,
        op_w = op_w
    );
    println!(
        "{:-<target_w$}  {:-<lat_w$}  {:-<score_w$}  {:-<op_w$}  -----",
        "",
        "",
        "",
        "",
        target_w = target_w,
        lat_w = lat_w,
        score_w = score_w,
        op_w = op_w
    );
    for r in results {
        let lat = r
            .latency_ms
            .map(|ms| format!("{ms:.0}"))
            .unwrap_or_else(|| "—".to_string());
        let score = r
            .score
            .map(|s| format!("{s:.0}"))
            .unwrap_or_else(|| "—".to_string());
        let op = clip_label(r.operator_label.as_deref().unwrap_or_default(), 30);
        let ports = r
            .open_ports
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",");
        println!(
            "{:<target_w$}  {:>lat_w$}  {:>score_w$}  {:<op_w$}  {}",
            r.target,
            lat,
            score,
            op,
            ports,
            target_w = target_w,
            lat_w = lat_w,
            score_w = score_w,
            op_w = op_w
        );
    }
}

/// Clip a label to at most `max` characters. Operator names are non-ASCII,
/// so the cut happens on characters, never bytes.
fn clip_label(label: &str, max: usize) -> String {
    label.chars().take(max).collect()
}

fn write_snapshot_json(path: &std::path::Path, snapshot: &ControllerSnapshot) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, snapshot)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_label_cuts_multibyte_names_on_char_boundaries() {
        let name = format!("X{}", "چ".repeat(40));
        let clipped = clip_label(&name, 30);
        assert_eq!(clipped.chars().count(), 30);
        assert!(clipped.starts_with('X'));

        assert_eq!(clip_label("Irancell", 30), "Irancell");
        assert_eq!(clip_label("", 30), "");
    }
}

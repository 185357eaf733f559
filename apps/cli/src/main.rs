mod progress;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use bleota_core::{DeviceAddress, OtaSession, SessionConfig};
use clap::Parser;
use tracing::{error, info};

use crate::progress::ProgressObserver;

#[derive(Parser, Debug)]
#[command(author, version, about = "Push firmware to an ESP32 over BLE", long_about = None)]
struct Args {
    /// Device MAC address (01:23:45:67:89:ab) or peripheral UUID
    device: String,

    /// Path to the firmware binary
    firmware: PathBuf,

    /// TOML file with session settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seconds to scan for the device
    #[arg(long)]
    scan_timeout: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install log subscriber: {e}");
    }

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    // Both checks happen before any radio activity. The verdict goes to
    // stdout as well as the log.
    if !DeviceAddress::is_valid(&args.device) {
        let msg = format!("Invalid Address: {}", args.device);
        println!("{msg}");
        anyhow::bail!(msg);
    }
    if !args.firmware.is_file() {
        let msg = format!("File not found: {}", args.firmware.display());
        println!("{msg}");
        anyhow::bail!(msg);
    }

    let config = build_config(&args)?;
    info!("Trying to start OTA update");

    let observer = Arc::new(ProgressObserver::new(!args.verbose));
    let report = OtaSession::with_observer(config, observer).run().await?;

    println!("OTA result: {}", report.result);
    println!(
        "Sent {} blocks ({} bytes) in {:.1}s",
        report.blocks_sent,
        report.image_len,
        report.elapsed.as_secs_f64()
    );
    Ok(())
}

/// Config file values first, then the command line on top.
fn build_config(args: &Args) -> anyhow::Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => SessionConfig::default(),
    };
    config.address = args.device.clone();
    config.firmware_path = args.firmware.display().to_string();
    if let Some(secs) = args.scan_timeout {
        config.scan_timeout_secs = secs;
    }
    Ok(config)
}

fn load_config(path: &Path) -> anyhow::Result<SessionConfig> {
    SessionConfig::load_from_file(path)
        .with_context(|| format!("Failed to load config {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ota.toml");
        std::fs::write(
            &path,
            "address = \"00:00:00:00:00:00\"\nscan_timeout_secs = 5\nsettle_ms = 0\n",
        )
        .unwrap();

        let args = Args::parse_from([
            "bleota",
            "24:6F:28:AE:F6:B6",
            "fw.bin",
            "--config",
            path.to_str().unwrap(),
            "--scan-timeout",
            "9",
        ]);
        let config = build_config(&args).unwrap();
        assert_eq!(config.address, "24:6F:28:AE:F6:B6");
        assert_eq!(config.firmware_path, "fw.bin");
        assert_eq!(config.scan_timeout_secs, 9);
        assert_eq!(config.settle_ms, 0);
    }

    #[test]
    fn test_defaults_without_config_file() {
        let args = Args::parse_from(["bleota", "24:6F:28:AE:F6:B6", "fw.bin"]);
        let config = build_config(&args).unwrap();
        assert_eq!(config.scan_timeout_secs, SessionConfig::default().scan_timeout_secs);
    }
}

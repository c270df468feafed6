//! fatigue-monitor: replay a directory of cabin camera frames through the monitor
//!
//! Usage: fatigue-monitor <frames-dir> [config-file]
//!
//! Keys on stdin: `r` reset, `c` recalibrate, `q` quit.

use std::path::PathBuf;

use anyhow::{bail, Context};
use camera_capture::ImageSequenceSource;
use pipeline::control::spawn_key_reader;
use pipeline::{init_logging, run, ControlCommand, FatigueSession, SystemConfig};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let Some(frames_dir) = args.next().map(PathBuf::from) else {
        bail!("usage: fatigue-monitor <frames-dir> [config-file]");
    };
    let config_path = args.next().map(PathBuf::from);

    let config = SystemConfig::load(config_path.as_deref()).context("loading configuration")?;
    init_logging(config.logging.json)?;

    info!("=== Fatigue Monitor v{} ===", env!("CARGO_PKG_VERSION"));

    let mut session = FatigueSession::new(&config).context("starting perception backends")?;
    let mut source = ImageSequenceSource::open(&frames_dir, config.capture.clone())
        .with_context(|| format!("opening {}", frames_dir.display()))?;

    let (tx, mut rx) = mpsc::channel(16);

    let ctrl_c = tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = ctrl_c.send(ControlCommand::Stop).await;
        }
    });

    spawn_key_reader(std::io::BufReader::new(std::io::stdin()), tx)
        .context("starting key reader")?;

    let max_errors = config.session.max_consecutive_capture_errors;
    let summary = tokio::task::spawn_blocking(move || {
        run(&mut session, &mut source, &mut rx, max_errors, |report| {
            match serde_json::to_string(report) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to serialise frame report: {}", e),
            }
        })
    })
    .await??;

    info!("Session summary: {}", serde_json::to_string(&summary)?);
    Ok(())
}

//! Frame loop and asynchronous control commands

use std::io::BufRead;
use std::thread::{self, JoinHandle};

use camera_capture::{CaptureError, FrameSource};
use fatigue::{FatigueError, FatigueState};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{error, info, warn};

use crate::session::{FatigueSession, FrameReport, SessionStats};
use crate::PipelineError;

/// Operator requests, applied between two frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    /// Clear closure history, yawn count, gaze timer and nods
    Reset,
    /// Re-run calibration from the next frame
    Recalibrate,
    Stop,
}

impl ControlCommand {
    /// Keyboard mapping used by the binary: `r` reset, `c` recalibrate, `q` quit
    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim() {
            "r" | "reset" => Some(ControlCommand::Reset),
            "c" | "calibrate" | "recalibrate" => Some(ControlCommand::Recalibrate),
            "q" | "quit" | "stop" => Some(ControlCommand::Stop),
            _ => None,
        }
    }
}

/// Forward key lines from `reader` as commands on a dedicated OS thread.
///
/// Blocking reads stay off the async runtime, so a pending stdin read never
/// holds up shutdown. The thread ends at end of input or once the receiver
/// is dropped.
pub fn spawn_key_reader<R>(
    reader: R,
    tx: mpsc::Sender<ControlCommand>,
) -> std::io::Result<JoinHandle<()>>
where
    R: BufRead + Send + 'static,
{
    thread::Builder::new().name("key-reader".into()).spawn(move || {
        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("Command input closed: {}", e);
                    break;
                }
            };
            match ControlCommand::from_key(&line) {
                Some(cmd) => {
                    if tx.blocking_send(cmd).is_err() {
                        break;
                    }
                }
                None => warn!("Unknown command {:?} (r = reset, c = recalibrate, q = quit)", line),
            }
        }
    })
}

/// How a run ended
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub stats: SessionStats,
    pub capture_errors: u64,
    pub final_state: FatigueState,
    /// Stopped by command rather than end of stream
    pub stopped: bool,
}

/// Drive `session` from `source` until the stream ends or `Stop` arrives.
///
/// Commands are drained before every frame. Out-of-order frames are skipped;
/// capture errors are tolerated up to the configured run of consecutive
/// failures. `on_report` sees every processed frame.
pub fn run<S, F>(
    session: &mut FatigueSession,
    source: &mut S,
    commands: &mut mpsc::Receiver<ControlCommand>,
    max_consecutive_capture_errors: u32,
    mut on_report: F,
) -> Result<RunSummary, PipelineError>
where
    S: FrameSource + ?Sized,
    F: FnMut(&FrameReport),
{
    let mut capture_errors = 0u64;
    let mut consecutive_errors = 0u32;
    let mut final_state = FatigueState::InsufficientEvidence;
    let mut stopped = false;

    'frames: loop {
        loop {
            match commands.try_recv() {
                Ok(ControlCommand::Reset) => session.reset(),
                Ok(ControlCommand::Recalibrate) => session.recalibrate(),
                Ok(ControlCommand::Stop) => {
                    info!("Stop requested");
                    stopped = true;
                    break 'frames;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        let frame = match source.next_frame() {
            Ok(frame) => {
                consecutive_errors = 0;
                frame
            }
            Err(CaptureError::NoFrameAvailable) => {
                info!("Frame source exhausted");
                break;
            }
            Err(e) => {
                capture_errors += 1;
                consecutive_errors += 1;
                warn!("Capture failed ({} in a row): {}", consecutive_errors, e);
                if consecutive_errors >= max_consecutive_capture_errors {
                    error!("Giving up after {} consecutive capture errors", consecutive_errors);
                    return Err(e.into());
                }
                continue;
            }
        };

        match session.process(&frame) {
            Ok(report) => {
                final_state = report.state();
                on_report(&report);
            }
            Err(PipelineError::Fatigue(FatigueError::TimestampOrder { .. })) => continue,
            Err(e) => return Err(e),
        }
    }

    let summary = RunSummary {
        stats: session.stats(),
        capture_errors,
        final_state,
        stopped,
    };
    info!(
        "Run finished: {} frames ({} without face, {} rejected), {} capture errors, final state {}",
        summary.stats.frames,
        summary.stats.faceless_frames,
        summary.stats.rejected_frames,
        summary.capture_errors,
        summary.final_state
    );
    Ok(summary)
}

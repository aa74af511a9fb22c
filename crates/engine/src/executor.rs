//! Compression adapter: builds and runs ffmpeg jobs and classifies outcomes.
//!
//! The external encoder writes to a temporary sibling of the final output;
//! the orchestrator renames it into place on success. Stderr is streamed to
//! pick up progress lines and the hardware-session-rejection phrases that
//! distinguish a recoverable capability limit from a fatal failure.

use crate::events::{Event, EventBus, EventPayload};
use async_trait::async_trait;
use regex::Regex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Phrases in encoder output that indicate the accelerator rejected a new
/// concurrent session rather than failing on the input itself.
pub const HW_CAP_PHRASES: &[&str] = &[
    "OpenEncodeSessionEx failed",
    "Could not open encoder",
    "Hardware is lacking required capabilities",
];

/// How many trailing stderr lines are kept for failure reporting.
const STDERR_TAIL_LINES: usize = 40;

/// Classified result of one encoder invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecOutcome {
    /// Encoder exited cleanly; the temporary output is complete.
    Success,
    /// The accelerator refused a new session; recoverable via backoff.
    HwCapLimit(String),
    /// Encoder failed on this input.
    Failed(String),
    /// The per-job wall-clock cap expired; the encoder was killed.
    Timeout,
}

/// Resolved parameters for one encoder invocation.
#[derive(Debug, Clone)]
pub struct CompressRequest {
    /// Source video file.
    pub input_path: PathBuf,
    /// Temporary output path; renamed onto the final path by the caller.
    pub tmp_path: PathBuf,
    /// Constant quality value.
    pub quality: u8,
    /// Rotation angle in degrees (0, 90, 180, 270).
    pub rotation: u16,
    /// GPU encoder (av1_nvenc) vs CPU encoder (libsvtav1).
    pub use_gpu: bool,
    /// Map container metadata onto the output.
    pub copy_metadata: bool,
    /// Source duration in seconds, for progress percentages (0 disables).
    pub duration_secs: f64,
    /// Wall-clock cap for the whole invocation.
    pub timeout: Duration,
}

/// Check if encoder output contains a hardware-session-rejection phrase.
pub fn is_hw_cap_error(output: &str) -> bool {
    HW_CAP_PHRASES.iter().any(|phrase| output.contains(phrase))
}

/// Map a rotation angle to an ffmpeg video filter.
fn rotation_filter(angle: u16) -> Option<&'static str> {
    match angle {
        180 => Some("hflip,vflip"),
        90 => Some("transpose=1"),
        270 => Some("transpose=2"),
        _ => None,
    }
}

/// Parse the seconds processed from an ffmpeg progress line
/// (`... time=00:01:23.45 ...`).
pub fn parse_progress_seconds(line: &str) -> Option<f64> {
    static TIME_RE: OnceLock<Regex> = OnceLock::new();
    let re = TIME_RE
        .get_or_init(|| Regex::new(r"time=(\d+):(\d+):(\d+(?:\.\d+)?)").expect("valid regex"));

    let caps = re.captures(line)?;
    let hours: f64 = caps.get(1)?.as_str().parse().ok()?;
    let minutes: f64 = caps.get(2)?.as_str().parse().ok()?;
    let seconds: f64 = caps.get(3)?.as_str().parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Build the ffmpeg command for a request.
///
/// Returned as a std `Command` so tests can inspect the argument list; the
/// runner converts it for async execution.
pub fn build_ffmpeg_command(req: &CompressRequest) -> std::process::Command {
    let mut cmd = std::process::Command::new("ffmpeg");

    if req.use_gpu {
        cmd.args(["-vsync", "0", "-hwaccel", "cuda"]);
    }

    // Regenerate timestamps; some camera files carry broken DTS.
    cmd.args(["-fflags", "+genpts+igndts", "-avoid_negative_ts", "make_zero"]);
    cmd.arg("-i").arg(&req.input_path);

    if let Some(filter) = rotation_filter(req.rotation) {
        cmd.args(["-vf", filter]);
    }

    if req.use_gpu {
        cmd.args(["-c:v", "av1_nvenc", "-preset", "p7"]);
        cmd.arg("-cq").arg(req.quality.to_string());
        cmd.args(["-b:v", "0"]);
    } else {
        cmd.args(["-c:v", "libsvtav1", "-preset", "8"]);
        cmd.arg("-crf").arg(req.quality.to_string());
    }

    cmd.args(["-c:a", "copy"]);

    if req.copy_metadata {
        cmd.args(["-map_metadata", "0"]);
    }

    cmd.args(["-f", "mp4"]);
    cmd.arg(&req.tmp_path);
    cmd.args(["-y", "-hide_banner", "-loglevel", "error", "-stats"]);

    cmd
}

/// Seam between the orchestrator and the external encoder.
///
/// The production implementation shells out to ffmpeg; tests substitute a
/// scripted runner so end-to-end orchestration can be exercised without the
/// tool.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job_id: &str, req: &CompressRequest) -> ExecOutcome;
}

/// Production runner invoking ffmpeg and publishing progress events.
pub struct FfmpegRunner {
    bus: Arc<EventBus>,
}

impl FfmpegRunner {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl JobRunner for FfmpegRunner {
    async fn run(&self, job_id: &str, req: &CompressRequest) -> ExecOutcome {
        let mut cmd = tokio::process::Command::from(build_ffmpeg_command(req));
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return ExecOutcome::Failed(format!("failed to spawn ffmpeg: {}", e)),
        };

        // Drain stderr concurrently: progress lines become events, the tail
        // is kept for failure classification.
        let stderr_task = child.stderr.take().map(|stderr| {
            let bus = self.bus.clone();
            let job_id = job_id.to_string();
            let duration = req.duration_secs;
            tokio::spawn(async move {
                let mut tail: VecDeque<String> = VecDeque::new();
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if duration > 0.0 {
                        if let Some(seconds) = parse_progress_seconds(&line) {
                            let percent = (seconds / duration * 100.0).clamp(0.0, 100.0);
                            bus.publish(&Event::new(EventPayload::JobProgress {
                                job_id: job_id.clone(),
                                percent,
                            }));
                        }
                    }
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                tail.into_iter().collect::<Vec<_>>().join("\n")
            })
        });

        let status = match tokio::time::timeout(req.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                if let Some(task) = stderr_task {
                    task.abort();
                }
                return ExecOutcome::Failed(format!("failed to wait for ffmpeg: {}", e));
            }
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                if let Some(task) = stderr_task {
                    task.abort();
                }
                return ExecOutcome::Timeout;
            }
        };

        let stderr_text = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        // Session rejection is checked before the exit code: the phrase is
        // authoritative for backoff regardless of how the process died.
        if is_hw_cap_error(&stderr_text) {
            return ExecOutcome::HwCapLimit(stderr_text);
        }

        if status.success() {
            ExecOutcome::Success
        } else if stderr_text.is_empty() {
            ExecOutcome::Failed(format!("ffmpeg exited with status {}", status))
        } else {
            ExecOutcome::Failed(stderr_text)
        }
    }
}

//! ffmpeg/ffprobe frame sampling for on-screen text extraction.
use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use anyhow::{Context, Result, bail};
use tokio::process::Command;
use tracing::debug;

use crate::util::text::preview;

#[derive(Debug, Clone)]
pub(crate) struct FrameSampler {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    interval_secs: f64,
    max_frames: usize,
}

impl FrameSampler {
    pub(crate) fn new(
        ffmpeg: impl Into<PathBuf>,
        ffprobe: impl Into<PathBuf>,
        interval_secs: f64,
        max_frames: usize,
    ) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            interval_secs,
            max_frames,
        }
    }

    /// Timestamps to sample for `video`, using the known duration when the
    /// caller has one and ffprobe otherwise.
    pub(crate) async fn timestamps(&self, video: &Path, known: Option<f64>) -> Vec<f64> {
        let duration = match known {
            Some(duration) => Some(duration),
            None => match self.probe_duration(video).await {
                Ok(duration) => duration,
                Err(error) => {
                    debug!(error = %format!("{error:#}"), "ffprobe failed, sampling first frame only");
                    None
                }
            },
        };
        frame_timestamps(duration, self.interval_secs, self.max_frames)
    }

    /// Container duration in seconds as reported by ffprobe.
    pub(crate) async fn probe_duration(&self, video: &Path) -> Result<Option<f64>> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(video)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to spawn {}", self.ffprobe.display()))?;

        if !output.status.success() {
            bail!(
                "ffprobe exited with {}: {}",
                output.status,
                preview(String::from_utf8_lossy(&output.stderr).trim(), 300)
            );
        }

        Ok(parse_duration(&String::from_utf8_lossy(&output.stdout)))
    }

    /// One JPEG frame at `timestamp` seconds, read from ffmpeg's stdout.
    pub(crate) async fn extract_frame(&self, video: &Path, timestamp: f64) -> Result<Vec<u8>> {
        let output = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-ss"])
            .arg(format!("{timestamp:.3}"))
            .arg("-i")
            .arg(video)
            .args(["-frames:v", "1", "-f", "image2", "-vcodec", "mjpeg", "pipe:1"])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to spawn {}", self.ffmpeg.display()))?;

        if !output.status.success() {
            bail!(
                "ffmpeg exited with {} at {timestamp}s: {}",
                output.status,
                preview(String::from_utf8_lossy(&output.stderr).trim(), 300)
            );
        }
        if output.stdout.is_empty() {
            bail!("ffmpeg produced no frame at {timestamp}s");
        }
        Ok(output.stdout)
    }
}

/// `0, interval, 2·interval, …` strictly below `duration`, capped at
/// `max_frames`. Unknown or zero duration samples the first frame only.
pub(crate) fn frame_timestamps(duration: Option<f64>, interval: f64, max_frames: usize) -> Vec<f64> {
    if max_frames == 0 {
        return Vec::new();
    }
    let Some(duration) = duration.filter(|d| d.is_finite() && *d > 0.0) else {
        return vec![0.0];
    };
    if !(interval.is_finite() && interval > 0.0) {
        return vec![0.0];
    }

    let mut timestamps = Vec::new();
    let mut step = 0_u32;
    loop {
        let t = f64::from(step) * interval;
        if t >= duration || timestamps.len() >= max_frames {
            break;
        }
        timestamps.push(t);
        step += 1;
    }
    timestamps
}

fn parse_duration(stdout: &str) -> Option<f64> {
    stdout
        .lines()
        .find_map(|line| line.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
}

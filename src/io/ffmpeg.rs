//! Frame access for containers produced by the external backend, via `ffprobe`/`ffmpeg`.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crate::codec::Raster;
use crate::error::{MemvidError, Result};
use crate::process::{Completion, run_with_timeout};
use crate::types::FrameNumber;

#[derive(Debug, Clone)]
pub struct FfmpegReader {
    path: PathBuf,
    frames: u64,
    timeout: Duration,
}

impl FfmpegReader {
    /// Count the video packets with `ffprobe`. Fails when the tool is missing or the file is
    /// not a video it understands.
    pub fn open(path: &Path, timeout: Duration) -> Result<Self> {
        let mut probe = Command::new("ffprobe");
        probe
            .args(["-v", "error", "-select_streams", "v:0", "-count_packets"])
            .args(["-show_entries", "stream=nb_read_packets", "-of", "csv=p=0"])
            .arg(path);
        let invalid = |reason: String| MemvidError::InvalidContainer {
            path: path.to_path_buf(),
            reason,
        };
        let output = match run_with_timeout(&mut probe, timeout)? {
            Completion::Exited(output) if output.status.success() => output,
            Completion::Exited(output) => {
                return Err(invalid(format!("ffprobe failed: {}", output.stderr.trim())));
            }
            Completion::TimedOut => return Err(invalid("ffprobe timed out".into())),
        };
        let text = String::from_utf8_lossy(&output.stdout);
        let frames = text
            .trim()
            .trim_end_matches(',')
            .parse::<u64>()
            .map_err(|_| invalid(format!("unexpected ffprobe output '{}'", text.trim())))?;
        Ok(Self {
            path: path.to_path_buf(),
            frames,
            timeout,
        })
    }

    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Decode frame `n` to a grayscale raster. `None` on any failure, including timeout.
    pub fn frame(&self, n: FrameNumber) -> Option<Raster> {
        if n >= self.frames {
            return None;
        }
        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-v", "error", "-i"])
            .arg(&self.path)
            .args(["-vf", &format!("select=eq(n\\,{n})")])
            .args(["-vsync", "0", "-vframes", "1"])
            .args(["-f", "image2pipe", "-vcodec", "png", "-"]);

        match run_with_timeout(&mut cmd, self.timeout) {
            Ok(completion) => {
                let output = completion.success()?;
                image::load_from_memory(&output.stdout)
                    .ok()
                    .map(|img| img.to_luma8())
            }
            Err(err) => {
                tracing::debug!(
                    target = "memvid::container",
                    path = %self.path.display(),
                    frame = n,
                    error = %err,
                    "ffmpeg unavailable"
                );
                None
            }
        }
    }
}

//! Still capture and deterministic video recording.
//!
//! Recording never looks at the wall clock: the timeline hands out
//! `frame / fps` timestamps, so a session that renders slower than real time
//! still produces a video whose motion matches its nominal duration. Frames
//! are streamed as raw RGBA into an `ffmpeg` child process; there is no
//! built-in encoder, `ffmpeg` on `PATH` is a runtime prerequisite for video
//! export.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ChildStdin;

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use ffmpeg_sidecar::child::FfmpegChild;
use ffmpeg_sidecar::command::FfmpegCommand;
use image::DynamicImage;

use crate::runtime::{FixedStepTimeSource, TimeSample, TimeSource};
use crate::types::{CaptureFormat, VideoConfig};

/// Fixed render resolution while a recording is active.
pub const RECORD_DIMS: (u32, u32) = (1920, 1080);
/// Fixed render resolution for one-shot still captures.
pub const CAPTURE_DIMS: (u32, u32) = (3840, 2160);

/// Deterministic frame timeline for one recording session.
#[derive(Debug, Clone, Copy)]
pub struct RecordTimeline {
    source: FixedStepTimeSource,
    fps: f32,
    total_frames: u32,
}

impl RecordTimeline {
    pub fn new(fps: f32, duration_secs: f32) -> Self {
        let total_frames = (fps * duration_secs).round().max(0.0) as u32;
        Self {
            source: FixedStepTimeSource::new(fps),
            fps,
            total_frames,
        }
    }

    /// Hands out the next simulated timestamp, or `None` once the configured
    /// duration has been reached.
    pub fn next_sample(&mut self) -> Option<TimeSample> {
        if self.finished() {
            None
        } else {
            Some(self.source.sample())
        }
    }

    pub fn frames_emitted(&self) -> u32 {
        self.source.frame() as u32
    }

    pub fn total_frames(&self) -> u32 {
        self.total_frames
    }

    pub fn finished(&self) -> bool {
        self.source.frame() >= u64::from(self.total_frames)
    }

    /// Seconds of simulated timeline still to render.
    pub fn time_left(&self) -> f32 {
        (self.total_frames.saturating_sub(self.frames_emitted())) as f32 / self.fps
    }
}

/// Raw-RGBA-to-mp4 encoder wrapping an `ffmpeg` child process.
pub struct VideoEncoder {
    child: FfmpegChild,
    stdin: Option<BufWriter<ChildStdin>>,
    path: PathBuf,
    frame_bytes: usize,
}

impl VideoEncoder {
    pub fn start(path: PathBuf, dims: (u32, u32), fps: f32, bitrate_kbps: u32) -> Result<Self> {
        let (width, height) = dims;
        let mut cmd = FfmpegCommand::new();
        cmd.args(["-y"])
            .args(["-f", "rawvideo"])
            .args(["-pix_fmt", "rgba"])
            .args(["-s", &format!("{width}x{height}")])
            .args(["-r", &fps.to_string()])
            .args(["-i", "pipe:0"])
            .args(["-c:v", "libx264"])
            .args(["-b:v", &format!("{bitrate_kbps}k")])
            .args(["-pix_fmt", "yuv420p"])
            .args(["-movflags", "+faststart"])
            .arg(path.as_os_str().to_string_lossy().as_ref());

        let mut child = cmd
            .spawn()
            .context("failed to spawn ffmpeg; video export needs ffmpeg on PATH")?;
        let stdin = child
            .take_stdin()
            .ok_or_else(|| anyhow!("ffmpeg child did not expose stdin"))?;

        tracing::info!(path = %path.display(), width, height, fps, "recording started");
        Ok(Self {
            child,
            stdin: Some(BufWriter::new(stdin)),
            path,
            frame_bytes: (width * height * 4) as usize,
        })
    }

    /// Streams one tightly-packed RGBA frame into the encoder.
    pub fn write_frame(&mut self, rgba: &[u8]) -> Result<()> {
        if rgba.len() != self.frame_bytes {
            anyhow::bail!(
                "frame size mismatch: got {} bytes, expected {}",
                rgba.len(),
                self.frame_bytes
            );
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("encoder already finished"))?;
        stdin
            .write_all(rgba)
            .context("failed to stream frame to ffmpeg")?;
        Ok(())
    }

    /// Closes stdin to signal EOF, waits for the encoder, and returns the
    /// finished file path. Chunks encoded so far are always flushed.
    pub fn finish(mut self) -> Result<PathBuf> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.flush().context("failed to flush ffmpeg stdin")?;
        }
        let status = self
            .child
            .wait()
            .context("failed to wait for ffmpeg to exit")?;
        if !status.success() {
            anyhow::bail!("ffmpeg exited with {status}");
        }
        tracing::info!(path = %self.path.display(), "recording finalized");
        Ok(self.path)
    }
}

/// One in-flight recording: timeline, encoder, and the job's config.
pub struct RecordSession {
    pub timeline: RecordTimeline,
    pub encoder: VideoEncoder,
    pub config: VideoConfig,
}

impl RecordSession {
    pub fn start(output_dir: &Path, config: VideoConfig) -> Result<Self> {
        if config.fps <= 0.0 || config.duration_secs <= 0.0 {
            anyhow::bail!(
                "recording needs positive fps and duration (got fps={}, duration={}s)",
                config.fps,
                config.duration_secs
            );
        }
        let timeline = RecordTimeline::new(config.fps, config.duration_secs);
        let encoder = VideoEncoder::start(
            recording_path(output_dir),
            RECORD_DIMS,
            config.fps,
            config.bitrate_kbps,
        )?;
        Ok(Self {
            timeline,
            encoder,
            config,
        })
    }
}

/// Timestamped output path for a still capture.
pub fn capture_path(dir: &Path, format: CaptureFormat) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d-%H%M%S");
    let ext = match format {
        CaptureFormat::Png => "png",
        CaptureFormat::Jpeg(_) => "jpg",
    };
    dir.join(format!("capture-{stamp}.{ext}"))
}

/// Timestamped output path for a recording session.
pub fn recording_path(dir: &Path) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d-%H%M%S");
    dir.join(format!("recording-{stamp}.mp4"))
}

/// Encodes a tightly-packed RGBA readback to disk.
pub fn encode_still(
    path: &Path,
    width: u32,
    height: u32,
    rgba: Vec<u8>,
    format: CaptureFormat,
) -> Result<()> {
    let image = image::RgbaImage::from_raw(width, height, rgba)
        .ok_or_else(|| anyhow!("readback size does not match {width}x{height}"))?;
    match format {
        CaptureFormat::Png => image
            .save(path)
            .with_context(|| format!("failed to write {}", path.display()))?,
        CaptureFormat::Jpeg(quality) => {
            let rgb = DynamicImage::ImageRgba8(image).into_rgb8();
            let file = std::fs::File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            let mut writer = std::io::BufWriter::new(file);
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut writer, quality)
                .encode_image(&rgb)
                .context("failed to encode jpeg")?;
        }
    }
    tracing::info!(path = %path.display(), width, height, "still capture written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeline_emits_exactly_the_configured_frame_count() {
        let mut timeline = RecordTimeline::new(30.0, 5.0);
        assert_eq!(timeline.total_frames(), 150);

        let mut times = Vec::new();
        while let Some(sample) = timeline.next_sample() {
            times.push(sample.seconds);
        }
        assert_eq!(times.len(), 150);
        assert_eq!(times[0], 0.0);
        assert!((times[149] - 149.0 / 30.0).abs() < 1e-4);
        assert!(times[149] < 5.0);

        assert!(timeline.finished());
        assert_eq!(timeline.time_left(), 0.0);
        assert!(timeline.next_sample().is_none());
    }

    #[test]
    fn time_left_counts_down_to_zero() {
        let mut timeline = RecordTimeline::new(10.0, 1.0);
        assert!((timeline.time_left() - 1.0).abs() < 1e-6);
        timeline.next_sample();
        assert!((timeline.time_left() - 0.9).abs() < 1e-6);
        for _ in 0..9 {
            timeline.next_sample();
        }
        assert_eq!(timeline.time_left(), 0.0);
    }

    #[test]
    fn output_paths_carry_prefix_and_extension() {
        let dir = Path::new("/renders");
        let still = capture_path(dir, CaptureFormat::Png);
        let name = still.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("capture-"));
        assert!(name.ends_with(".png"));

        let jpeg = capture_path(dir, CaptureFormat::Jpeg(80));
        assert!(jpeg.to_string_lossy().ends_with(".jpg"));

        let video = recording_path(dir);
        let name = video.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("recording-"));
        assert!(name.ends_with(".mp4"));
    }

    #[test]
    fn still_encode_round_trips_through_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.png");
        let rgba = vec![255u8; 2 * 2 * 4];
        encode_still(&path, 2, 2, rgba, CaptureFormat::Png).unwrap();
        let loaded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(loaded.dimensions(), (2, 2));
        assert_eq!(loaded.get_pixel(1, 1).0, [255, 255, 255, 255]);
    }

    #[test]
    fn still_encode_rejects_mismatched_buffers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.png");
        let err = encode_still(&path, 4, 4, vec![0u8; 7], CaptureFormat::Png).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }
}

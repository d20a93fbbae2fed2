//! Container writer backed by the system `ffmpeg`.
//!
//! Spawns `ffmpeg` reading raw frames from stdin and muxing an H.264 MP4.
//! The rawvideo pipe is constant-rate: container timestamps come from the
//! track's frame rate, so per-sample timing is validated upstream and not
//! re-encoded here.

use crate::encode::{ContainerWriter, H264Profile, OutputHandle, TrackConfig};
use crate::foundation::core::{FrameTiming, PixelFormat};
use crate::frame::Frame;
use anyhow::Context as _;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

/// Options for [`FfmpegWriter`] MP4 output.
#[derive(Clone, Debug)]
pub struct FfmpegWriterOpts {
    /// Overwrite the output file if it already exists.
    pub overwrite: bool,
    /// Tune the encoder for live input (`-preset ultrafast -tune
    /// zerolatency`). Off for offline transcodes where size matters more.
    pub realtime: bool,
}

impl Default for FfmpegWriterOpts {
    fn default() -> Self {
        Self {
            overwrite: true,
            realtime: true,
        }
    }
}

/// Writer that spawns the system `ffmpeg` and streams raw frames to stdin.
pub struct FfmpegWriter {
    opts: FfmpegWriterOpts,

    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr_drain: Option<std::thread::JoinHandle<std::io::Result<Vec<u8>>>>,

    track: Option<TrackConfig>,
    out_path: Option<PathBuf>,
}

impl FfmpegWriter {
    /// Create a writer with the given options.
    pub fn new(opts: FfmpegWriterOpts) -> Self {
        Self {
            opts,
            child: None,
            stdin: None,
            stderr_drain: None,
            track: None,
            out_path: None,
        }
    }
}

impl ContainerWriter for FfmpegWriter {
    fn open(&mut self, path: &Path, track: &TrackConfig) -> anyhow::Result<()> {
        if track.fps.num == 0 || track.fps.den == 0 {
            anyhow::bail!("track fps must be non-zero");
        }
        if track.width == 0 || track.height == 0 {
            anyhow::bail!("track width/height must be non-zero");
        }
        if !track.width.is_multiple_of(2) || !track.height.is_multiple_of(2) {
            anyhow::bail!(
                "track width/height must be even (required for yuv420p mp4 output)"
            );
        }
        if track.bitrate_bps == 0 {
            anyhow::bail!("track bitrate must be non-zero");
        }

        ensure_parent_dir(path)?;
        if !self.opts.overwrite && path.exists() {
            anyhow::bail!("output file '{}' already exists", path.display());
        }

        if !is_ffmpeg_on_path() {
            anyhow::bail!("ffmpeg is required for MP4 encoding, but was not found on PATH");
        }

        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        if self.opts.overwrite {
            cmd.arg("-y");
        } else {
            cmd.arg("-n");
        }

        // Input: raw packed frames on stdin. For rawvideo, `-r` before `-i`
        // sets the input frame rate, which becomes the container timebase.
        cmd.args([
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            pix_fmt_arg(track.format),
            "-s",
            &format!("{}x{}", track.width, track.height),
            "-r",
            &format!("{}/{}", track.fps.num, track.fps.den),
            "-i",
            "pipe:0",
        ]);

        // Output: h264 + yuv420p for broad compatibility.
        cmd.args([
            "-an",
            "-c:v",
            "libx264",
            "-profile:v",
            profile_arg(track.profile),
            "-b:v",
            &track.bitrate_bps.to_string(),
        ]);
        if self.opts.realtime {
            cmd.args(["-preset", "ultrafast", "-tune", "zerolatency"]);
        }
        cmd.args(["-pix_fmt", "yuv420p", "-movflags", "+faststart"]);
        cmd.arg(path);

        let mut child = cmd
            .spawn()
            .context("failed to spawn ffmpeg (is it installed and on PATH?)")?;

        let stdin = child
            .stdin
            .take()
            .context("failed to open ffmpeg stdin (unexpected)")?;
        let mut stderr = child
            .stderr
            .take()
            .context("failed to open ffmpeg stderr (unexpected)")?;
        let stderr_drain = std::thread::spawn(move || {
            let mut stderr_bytes = Vec::new();
            stderr.read_to_end(&mut stderr_bytes)?;
            Ok(stderr_bytes)
        });

        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stderr_drain = Some(stderr_drain);
        self.track = Some(track.clone());
        self.out_path = Some(path.to_path_buf());
        Ok(())
    }

    fn is_ready_for_data(&self) -> bool {
        // The pipe applies its own backpressure; ready means writable.
        self.stdin.is_some()
    }

    fn append(&mut self, frame: &Frame, _timing: FrameTiming) -> anyhow::Result<()> {
        let track = self
            .track
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("ffmpeg writer not opened"))?;
        if frame.width() != track.width || frame.height() != track.height {
            anyhow::bail!(
                "frame size mismatch: got {}x{}, expected {}x{}",
                frame.width(),
                frame.height(),
                track.width,
                track.height
            );
        }
        if frame.format() != track.format {
            anyhow::bail!(
                "frame format mismatch: got {:?}, expected {:?}",
                frame.format(),
                track.format
            );
        }
        if !frame.buffer.has_valid_layout() {
            anyhow::bail!(
                "frame buffer layout is inconsistent: {}x{} stride {} len {}",
                frame.width(),
                frame.height(),
                frame.buffer.stride,
                frame.buffer.data.len()
            );
        }

        let Some(stdin) = self.stdin.as_mut() else {
            anyhow::bail!("ffmpeg writer input is already finished");
        };

        use std::io::Write as _;
        let packed = crate::frame::PixelBuffer::packed_stride(frame.width(), frame.format());
        let result = if frame.buffer.is_tightly_packed() {
            stdin.write_all(&frame.buffer.data[..packed * frame.height() as usize])
        } else {
            // Padded strides are written row by row, skipping the padding.
            (0..frame.height()).try_for_each(|y| match frame.buffer.row(y) {
                Some(row) => stdin.write_all(row),
                None => Err(std::io::Error::other("frame row out of range")),
            })
        };
        if let Err(err) = result {
            // A dead pipe means the child is gone; stop reporting ready.
            self.stdin = None;
            return Err(err).context("failed to write frame to ffmpeg stdin");
        }
        Ok(())
    }

    fn mark_input_finished(&mut self) -> anyhow::Result<()> {
        drop(self.stdin.take());
        Ok(())
    }

    fn finalize(&mut self) -> anyhow::Result<OutputHandle> {
        drop(self.stdin.take());
        let mut child = self
            .child
            .take()
            .ok_or_else(|| anyhow::anyhow!("ffmpeg writer not opened"))?;

        let status = child
            .wait()
            .context("failed to wait for ffmpeg to finish")?;
        let stderr_bytes = match self.stderr_drain.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| anyhow::anyhow!("ffmpeg stderr drain thread panicked"))?
                .context("ffmpeg stderr read failed")?,
            None => Vec::new(),
        };

        let path = self
            .out_path
            .clone()
            .ok_or_else(|| anyhow::anyhow!("ffmpeg writer has no output path"))?;

        if !status.success() {
            // Whatever ffmpeg left behind is not a playable file.
            let _ = std::fs::remove_file(&path);
            let stderr = String::from_utf8_lossy(&stderr_bytes);
            anyhow::bail!("ffmpeg exited with status {}: {}", status, stderr.trim());
        }

        Ok(OutputHandle { path })
    }
}

fn pix_fmt_arg(format: PixelFormat) -> &'static str {
    match format {
        PixelFormat::Bgra8 => "bgra",
        PixelFormat::Rgba8 => "rgba",
    }
}

fn profile_arg(profile: H264Profile) -> &'static str {
    match profile {
        H264Profile::Baseline => "baseline",
        H264Profile::Main => "main",
        H264Profile::High => "high",
    }
}

/// Ensure the parent directory of `path` exists.
pub fn ensure_parent_dir(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

/// Return `true` when `ffmpeg` can be invoked from `PATH`.
pub fn is_ffmpeg_on_path() -> bool {
    std::process::Command::new("ffmpeg")
        .arg("-version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::detection::Frame;
use crate::VisionError;

/// Anything that hands the loop decoded frames. `Ok(None)` means the stream has ended.
pub trait FrameSource {
    fn next_frame(&mut self) -> impl Future<Output = Result<Option<Frame>>>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    pub mode: String,   // "libcamera-jpeg" | "v4l2-mjpeg"
    #[serde(default = "default_device")]
    pub device: String, // /dev/video0 (v4l2)
    pub width: u32,
    pub height: u32,
}

fn default_device() -> String {
    "/dev/video0".into()
}

/// Pragmatic capture:
/// - libcamera-jpeg: call `libcamera-still -n -t 1 --width ... --height ... -o -`
///   returns a JPEG frame on stdout
/// - v4l2-mjpeg: call `ffmpeg` to grab a single MJPEG frame
pub async fn capture_jpeg(cfg: &CameraConfig) -> Result<Vec<u8>> {
    match cfg.mode.as_str() {
        "libcamera-jpeg" => capture_libcamera(cfg).await,
        "v4l2-mjpeg" => capture_v4l2_ffmpeg(cfg).await,
        other => anyhow::bail!("unknown camera.mode: {}", other),
    }
}

async fn capture_libcamera(cfg: &CameraConfig) -> Result<Vec<u8>> {
    let mut cmd = Command::new("libcamera-still");
    cmd.args([
        "-n",                 // no preview
        "-t", "1",            // 1ms
        "--width", &cfg.width.to_string(),
        "--height", &cfg.height.to_string(),
        "-o", "-",            // stdout
    ]);

    debug!("capture: libcamera-still");
    let out = cmd.output().await.context("run libcamera-still")?;
    anyhow::ensure!(out.status.success(), "libcamera-still failed");
    Ok(out.stdout)
}

async fn capture_v4l2_ffmpeg(cfg: &CameraConfig) -> Result<Vec<u8>> {
    let mut cmd = Command::new("ffmpeg");
    cmd.args([
        "-hide_banner","-loglevel","error",
        "-f","video4linux2",
        "-input_format","mjpeg",
        "-video_size",&format!("{}x{}", cfg.width, cfg.height),
        "-i",&cfg.device,
        "-vframes","1",
        "-f","image2pipe",
        "-vcodec","mjpeg",
        "-",
    ]);

    debug!("capture: ffmpeg v4l2");
    let out = cmd.output().await.context("run ffmpeg capture")?;
    anyhow::ensure!(out.status.success(), "ffmpeg capture failed");
    Ok(out.stdout)
}

fn decode(index: u64, bytes: &[u8]) -> Result<Frame> {
    let img = image::load_from_memory(bytes).context("decode frame")?;
    Ok(Frame::new(index, img.to_rgb8()))
}

/// Live camera, one captured still per frame.
pub struct CameraSource {
    cfg: CameraConfig,
    next_index: u64,
}

impl CameraSource {
    /// Grabs one frame up front so a missing or busy camera is reported before the loop starts.
    pub async fn open(cfg: CameraConfig) -> Result<Self, VisionError> {
        let probe = capture_jpeg(&cfg)
            .await
            .and_then(|jpeg| decode(0, &jpeg))
            .map_err(|e| VisionError::SourceUnavailable(format!("{} ({}): {e:#}", cfg.mode, cfg.device)))?;
        info!(
            mode = %cfg.mode,
            width = probe.image.width(),
            height = probe.image.height(),
            "camera: opened"
        );
        Ok(Self { cfg, next_index: 0 })
    }
}

impl FrameSource for CameraSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        let jpeg = capture_jpeg(&self.cfg).await?;
        let frame = decode(self.next_index, &jpeg)?;
        self.next_index += 1;
        Ok(Some(frame))
    }
}

const IMAGE_EXTS: &[&str] = &["png", "jpg", "jpeg"];

/// Still images from a directory, in file-name order.
pub struct ImageDirSource {
    files: Vec<PathBuf>,
    pos: usize,
    looping: bool,
    next_index: u64,
}

impl ImageDirSource {
    pub fn open(dir: impl AsRef<Path>, looping: bool) -> Result<Self, VisionError> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir)
            .map_err(|e| VisionError::SourceUnavailable(format!("{}: {e}", dir.display())))?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| IMAGE_EXTS.contains(&e.to_ascii_lowercase().as_str()))
            })
            .collect();
        files.sort();
        if files.is_empty() {
            return Err(VisionError::SourceUnavailable(format!("{}: no images", dir.display())));
        }
        info!(dir = %dir.display(), frames = files.len(), looping, "image dir: opened");
        Ok(Self { files, pos: 0, looping, next_index: 0 })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageDirSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.pos >= self.files.len() {
            if !self.looping {
                return Ok(None);
            }
            self.pos = 0;
        }
        let path = &self.files[self.pos];
        self.pos += 1;
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("read {}", path.display()))?;
        let frame = decode(self.next_index, &bytes).with_context(|| path.display().to_string())?;
        self.next_index += 1;
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_png(dir: &Path, name: &str, w: u32, h: u32) {
        RgbImage::from_pixel(w, h, Rgb([1, 2, 3])).save(dir.join(name)).unwrap();
    }

    #[tokio::test]
    async fn dir_source_plays_in_name_order_then_ends() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "b.png", 4, 2);
        write_png(dir.path(), "a.png", 8, 6);
        std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

        let mut src = ImageDirSource::open(dir.path(), false).unwrap();
        assert_eq!(src.len(), 2);
        let f0 = src.next_frame().await.unwrap().unwrap();
        assert_eq!((f0.index, f0.image.width()), (0, 8));
        let f1 = src.next_frame().await.unwrap().unwrap();
        assert_eq!((f1.index, f1.image.width()), (1, 4));
        assert!(src.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn looping_dir_source_keeps_counting() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "only.png", 2, 2);
        let mut src = ImageDirSource::open(dir.path(), true).unwrap();
        for i in 0..3 {
            assert_eq!(src.next_frame().await.unwrap().unwrap().index, i);
        }
    }

    #[test]
    fn empty_dir_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ImageDirSource::open(dir.path(), false),
            Err(VisionError::SourceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn unknown_camera_mode_is_rejected() {
        let cfg = CameraConfig { mode: "carrier-pigeon".into(), device: default_device(), width: 640, height: 480 };
        let err = capture_jpeg(&cfg).await.unwrap_err();
        assert!(err.to_string().contains("carrier-pigeon"));
        assert!(matches!(CameraSource::open(cfg).await, Err(VisionError::SourceUnavailable(_))));
    }
}

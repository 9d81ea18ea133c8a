use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use serde::Deserialize;
use tracing::info;

use crate::detection::{FaceDetection, FaceDetector, Frame, ObjectDetection, ObjectDetector};
use crate::VisionError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplayFrame {
    pub frame: u64,
    #[serde(default)]
    pub objects: Vec<ObjectDetection>,
    #[serde(default)]
    pub faces: Vec<FaceDetection>,
}

/// Recorded detector output, one JSON object per line:
///
/// ```text
/// {"frame": 0, "objects": [{"bbox": {...}, "class": "cup", "score": 0.8}], "faces": [...]}
/// ```
///
/// Frames without a line produce no detections.
#[derive(Debug, Default)]
pub struct ReplayLog {
    frames: BTreeMap<u64, ReplayFrame>,
}

impl ReplayLog {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, VisionError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| VisionError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let log = Self::parse(&raw)?;
        info!(path = %path.display(), frames = log.len(), "replay: loaded detection log");
        Ok(log)
    }

    /// Blank lines and `#` comments are skipped.
    pub fn parse(raw: &str) -> Result<Self, VisionError> {
        let mut frames = BTreeMap::new();
        for (n, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let rec: ReplayFrame = serde_json::from_str(line)
                .map_err(|source| VisionError::ReplayLine { line: n + 1, source })?;
            frames.insert(rec.frame, rec);
        }
        Ok(Self { frames })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn get(&self, frame: u64) -> Option<&ReplayFrame> {
        self.frames.get(&frame)
    }
}

/// Object detector answering from a `ReplayLog` by frame index.
#[derive(Debug, Clone)]
pub struct ReplayObjectDetector {
    log: Arc<ReplayLog>,
}

impl ReplayObjectDetector {
    pub fn new(log: Arc<ReplayLog>) -> Self {
        Self { log }
    }
}

impl ObjectDetector for ReplayObjectDetector {
    async fn detect(&mut self, frame: &Frame) -> Result<Vec<ObjectDetection>> {
        Ok(self.log.get(frame.index).map(|f| f.objects.clone()).unwrap_or_default())
    }
}

/// Face detector answering from a `ReplayLog` by frame index.
#[derive(Debug, Clone)]
pub struct ReplayFaceDetector {
    log: Arc<ReplayLog>,
}

impl ReplayFaceDetector {
    pub fn new(log: Arc<ReplayLog>) -> Self {
        Self { log }
    }
}

impl FaceDetector for ReplayFaceDetector {
    async fn detect_faces(&mut self, frame: &Frame) -> Result<Vec<FaceDetection>> {
        Ok(self.log.get(frame.index).map(|f| f.faces.clone()).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Gender;
    use image::RgbImage;

    const LOG: &str = r#"
# recorded at the museum entrance
{"frame": 0, "objects": [{"bbox": {"x": 100, "y": 100, "width": 200, "height": 150}, "class": "cup", "score": 0.8}]}
{"frame": 2, "faces": [{"bbox": {"x": 1, "y": 2, "width": 3, "height": 4}, "descriptor": [0.1, 0.2], "age": 40, "gender": "male"}]}
"#;

    #[tokio::test]
    async fn answers_by_frame_index() {
        let log = Arc::new(ReplayLog::parse(LOG).unwrap());
        assert_eq!(log.len(), 2);
        let mut objects = ReplayObjectDetector::new(log.clone());
        let mut faces = ReplayFaceDetector::new(log);

        let f0 = Frame::new(0, RgbImage::new(4, 4));
        assert_eq!(objects.detect(&f0).await.unwrap()[0].class, "cup");
        assert!(faces.detect_faces(&f0).await.unwrap().is_empty());

        let f1 = Frame::new(1, RgbImage::new(4, 4));
        assert!(objects.detect(&f1).await.unwrap().is_empty());

        let f2 = Frame::new(2, RgbImage::new(4, 4));
        assert_eq!(faces.detect_faces(&f2).await.unwrap()[0].gender, Gender::Male);
    }

    #[test]
    fn bad_line_reports_line_number() {
        let err = ReplayLog::parse("{\"frame\": 0}\nnot json\n").unwrap_err();
        assert!(matches!(err, VisionError::ReplayLine { line: 2, .. }), "{err}");
    }
}

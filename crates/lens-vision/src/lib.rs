pub mod camera;
pub mod catalog;
pub mod detection;
pub mod geometry;
pub mod hit;
pub mod render;
pub mod replay;
pub mod session;
pub mod sink;
pub mod tracker;

pub use catalog::Catalog;
pub use detection::{FaceDetection, FaceDetector, Frame, Gender, ObjectDetection, ObjectDetector};
pub use geometry::{BBox, Resolution};
pub use hit::{CanvasGeometry, HitShape, RenderedRegion};
pub use render::{OverlayRenderer, RenderConfig};
pub use session::{DetectionLoop, LoopConfig, PointerEvent, Session};
pub use tracker::{FaceId, FaceTracker, TrackedFace, TrackingConfig};

#[derive(thiserror::Error, Debug)]
pub enum VisionError {
    #[error("read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("catalog json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("replay line {line}: {source}")]
    ReplayLine {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("video source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("detector unavailable: {0}")]
    DetectorUnavailable(String),
}

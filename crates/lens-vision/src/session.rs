use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use lens_proto::events::{EventKind, OverlayEvent};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::camera::FrameSource;
use crate::catalog::Catalog;
use crate::detection::{
    map_faces, map_objects, FaceDetection, FaceDetector, Frame, ObjectDetection, ObjectDetector,
};
use crate::hit::{CanvasGeometry, InteractionState, Point, RegionKind, RenderedRegion, CLICK_TIMEOUT};
use crate::render::OverlayRenderer;
use crate::sink::EventSink;
use crate::tracker::{FaceTracker, TrackedFace, TrackingConfig};

/// Shortest tick the loop will schedule.
pub const MIN_FRAME_INTERVAL: Duration = Duration::from_millis(1);

/// Raw press in client coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub client_x: f32,
    pub client_y: f32,
}

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub canvas: CanvasGeometry,
    pub tracking: TrackingConfig,
    pub click_timeout: Duration,
    pub frame_interval: Duration,
    pub max_frames: Option<u64>,
    /// Hand every Nth rendered canvas to the sink.
    pub snapshot_every: Option<u64>,
    /// Fixed seed for ids and description picks.
    pub seed: Option<u64>,
}

impl LoopConfig {
    pub fn new(canvas: CanvasGeometry) -> Self {
        Self {
            canvas,
            tracking: TrackingConfig::default(),
            click_timeout: CLICK_TIMEOUT,
            frame_interval: Duration::from_millis(33),
            max_frames: None,
            snapshot_every: None,
            seed: None,
        }
    }

    /// Tick length for a target frame rate, never shorter than `MIN_FRAME_INTERVAL`.
    /// Non-finite, non-positive or vanishingly small rates yield `None`.
    pub fn interval_for_fps(fps: f32) -> Option<Duration> {
        if !fps.is_finite() || fps <= 0.0 {
            return None;
        }
        let period = Duration::try_from_secs_f64(1.0 / fps as f64).ok()?;
        Some(period.max(MIN_FRAME_INTERVAL))
    }
}

/// Mutable state carried from frame to frame.
#[derive(Debug)]
pub struct Session {
    pub tracker: FaceTracker,
    pub interaction: InteractionState,
    /// What the last frame put on screen, in render order.
    pub regions: Vec<RenderedRegion>,
    pub frames: u64,
    pub idle_ticks: u64,
    pub hits: u64,
    canvas: CanvasGeometry,
}

impl Session {
    pub fn new(cfg: &LoopConfig) -> Self {
        Self {
            tracker: FaceTracker::new(cfg.tracking.clone()),
            interaction: InteractionState::new(cfg.click_timeout),
            regions: Vec::new(),
            frames: 0,
            idle_ticks: 0,
            hits: 0,
            canvas: cfg.canvas,
        }
    }

    pub fn canvas(&self) -> &CanvasGeometry {
        &self.canvas
    }

    /// Arm a click at the buffer position under the pointer.
    pub fn press(&mut self, ev: PointerEvent, now: Instant) -> Option<Point> {
        let p = self.canvas.to_buffer(ev.client_x, ev.client_y)?;
        self.interaction.press(p, now);
        debug!(x = p.x, y = p.y, "pointer press");
        Some(p)
    }
}

enum Step {
    Continue,
    EndOfStream,
}

/// One task drives everything: pointer presses are applied between frames, both detectors
/// are awaited jointly before drawing, and the next tick is only awaited once a frame is done.
pub struct DetectionLoop<S, O, F, K> {
    cfg: LoopConfig,
    source: S,
    objects: Option<O>,
    faces: Option<F>,
    renderer: OverlayRenderer,
    catalog: Arc<Catalog>,
    sink: K,
    pointer: Option<mpsc::Receiver<PointerEvent>>,
    session: Session,
    ids: StdRng,
    picks: StdRng,
}

impl<S, O, F, K> DetectionLoop<S, O, F, K>
where
    S: FrameSource,
    O: ObjectDetector,
    F: FaceDetector,
    K: EventSink,
{
    /// A `None` detector is treated as permanently unavailable; its detections are skipped.
    pub fn new(
        cfg: LoopConfig,
        source: S,
        objects: Option<O>,
        faces: Option<F>,
        renderer: OverlayRenderer,
        catalog: Arc<Catalog>,
        sink: K,
    ) -> Self {
        let (ids, picks) = match cfg.seed {
            Some(seed) => (StdRng::seed_from_u64(seed), StdRng::seed_from_u64(seed.wrapping_add(1))),
            None => (StdRng::from_entropy(), StdRng::from_entropy()),
        };
        if objects.is_none() {
            warn!("object detector unavailable; objects will not be drawn");
        }
        if faces.is_none() {
            warn!("face detector unavailable; faces will not be tracked");
        }
        Self {
            session: Session::new(&cfg),
            cfg,
            source,
            objects,
            faces,
            renderer,
            catalog,
            sink,
            pointer: None,
            ids,
            picks,
        }
    }

    /// Single-consumer queue for pointer presses from another task.
    pub fn with_pointer_input(mut self, rx: mpsc::Receiver<PointerEvent>) -> Self {
        self.pointer = Some(rx);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Run until the source ends, `max_frames` is reached or `shutdown` resolves.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<(Session, K)> {
        tokio::pin!(shutdown);
        let period = self.cfg.frame_interval.max(MIN_FRAME_INTERVAL);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = period.as_millis() as u64, "loop: starting");

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("loop: shutdown requested");
                    break;
                }
                _ = ticker.tick() => {}
            }

            if let Step::EndOfStream = self.step().await? {
                info!("loop: source ended");
                break;
            }
            if self.cfg.max_frames.is_some_and(|max| self.session.frames >= max) {
                info!(frames = self.session.frames, "loop: frame limit reached");
                break;
            }
        }

        info!(
            frames = self.session.frames,
            idle = self.session.idle_ticks,
            faces = self.session.tracker.issued(),
            hits = self.session.hits,
            "loop: stopped"
        );
        Ok((self.session, self.sink))
    }

    async fn step(&mut self) -> Result<Step> {
        self.drain_pointer();

        let frame = match self.source.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(Step::EndOfStream),
            Err(e) => {
                warn!("frame capture failed: {e:#}");
                self.idle(format!("capture failed: {e}"))?;
                return Ok(Step::Continue);
            }
        };
        let source_res = frame.resolution();
        if !source_res.is_known() {
            self.idle("video size not known yet".into())?;
            return Ok(Step::Continue);
        }
        let target = self.cfg.canvas.buffer;

        let (objects, faces) = detect_jointly(&mut self.objects, &mut self.faces, &frame).await;
        let objects = map_objects(objects, source_res, target).unwrap_or_default();
        let faces = map_faces(faces, source_res, target).unwrap_or_default();

        let catalog = &self.catalog;
        let picks = &mut self.picks;
        let tracked: Vec<TrackedFace> = self
            .session
            .tracker
            .track(faces, &mut self.ids, |f| catalog.random_label(f.gender.category(), &mut *picks))
            .to_vec();

        let new_faces: Vec<&TrackedFace> = tracked.iter().filter(|t| !t.matched).collect();
        for face in &new_faces {
            self.sink.emit(OverlayEvent::now(
                frame.index,
                EventKind::NewFace {
                    face_id: face.id.to_string(),
                    label: face.label.clone(),
                    gender: face.detection.gender.to_string(),
                    age: face.detection.age,
                },
            ))?;
        }

        let (canvas, regions) = self.renderer.render(&frame.image, target, &objects, &tracked);
        self.session.regions = regions;

        self.check_hit(frame.index)?;

        self.sink.emit(OverlayEvent::now(
            frame.index,
            EventKind::Frame {
                objects: objects.len(),
                faces: tracked.len(),
                new_faces: new_faces.len(),
                regions: self.session.regions.len(),
            },
        ))?;
        if self
            .cfg
            .snapshot_every
            .is_some_and(|n| n > 0 && self.session.frames % n == 0)
        {
            if let Err(e) = self.sink.snapshot(frame.index, &canvas) {
                warn!(frame = frame.index, "snapshot failed: {e:#}");
            }
        }

        debug!(
            frame = frame.index,
            objects = objects.len(),
            faces = tracked.len(),
            elapsed_ms = frame.captured_at.elapsed().as_millis() as u64,
            "frame done"
        );
        self.session.frames += 1;
        Ok(Step::Continue)
    }

    fn drain_pointer(&mut self) {
        let Some(rx) = self.pointer.as_mut() else {
            return;
        };
        while let Ok(ev) = rx.try_recv() {
            if self.session.press(ev, Instant::now()).is_none() {
                debug!(?ev, "pointer press outside a sized canvas");
            }
        }
    }

    fn check_hit(&mut self, frame: u64) -> Result<()> {
        let now = Instant::now();
        let Some(hit) = self.session.interaction.take_hit(&self.session.regions, now).cloned() else {
            return Ok(());
        };
        self.session.hits += 1;
        let description = self
            .catalog
            .get(&hit.category)
            .and_then(|c| c.random_description(&mut self.picks))
            .cloned();
        info!(category = %hit.category, label = %hit.label, "hit");
        self.sink.emit(OverlayEvent::now(
            frame,
            EventKind::DescriptionShown {
                region: match hit.kind {
                    RegionKind::Object => "object".into(),
                    RegionKind::Face => "face".into(),
                },
                category: hit.category,
                label: hit.label,
                face_id: hit.face_id,
                text: description.as_ref().map(|d| d.text.clone()),
                media: description.and_then(|d| d.media),
            },
        ))
    }

    fn idle(&mut self, reason: String) -> Result<()> {
        self.session.idle_ticks += 1;
        self.session.interaction.expire(Instant::now());
        self.sink
            .emit(OverlayEvent::now(self.session.frames, EventKind::Idle { reason }))
    }
}

/// Issue both detector calls at once and wait for both. Failures are logged and yield nothing.
async fn detect_jointly<O: ObjectDetector, F: FaceDetector>(
    objects: &mut Option<O>,
    faces: &mut Option<F>,
    frame: &Frame,
) -> (Vec<ObjectDetection>, Vec<FaceDetection>) {
    let objects = async {
        let Some(d) = objects.as_mut() else {
            return Vec::new();
        };
        d.detect(frame).await.unwrap_or_else(|e| {
            warn!(frame = frame.index, "object detection failed: {e:#}");
            Vec::new()
        })
    };
    let faces = async {
        let Some(d) = faces.as_mut() else {
            return Vec::new();
        };
        d.detect_faces(frame).await.unwrap_or_else(|e| {
            warn!(frame = frame.index, "face detection failed: {e:#}");
            Vec::new()
        })
    };
    tokio::join!(objects, faces)
}

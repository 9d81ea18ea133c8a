use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::geometry::{BBox, Resolution};

/// Default lifetime of an unmatched click.
pub const CLICK_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HitShape {
    #[default]
    Rect,
    Circle,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Region {
    Rect(BBox),
    Circle { cx: f32, cy: f32, r: f32 },
}

impl Region {
    /// Circles are inscribed on the longer side of the box.
    pub fn from_bbox(b: BBox, shape: HitShape) -> Self {
        match shape {
            HitShape::Rect => Region::Rect(b),
            HitShape::Circle => {
                let (cx, cy) = b.center();
                Region::Circle { cx, cy, r: b.width.max(b.height) / 2.0 }
            }
        }
    }

    pub fn contains(&self, p: Point) -> bool {
        match *self {
            Region::Rect(b) => b.contains(p.x, p.y),
            Region::Circle { cx, cy, r } => {
                let dx = p.x - cx;
                let dy = p.y - cy;
                dx * dx + dy * dy <= r * r
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionKind {
    Object,
    Face,
}

/// What the renderer drew, in canvas buffer coordinates and render order.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedRegion {
    pub kind: RegionKind,
    pub category: String,
    pub label: String,
    pub bbox: BBox,
    pub region: Region,
    /// Tracked face id, faces only.
    pub face_id: Option<String>,
}

/// On-screen placement of the canvas versus its pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CanvasGeometry {
    /// Client-space offset of the canvas' top-left corner.
    #[serde(default)]
    pub left: f32,
    #[serde(default)]
    pub top: f32,
    /// Displayed size in client units.
    pub display_width: f32,
    pub display_height: f32,
    pub buffer: Resolution,
}

impl CanvasGeometry {
    /// Displayed 1:1 at the origin.
    pub fn unscaled(buffer: Resolution) -> Self {
        Self {
            left: 0.0,
            top: 0.0,
            display_width: buffer.width as f32,
            display_height: buffer.height as f32,
            buffer,
        }
    }

    pub fn to_buffer(&self, client_x: f32, client_y: f32) -> Option<Point> {
        if self.display_width <= 0.0 || self.display_height <= 0.0 {
            return None;
        }
        let sx = self.buffer.width as f32 / self.display_width;
        let sy = self.buffer.height as f32 / self.display_height;
        Some(Point::new((client_x - self.left) * sx, (client_y - self.top) * sy))
    }
}

/// First region in render order containing `p`.
pub fn hit_test(p: Point, regions: &[RenderedRegion]) -> Option<&RenderedRegion> {
    regions.iter().find(|r| r.region.contains(p))
}

#[derive(Debug, Clone, Copy)]
struct PendingClick {
    at: Point,
    armed: Instant,
}

/// Short-lived click flag: armed by a press, consumed by one hit or dropped after `timeout`.
#[derive(Debug)]
pub struct InteractionState {
    timeout: Duration,
    last_pointer: Option<Point>,
    pending: Option<PendingClick>,
}

impl InteractionState {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout, last_pointer: None, pending: None }
    }

    pub fn press(&mut self, at: Point, now: Instant) {
        self.last_pointer = Some(at);
        self.pending = Some(PendingClick { at, armed: now });
    }

    pub fn last_pointer(&self) -> Option<Point> {
        self.last_pointer
    }

    pub fn is_pending(&self, now: Instant) -> bool {
        self.pending
            .is_some_and(|p| now.saturating_duration_since(p.armed) < self.timeout)
    }

    /// Drop the pending click once its timeout has elapsed. Returns true if one expired.
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.pending {
            Some(p) if now.saturating_duration_since(p.armed) >= self.timeout => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    /// Evaluate the pending click against the regions just rendered.
    ///
    /// A hit clears the flag; a miss leaves it armed for later frames until it expires.
    pub fn take_hit<'a>(&mut self, regions: &'a [RenderedRegion], now: Instant) -> Option<&'a RenderedRegion> {
        self.expire(now);
        let p = self.pending?;
        let hit = hit_test(p.at, regions)?;
        self.pending = None;
        Some(hit)
    }
}

impl Default for InteractionState {
    fn default() -> Self {
        Self::new(CLICK_TIMEOUT)
    }
}

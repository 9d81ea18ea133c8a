use serde::{Deserialize, Serialize};

/// Axis-aligned box, top-left origin, in whatever pixel space the caller is working in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// Inclusive on all four edges.
    pub fn contains(&self, px: f32, py: f32) -> bool {
        px >= self.x && px <= self.right() && py >= self.y && py <= self.bottom()
    }

    /// Grow around the box the way face overlays are drawn: width and height are multiplied
    /// by `factor`, x shifts by half the width increase and y by a quarter of the height
    /// increase, so the box extends further below the face than above it.
    pub fn enlarge(&self, factor: f32) -> Self {
        let dw = (self.width * factor - self.width) / 2.0;
        let dh = (self.height * factor - self.height) / 2.0;
        Self {
            x: self.x - dw,
            y: self.y - dh / 2.0,
            width: self.width * factor,
            height: self.height * factor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A source reporting a zero axis has not negotiated its size yet.
    pub fn is_known(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Scale each axis independently. Positions stay sub-pixel; nothing is rounded.
pub fn scale_bbox(b: BBox, sx: f32, sy: f32) -> BBox {
    BBox {
        x: b.x * sx,
        y: b.y * sy,
        width: b.width * sx,
        height: b.height * sy,
    }
}

/// Map a box from `source` pixel space to `target` pixel space.
///
/// Returns `None` while either resolution is unknown; callers skip mapping for that frame.
pub fn map_bbox(b: BBox, source: Resolution, target: Resolution) -> Option<BBox> {
    if !source.is_known() || !target.is_known() {
        return None;
    }
    if source == target {
        return Some(b);
    }
    let sx = target.width as f32 / source.width as f32;
    let sy = target.height as f32 / source.height as f32;
    Some(scale_bbox(b, sx, sy))
}

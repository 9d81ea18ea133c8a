use std::path::PathBuf;
use std::sync::Arc;

use ab_glyph::{Font, FontVec, PxScale, ScaleFont};
use anyhow::{Context, Result};
use image::{imageops::FilterType, Rgb, RgbImage};
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut},
    rect::Rect,
};
use serde::Deserialize;
use tracing::{debug, info};

use crate::catalog::{Catalog, Effect, FALLBACK_COLOR};
use crate::detection::ObjectDetection;
use crate::geometry::{BBox, Resolution};
use crate::hit::{HitShape, Region, RegionKind, RenderedRegion};
use crate::tracker::TrackedFace;

const FILL_ALPHA: f32 = 0.2;
const PIXEL_BLOCK: u32 = 7;
const HATCH_SPACING: u32 = 5;
const LABEL_HEIGHT: i32 = 20;
const LABEL_PAD: i32 = 5;
const TEXT_SCALE: f32 = 16.0;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Set from the interaction settings, never read from this section.
    #[serde(skip)]
    pub hit_shape: HitShape,
    /// Face boxes are drawn (and hit-tested) this many times larger than detected.
    pub face_box_scale: f32,
    /// Draw detections whose category has no catalog entry, in the fallback color.
    pub draw_unknown: bool,
    /// Append the detector score to object labels.
    pub show_scores: bool,
    pub line_width: u32,
    /// TTF/OTF used for label text. Without it only the label bar is drawn.
    pub font_path: Option<PathBuf>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            hit_shape: HitShape::Rect,
            face_box_scale: 3.0,
            draw_unknown: false,
            show_scores: false,
            line_width: 2,
            font_path: None,
        }
    }
}

/// Scales the frame onto the canvas, then draws objects and faces in that order. Every drawn
/// detection is recorded as a `RenderedRegion` so pointer hits resolve against what is on screen.
pub struct OverlayRenderer {
    cfg: RenderConfig,
    catalog: Arc<Catalog>,
    font: Option<FontVec>,
}

struct Style {
    color: Rgb<u8>,
    effect: Effect,
}

impl OverlayRenderer {
    pub fn new(cfg: RenderConfig, catalog: Arc<Catalog>) -> Result<Self> {
        let font = match &cfg.font_path {
            Some(path) => {
                let bytes = std::fs::read(path)
                    .with_context(|| format!("read font {}", path.display()))?;
                let font = FontVec::try_from_vec(bytes)
                    .map_err(|e| anyhow::anyhow!("parse font {}: {e}", path.display()))?;
                info!("render: loaded label font {}", path.display());
                Some(font)
            }
            None => None,
        };
        Ok(Self { cfg, catalog, font })
    }

    pub fn config(&self) -> &RenderConfig {
        &self.cfg
    }

    /// Draw one frame. Detections must already be in canvas coordinates.
    pub fn render(
        &self,
        frame: &RgbImage,
        canvas_size: Resolution,
        objects: &[ObjectDetection],
        faces: &[TrackedFace],
    ) -> (RgbImage, Vec<RenderedRegion>) {
        let mut canvas = if frame.dimensions() == (canvas_size.width, canvas_size.height) {
            frame.clone()
        } else {
            image::imageops::resize(frame, canvas_size.width, canvas_size.height, FilterType::Triangle)
        };
        let mut regions = Vec::with_capacity(objects.len() + faces.len());

        for obj in objects {
            let Some(style) = self.style_for(&obj.class) else {
                debug!(class = %obj.class, "no catalog entry, skipping object");
                continue;
            };
            let label = if self.cfg.show_scores {
                format!("{} ({}%)", obj.class, (obj.score * 100.0).round())
            } else {
                obj.class.clone()
            };
            self.draw_detection(&mut canvas, obj.bbox, &style, &label);
            regions.push(RenderedRegion {
                kind: RegionKind::Object,
                category: obj.class.clone(),
                label,
                bbox: obj.bbox,
                region: Region::from_bbox(obj.bbox, self.cfg.hit_shape),
                face_id: None,
            });
        }

        for face in faces {
            let det = &face.detection;
            let category = det.gender.category();
            let Some(style) = self.style_for(category) else {
                debug!(gender = category, "no catalog entry, skipping face");
                continue;
            };
            let bbox = det.bbox.enlarge(self.cfg.face_box_scale);
            let label = face.label.clone().unwrap_or_else(|| {
                format!(
                    "{} ({:.1}%) Age: {}",
                    det.gender,
                    det.gender_probability * 100.0,
                    det.age.round()
                )
            });
            self.draw_detection(&mut canvas, bbox, &style, &label);
            regions.push(RenderedRegion {
                kind: RegionKind::Face,
                category: category.to_string(),
                label,
                bbox,
                region: Region::from_bbox(bbox, self.cfg.hit_shape),
                face_id: Some(face.id.to_string()),
            });
        }

        (canvas, regions)
    }

    fn style_for(&self, category: &str) -> Option<Style> {
        match self.catalog.get(category) {
            Some(c) => Some(Style { color: c.color, effect: c.effect }),
            None if self.cfg.draw_unknown => Some(Style { color: FALLBACK_COLOR, effect: Effect::Fill }),
            None => None,
        }
    }

    fn draw_detection(&self, canvas: &mut RgbImage, bbox: BBox, style: &Style, label: &str) {
        if let Some(px) = PixelBounds::clip(bbox, canvas.width(), canvas.height()) {
            match style.effect {
                Effect::Fill => fill_alpha(canvas, px, style.color, FILL_ALPHA),
                Effect::Pixelate => pixelate_gray(canvas, px, PIXEL_BLOCK),
                Effect::Hatch => hatch(canvas, px, style.color, HATCH_SPACING),
            }
        }

        let x = bbox.x.round() as i32;
        let y = bbox.y.round() as i32;
        let w = bbox.width.round().max(1.0) as u32;
        let h = bbox.height.round().max(1.0) as u32;
        for i in 0..self.cfg.line_width {
            let inset = 2 * i;
            if w <= inset || h <= inset {
                break;
            }
            let rect = Rect::at(x + i as i32, y + i as i32).of_size(w - inset, h - inset);
            draw_hollow_rect_mut(canvas, rect, style.color);
        }

        let text_w = self.text_width(label);
        let bar = Rect::at(x, y - LABEL_HEIGHT).of_size((text_w + 2 * LABEL_PAD).max(1) as u32, LABEL_HEIGHT as u32);
        draw_filled_rect_mut(canvas, bar, style.color);
        if let Some(font) = &self.font {
            draw_text_mut(
                canvas,
                TEXT_COLOR,
                x + LABEL_PAD,
                y - LABEL_HEIGHT + 2,
                PxScale::from(TEXT_SCALE),
                font,
                label,
            );
        }
    }

    fn text_width(&self, text: &str) -> i32 {
        match &self.font {
            Some(font) => {
                let scaled = font.as_scaled(PxScale::from(TEXT_SCALE));
                let w: f32 = text.chars().map(|c| scaled.h_advance(scaled.glyph_id(c))).sum();
                w.ceil() as i32
            }
            // rough average glyph width at 16px
            None => text.chars().count() as i32 * 8,
        }
    }
}

/// Box clipped to the canvas, as half-open pixel ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PixelBounds {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

impl PixelBounds {
    fn clip(b: BBox, width: u32, height: u32) -> Option<Self> {
        let x0 = b.x.max(0.0).floor() as u32;
        let y0 = b.y.max(0.0).floor() as u32;
        let x1 = (b.right().min(width as f32).ceil().max(0.0) as u32).min(width);
        let y1 = (b.bottom().min(height as f32).ceil().max(0.0) as u32).min(height);
        (x0 < x1 && y0 < y1).then_some(Self { x0, y0, x1, y1 })
    }
}

fn blend(p: &mut Rgb<u8>, c: Rgb<u8>, alpha: f32) {
    for i in 0..3 {
        let v = p.0[i] as f32 * (1.0 - alpha) + c.0[i] as f32 * alpha;
        p.0[i] = v.round().clamp(0.0, 255.0) as u8;
    }
}

fn fill_alpha(canvas: &mut RgbImage, px: PixelBounds, color: Rgb<u8>, alpha: f32) {
    for y in px.y0..px.y1 {
        for x in px.x0..px.x1 {
            blend(canvas.get_pixel_mut(x, y), color, alpha);
        }
    }
}

/// Each block takes the luma of its top-left pixel.
fn pixelate_gray(canvas: &mut RgbImage, px: PixelBounds, block: u32) {
    let block = block.max(1);
    for by in (px.y0..px.y1).step_by(block as usize) {
        for bx in (px.x0..px.x1).step_by(block as usize) {
            let [r, g, b] = canvas.get_pixel(bx, by).0;
            let gray = (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32).round() as u8;
            for y in by..(by + block).min(px.y1) {
                for x in bx..(bx + block).min(px.x1) {
                    canvas.put_pixel(x, y, Rgb([gray, gray, gray]));
                }
            }
        }
    }
}

fn hatch(canvas: &mut RgbImage, px: PixelBounds, color: Rgb<u8>, spacing: u32) {
    for y in (px.y0..px.y1).step_by(spacing.max(1) as usize) {
        for x in px.x0..px.x1 {
            canvas.put_pixel(x, y, color);
        }
    }
}

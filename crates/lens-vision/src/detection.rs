use std::fmt;
use std::future::Future;
use std::time::Instant;

use anyhow::Result;
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::geometry::{map_bbox, BBox, Resolution};

/// One decoded video frame in native source resolution.
pub struct Frame {
    pub index: u64,
    pub image: RgbImage,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(index: u64, image: RgbImage) -> Self {
        Self { index, image, captured_at: Instant::now() }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.image.width(), self.image.height())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDetection {
    pub bbox: BBox,
    pub class: String,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    /// Faces are looked up in the catalog under their gender name.
    pub fn category(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.category())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub bbox: BBox,
    #[serde(default = "default_score")]
    pub score: f32,
    pub descriptor: Vec<f32>,
    pub age: f32,
    pub gender: Gender,
    #[serde(default = "default_score")]
    pub gender_probability: f32,
}

fn default_score() -> f32 {
    1.0
}

/// Opaque object detector. Boxes come back in source-frame pixels.
pub trait ObjectDetector {
    fn detect(&mut self, frame: &Frame) -> impl Future<Output = Result<Vec<ObjectDetection>>>;
}

/// Opaque face + age/gender estimator. Boxes come back in source-frame pixels.
pub trait FaceDetector {
    fn detect_faces(&mut self, frame: &Frame) -> impl Future<Output = Result<Vec<FaceDetection>>>;
}

pub fn map_objects(
    dets: Vec<ObjectDetection>,
    source: Resolution,
    target: Resolution,
) -> Option<Vec<ObjectDetection>> {
    dets.into_iter()
        .map(|d| map_bbox(d.bbox, source, target).map(|bbox| ObjectDetection { bbox, ..d }))
        .collect()
}

pub fn map_faces(
    faces: Vec<FaceDetection>,
    source: Resolution,
    target: Resolution,
) -> Option<Vec<FaceDetection>> {
    faces
        .into_iter()
        .map(|f| map_bbox(f.bbox, source, target).map(|bbox| FaceDetection { bbox, ..f }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_every_object() {
        let dets = vec![
            ObjectDetection { bbox: BBox::new(100.0, 100.0, 200.0, 150.0), class: "cup".into(), score: 0.9 },
            ObjectDetection { bbox: BBox::new(0.0, 0.0, 1280.0, 720.0), class: "person".into(), score: 0.5 },
        ];
        let out = map_objects(dets, Resolution::new(1280, 720), Resolution::new(640, 360)).unwrap();
        assert_eq!(out[0].bbox, BBox::new(50.0, 50.0, 100.0, 75.0));
        assert_eq!(out[1].bbox, BBox::new(0.0, 0.0, 640.0, 360.0));
        assert_eq!(out[1].class, "person");
    }

    #[test]
    fn empty_set_maps_even_before_size_is_known() {
        let out = map_faces(Vec::new(), Resolution::new(0, 0), Resolution::new(640, 360));
        assert_eq!(out, Some(Vec::new()));
    }

    #[test]
    fn face_json_uses_lowercase_gender() {
        let f: FaceDetection = serde_json::from_str(
            r#"{"bbox":{"x":1,"y":2,"width":3,"height":4},"descriptor":[0.1,0.2],"age":31.5,"gender":"female"}"#,
        )
        .unwrap();
        assert_eq!(f.gender, Gender::Female);
        assert_eq!(f.gender_probability, 1.0);
        assert_eq!(f.gender.to_string(), "female");
    }
}

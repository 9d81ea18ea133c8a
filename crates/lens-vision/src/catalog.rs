use std::collections::HashMap;
use std::path::Path;

use image::Rgb;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Deserializer};

use crate::VisionError;

/// Used for categories drawn without catalog metadata.
pub const FALLBACK_COLOR: Rgb<u8> = Rgb([0, 255, 255]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    /// Translucent fill in the category color.
    #[default]
    Fill,
    /// Grayscale mosaic over the region.
    Pixelate,
    /// Horizontal line hatching in the category color.
    Hatch,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "DescriptionRow")]
pub struct Description {
    pub label: String,
    pub text: String,
    pub media: Option<String>,
}

/// Descriptions are stored as `[label, text, media?]` rows.
#[derive(Deserialize)]
#[serde(untagged)]
enum DescriptionRow {
    Full(String, String, Option<String>),
    Short(String, String),
    Text(String),
}

impl From<DescriptionRow> for Description {
    fn from(row: DescriptionRow) -> Self {
        match row {
            DescriptionRow::Full(label, text, media) => Self { label, text, media },
            DescriptionRow::Short(label, text) => Self { label, text, media: None },
            DescriptionRow::Text(text) => Self { label: text.clone(), text, media: None },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Category {
    pub identifier: String,
    #[serde(deserialize_with = "de_color")]
    pub color: Rgb<u8>,
    #[serde(default)]
    pub descriptions: Vec<Description>,
    #[serde(default)]
    pub effect: Effect,
}

impl Category {
    pub fn random_description<R: Rng>(&self, rng: &mut R) -> Option<&Description> {
        self.descriptions.choose(rng)
    }
}

/// Per-category display metadata, loaded once and shared read-only:
///
/// ```json
/// [{"identifier": "cup", "color": "purple",
///   "descriptions": [["Mug", "Holds coffee.", "mug.mp4"]], "effect": "fill"}]
/// ```
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    categories: Vec<Category>,
    index: HashMap<String, usize>,
}

impl Catalog {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, VisionError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| VisionError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, VisionError> {
        let categories: Vec<Category> = serde_json::from_str(raw)?;
        Ok(Self::from_categories(categories))
    }

    /// Later duplicates of an identifier are ignored.
    pub fn from_categories(categories: Vec<Category>) -> Self {
        let mut index = HashMap::new();
        for (i, c) in categories.iter().enumerate() {
            index.entry(c.identifier.clone()).or_insert(i);
        }
        Self { categories, index }
    }

    pub fn get(&self, identifier: &str) -> Option<&Category> {
        self.index.get(identifier).map(|&i| &self.categories[i])
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Random description label for a category, used to name new faces.
    pub fn random_label<R: Rng>(&self, identifier: &str, rng: &mut R) -> Option<String> {
        self.get(identifier)?
            .random_description(rng)
            .map(|d| d.label.clone())
    }
}

fn de_color<'de, D: Deserializer<'de>>(d: D) -> Result<Rgb<u8>, D::Error> {
    let s = String::deserialize(d)?;
    parse_color(&s).ok_or_else(|| serde::de::Error::custom(format!("unknown color: {s}")))
}

/// `#rgb`, `#rrggbb` or one of a handful of CSS color names.
pub fn parse_color(s: &str) -> Option<Rgb<u8>> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix('#') {
        if !hex.is_ascii() {
            return None;
        }
        let nibble = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok();
        let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        return match hex.len() {
            3 => Some(Rgb([nibble(0)? * 17, nibble(1)? * 17, nibble(2)? * 17])),
            6 => Some(Rgb([byte(0)?, byte(2)?, byte(4)?])),
            _ => None,
        };
    }
    let rgb = match s.to_ascii_lowercase().as_str() {
        "black" => [0, 0, 0],
        "white" => [255, 255, 255],
        "red" => [255, 0, 0],
        "green" => [0, 128, 0],
        "lime" => [0, 255, 0],
        "blue" => [0, 0, 255],
        "yellow" => [255, 255, 0],
        "cyan" | "aqua" => [0, 255, 255],
        "magenta" | "fuchsia" => [255, 0, 255],
        "gray" | "grey" => [128, 128, 128],
        "brown" => [165, 42, 42],
        "purple" => [128, 0, 128],
        "orange" => [255, 165, 0],
        "pink" => [255, 192, 203],
        "lightgreen" => [144, 238, 144],
        "gold" => [255, 215, 0],
        "navy" => [0, 0, 128],
        "teal" => [0, 128, 128],
        _ => return None,
    };
    Some(Rgb(rgb))
}

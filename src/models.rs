// src/models.rs
use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// EXIF orientation of a decoded raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Orientation {
    #[default]
    Up,
    UpMirrored,
    Down,
    DownMirrored,
    LeftMirrored,
    Right,
    RightMirrored,
    Left,
}

impl Orientation {
    /// Maps an EXIF orientation tag (1..=8). Anything else is treated as upright.
    pub fn from_exif(value: u32) -> Self {
        match value {
            2 => Orientation::UpMirrored,
            3 => Orientation::Down,
            4 => Orientation::DownMirrored,
            5 => Orientation::LeftMirrored,
            6 => Orientation::Right,
            7 => Orientation::RightMirrored,
            8 => Orientation::Left,
            _ => Orientation::Up,
        }
    }

    /// Clockwise rotation then horizontal flip needed to render upright.
    pub fn transforms(self) -> (Option<u16>, bool) {
        match self {
            Orientation::Up => (None, false),
            Orientation::UpMirrored => (None, true),
            Orientation::Down => (Some(180), false),
            Orientation::DownMirrored => (Some(180), true),
            Orientation::LeftMirrored => (Some(270), true),
            Orientation::Right => (Some(90), false),
            Orientation::RightMirrored => (Some(90), true),
            Orientation::Left => (Some(270), false),
        }
    }
}

/// A decoded raster plus the metadata needed to normalize it.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub image: DynamicImage,
    pub orientation: Orientation,
}

impl SourceImage {
    pub fn new(image: DynamicImage) -> Self {
        Self {
            image,
            orientation: Orientation::Up,
        }
    }

    pub fn with_orientation(image: DynamicImage, orientation: Orientation) -> Self {
        Self { image, orientation }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Upright raster within the pixel budget.
#[derive(Debug, Clone)]
pub struct PreprocessedImage {
    pub image: DynamicImage,
}

impl PreprocessedImage {
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn aspect_ratio(&self) -> f64 {
        let (width, height) = self.dimensions();
        if height == 0 {
            return 0.0;
        }
        width as f64 / height as f64
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneDescription {
    pub text: String,
    pub contains_person: bool,
}

/// Output canvases supported by the image-edit endpoint, in tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputSize {
    Square,
    Portrait,
    Landscape,
}

impl OutputSize {
    pub const ALL: [OutputSize; 3] = [OutputSize::Square, OutputSize::Portrait, OutputSize::Landscape];

    pub fn dimensions(self) -> (u32, u32) {
        match self {
            OutputSize::Square => (1024, 1024),
            OutputSize::Portrait => (1024, 1536),
            OutputSize::Landscape => (1536, 1024),
        }
    }

    pub fn aspect_ratio(self) -> f64 {
        let (width, height) = self.dimensions();
        width as f64 / height as f64
    }

    /// Form value for the `size` field, e.g. `1024x1536`.
    pub fn as_param(self) -> String {
        let (width, height) = self.dimensions();
        format!("{}x{}", width, height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    Medium,
    High,
    Auto,
}

impl Quality {
    pub fn as_str(self) -> &'static str {
        match self {
            Quality::Low => "low",
            Quality::Medium => "medium",
            Quality::High => "high",
            Quality::Auto => "auto",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Quality::Low),
            "medium" => Some(Quality::Medium),
            "high" => Some(Quality::High),
            "auto" => Some(Quality::Auto),
            _ => None,
        }
    }
}

/// One image-edit submission. Built once per generation and resent unchanged on retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    pub image_jpeg: Bytes,
    pub size: OutputSize,
    pub quality: Quality,
}

/// Synthetic preview handed to the progress callback.
#[derive(Debug, Clone)]
pub struct ProgressFrame {
    pub preview: DynamicImage,
    pub fraction: f32,
}

#[derive(Debug, Clone)]
pub struct StylizeResult {
    pub run_id: Uuid,
    pub image: DynamicImage,
    pub prompt: String,
    pub size: OutputSize,
    /// Rough token estimate of the prompt, for diagnostics only.
    pub approx_cost_metric: u32,
    pub completed_at: DateTime<Utc>,
}

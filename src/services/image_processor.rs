// src/services/image_processor.rs
use crate::errors::StylizeError;
use crate::models::{Orientation, PreprocessedImage, SourceImage};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ColorType, DynamicImage, GenericImageView};
use log::debug;
use std::io::Cursor;

pub const PIXEL_BUDGET: u64 = 4_000_000;
pub const JPEG_QUALITY: u8 = 85;

const PREVIEW_EDGE: u32 = 512;
const MAX_PIXEL_BLOCK: f32 = 24.0;
const MAX_BLUR_SIGMA: f32 = 8.0;

/// Brings a decoded photo upright and within the pixel budget.
#[derive(Debug, Clone, Copy)]
pub struct ImagePreprocessor {
    pixel_budget: u64,
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self::new()
    }
}

impl ImagePreprocessor {
    pub fn new() -> Self {
        Self {
            pixel_budget: PIXEL_BUDGET,
        }
    }

    pub fn with_budget(pixel_budget: u64) -> Self {
        Self { pixel_budget }
    }

    /// Orientation fix followed by the budget clamp. The input is never mutated.
    pub fn normalize(&self, source: &SourceImage) -> Result<PreprocessedImage, StylizeError> {
        let (width, height) = (source.width(), source.height());
        if width == 0 || height == 0 {
            return Err(StylizeError::InvalidImage(format!(
                "image has degenerate dimensions {}x{}",
                width, height
            )));
        }

        let upright = fix_orientation(&source.image, source.orientation)?;
        let (width, height) = upright.dimensions();

        if (width as u64) * (height as u64) <= self.pixel_budget {
            return Ok(PreprocessedImage { image: upright });
        }

        let (new_width, new_height) = budget_dimensions(width, height, self.pixel_budget)?;
        debug!(
            "Downsampling {}x{} to {}x{} (budget {} px)",
            width, height, new_width, new_height, self.pixel_budget
        );
        let resized = upright.resize_exact(new_width, new_height, FilterType::Lanczos3);

        Ok(PreprocessedImage { image: resized })
    }
}

/// Largest aspect-preserving size within `budget` pixels.
pub fn budget_dimensions(width: u32, height: u32, budget: u64) -> Result<(u32, u32), StylizeError> {
    if height == 0 || width == 0 {
        return Err(StylizeError::InvalidImage(format!(
            "cannot resize degenerate image {}x{}",
            width, height
        )));
    }
    let aspect_ratio = width as f64 / height as f64;
    if !aspect_ratio.is_finite() || aspect_ratio <= 0.0 {
        return Err(StylizeError::InvalidImage(format!(
            "invalid aspect ratio {}",
            aspect_ratio
        )));
    }

    let new_height = (budget as f64 / aspect_ratio).sqrt().floor();
    let new_width = (new_height * aspect_ratio).floor();
    if new_height < 1.0 || new_width < 1.0 {
        return Err(StylizeError::InvalidImage(format!(
            "aspect ratio {} cannot fit a {} px budget",
            aspect_ratio, budget
        )));
    }

    Ok((new_width as u32, new_height as u32))
}

/// Re-renders into an upright buffer; upright input is returned as-is.
pub fn fix_orientation(
    image: &DynamicImage,
    orientation: Orientation,
) -> Result<DynamicImage, StylizeError> {
    if orientation == Orientation::Up {
        return Ok(image.clone());
    }

    let (rotate, flip_horizontal) = orientation.transforms();
    let mut rendered = match rotate {
        Some(90) => DynamicImage::ImageRgba8(imageops::rotate90(&image.to_rgba8())),
        Some(180) => DynamicImage::ImageRgba8(imageops::rotate180(&image.to_rgba8())),
        Some(270) => DynamicImage::ImageRgba8(imageops::rotate270(&image.to_rgba8())),
        _ => image.clone(),
    };
    if flip_horizontal {
        rendered = DynamicImage::ImageRgba8(imageops::flip_horizontal(&rendered.to_rgba8()));
    }

    let (width, height) = rendered.dimensions();
    if width == 0 || height == 0 {
        return Err(StylizeError::Normalization(format!(
            "re-rendering {:?} image produced an empty buffer",
            orientation
        )));
    }
    Ok(rendered)
}

/// Decodes uploaded bytes, picking up the EXIF orientation when present.
pub fn decode_source(data: &[u8]) -> Result<SourceImage, StylizeError> {
    let image = image::load_from_memory(data)
        .map_err(|e| StylizeError::InvalidImage(format!("Invalid image format: {}", e)))?;
    Ok(SourceImage::with_orientation(image, read_exif_orientation(data)))
}

pub fn read_exif_orientation(data: &[u8]) -> Orientation {
    let mut cursor = Cursor::new(data);
    let Ok(exif) = exif::Reader::new().read_from_container(&mut cursor) else {
        return Orientation::Up;
    };
    exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .map(Orientation::from_exif)
        .unwrap_or_default()
}

pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, StylizeError> {
    let rgb = image.to_rgb8();
    let mut output = Vec::new();
    JpegEncoder::new_with_quality(&mut output, quality)
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)
        .map_err(|e| StylizeError::Encoding(format!("Failed to encode JPEG: {}", e)))?;
    Ok(output)
}

pub fn decode_image(data: &[u8]) -> Result<DynamicImage, StylizeError> {
    image::load_from_memory(data)
        .map_err(|e| StylizeError::BadResponse(format!("Failed to decode image: {}", e)))
}

/// Small copy used as the source for every preview frame of a run.
pub fn preview_base(image: &DynamicImage) -> DynamicImage {
    let (width, height) = image.dimensions();
    if width.max(height) <= PREVIEW_EDGE {
        return image.clone();
    }
    image.thumbnail(PREVIEW_EDGE, PREVIEW_EDGE)
}

/// Pixelates then blurs `base`; both effects weaken as `step` approaches 1.
pub fn degrade_preview(base: &DynamicImage, step: f32) -> DynamicImage {
    let remaining = 1.0 - step.clamp(0.0, 1.0);
    let block = (1.0 + remaining * MAX_PIXEL_BLOCK).round().max(1.0) as u32;
    let sigma = remaining * MAX_BLUR_SIGMA;

    let (width, height) = base.dimensions();
    if width == 0 || height == 0 {
        return base.clone();
    }

    let pixelated = if block > 1 {
        let small_width = (width / block).max(1);
        let small_height = (height / block).max(1);
        base.resize_exact(small_width, small_height, FilterType::Nearest)
            .resize_exact(width, height, FilterType::Nearest)
    } else {
        base.clone()
    };

    if sigma >= 0.1 {
        pixelated.blur(sigma)
    } else {
        pixelated
    }
}

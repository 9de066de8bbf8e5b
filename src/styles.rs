// src/styles.rs
use serde::Serialize;

/// A named art style with guidance steering the generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StyleDescriptor {
    pub id: &'static str,
    pub display_name: &'static str,
    pub positive_guidance: &'static str,
    pub negative_guidance: &'static str,
}

/// A style variant that carries one fully authored prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrendDescriptor {
    pub id: String,
    pub title: String,
    pub prompt: String,
}

impl TrendDescriptor {
    pub fn new(id: impl Into<String>, title: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            prompt: prompt.into(),
        }
    }
}

/// Where the generation prompt comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptSource {
    /// Composed from a scene description and the style's guidance.
    Style(StyleDescriptor),
    /// Used verbatim; no scene description is requested.
    Trend(TrendDescriptor),
}

impl PromptSource {
    pub fn label(&self) -> &str {
        match self {
            PromptSource::Style(style) => style.id,
            PromptSource::Trend(trend) => &trend.id,
        }
    }

    pub fn needs_scene_description(&self) -> bool {
        matches!(self, PromptSource::Style(_))
    }
}

pub const DEFAULT_STYLE_ID: &str = "cartoon";

pub static STYLE_CATALOG: &[StyleDescriptor] = &[
    StyleDescriptor {
        id: "cartoon",
        display_name: "Cartoon",
        positive_guidance: "Bold clean outlines, flat vibrant colors, friendly exaggerated proportions, 3D animated feature film look",
        negative_guidance: "photorealism, film grain, muted colors, harsh shadows",
    },
    StyleDescriptor {
        id: "anime",
        display_name: "Anime",
        positive_guidance: "Japanese anime illustration style, crisp cel shading, expressive eyes, luminous sky gradients",
        negative_guidance: "photorealistic skin texture, 3D render, western comic inking, blurry lines",
    },
    StyleDescriptor {
        id: "comic_book",
        display_name: "Comic Book",
        positive_guidance: "Comic book illustration style",
        negative_guidance: "soft shading, pastel colors, minimalist design, watercolor style",
    },
    StyleDescriptor {
        id: "watercolor",
        display_name: "Watercolor",
        positive_guidance: "Loose watercolor painting, soft washes bleeding into textured paper, gentle pigment blooms",
        negative_guidance: "hard outlines, digital gradients, heavy black shadows, photorealism",
    },
    StyleDescriptor {
        id: "oil_painting",
        display_name: "Oil Painting",
        positive_guidance: "Classical oil painting on canvas, visible impasto brushstrokes, rich warm glazes",
        negative_guidance: "flat vector shapes, neon colors, cartoon outlines, smooth digital airbrush",
    },
    StyleDescriptor {
        id: "pixel_art",
        display_name: "Pixel Art",
        positive_guidance: "16-bit pixel art, limited retro palette, crisp square pixels, dithered shading",
        negative_guidance: "anti-aliasing, smooth gradients, photographic detail, blur",
    },
    StyleDescriptor {
        id: "pencil_sketch",
        display_name: "Pencil Sketch",
        positive_guidance: "Graphite pencil sketch on off-white paper, confident hatching, subtle smudged tones",
        negative_guidance: "color, paint texture, digital effects, heavy ink fills",
    },
    StyleDescriptor {
        id: "pop_art",
        display_name: "Pop Art",
        positive_guidance: "1960s pop art, halftone dots, saturated primary colors, thick graphic outlines",
        negative_guidance: "muted earth tones, soft focus, realistic lighting, painterly texture",
    },
];

/// Looks a style up by id or display name, ignoring case and separators.
pub fn find_style(name: &str) -> Option<&'static StyleDescriptor> {
    let wanted = normalize_key(name);
    STYLE_CATALOG
        .iter()
        .find(|style| normalize_key(style.id) == wanted || normalize_key(style.display_name) == wanted)
}

/// Legacy lookup: unknown names fall back to the generic cartoon style.
pub fn style_or_default(name: &str) -> &'static StyleDescriptor {
    find_style(name).unwrap_or(&STYLE_CATALOG[0])
}

fn normalize_key(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

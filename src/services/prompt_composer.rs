// src/services/prompt_composer.rs
use crate::models::SceneDescription;
use crate::styles::{PromptSource, StyleDescriptor};

/// Builds the generation prompt for a styled run. Pure and infallible.
pub fn compose(description: &str, style: &StyleDescriptor, contains_person: bool) -> String {
    if contains_person {
        format!(
            "Recreate this exact composition as a {name} artwork. \
             Preserve the camera angle, the subject's pose and framing, the lighting, \
             the clothing and its colors, and the background exactly as they appear.\n\
             Scene: {scene}\n\
             Style: {positive}\n\
             Avoid: {negative}",
            name = style.display_name,
            scene = description.trim(),
            positive = style.positive_guidance,
            negative = style.negative_guidance,
        )
    } else {
        format!(
            "Transform this image into a {name} artwork. \
             Keep the original composition, lighting, colors and spatial arrangement of every element.\n\
             Scene: {scene}\n\
             Style: {positive}\n\
             Avoid: {negative}",
            name = style.display_name,
            scene = description.trim(),
            positive = style.positive_guidance,
            negative = style.negative_guidance,
        )
    }
}

/// Resolves the final prompt for any source. Trends pass through verbatim.
pub fn prompt_for(source: &PromptSource, scene: Option<&SceneDescription>) -> String {
    match (source, scene) {
        (PromptSource::Trend(trend), _) => trend.prompt.clone(),
        (PromptSource::Style(style), Some(scene)) => compose(&scene.text, style, scene.contains_person),
        (PromptSource::Style(style), None) => compose("", style, false),
    }
}

/// Rough token estimate: four tokens per three words, rounded up.
pub fn approx_cost_metric(prompt: &str) -> u32 {
    let words = prompt.split_whitespace().count() as u32;
    (words * 4).div_ceil(3)
}

// src/services/size_negotiator.rs
use crate::models::OutputSize;

/// Supported canvas whose aspect ratio is closest to `width`x`height`.
///
/// Ties go to the earlier entry of [`OutputSize::ALL`]. Degenerate input maps to square.
pub fn best_size(width: u32, height: u32) -> OutputSize {
    if width == 0 || height == 0 {
        return OutputSize::Square;
    }
    let aspect_ratio = width as f64 / height as f64;

    let mut best = OutputSize::ALL[0];
    let mut best_diff = (aspect_ratio - best.aspect_ratio()).abs();
    for candidate in OutputSize::ALL.into_iter().skip(1) {
        let diff = (aspect_ratio - candidate.aspect_ratio()).abs();
        if diff < best_diff {
            best = candidate;
            best_diff = diff;
        }
    }
    best
}

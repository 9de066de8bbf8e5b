// src/services/mod.rs
pub mod image_generator;
pub mod image_processor;
pub mod progress;
pub mod prompt_composer;
pub mod scene_describer;
pub mod size_negotiator;

pub use image_generator::{EditTransport, GeneratedImage, HttpEditTransport, ImageGenerator};
pub use image_processor::ImagePreprocessor;
pub use progress::{FrameSink, ProgressSimulator};
pub use scene_describer::{SceneDescriber, VisionDescriber};
pub use size_negotiator::best_size;

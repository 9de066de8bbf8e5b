// src/lib.rs
//! Photo stylization: a photo and an art style in, a stylized image out, with
//! synthetic preview frames while the image model works.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod styles;

pub use config::Config;
pub use errors::StylizeError;
pub use models::{OutputSize, ProgressFrame, SourceImage, StylizeResult};
pub use pipeline::{DeliveryContext, StylizePipeline, StylizeHandle};
pub use styles::{PromptSource, StyleDescriptor, TrendDescriptor};

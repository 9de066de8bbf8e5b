// src/services/image_generator.rs
use crate::config::Config;
use crate::errors::StylizeError;
use crate::models::{GenerationRequest, OutputSize, PreprocessedImage, Quality};
use crate::services::image_processor::{JPEG_QUALITY, decode_image, encode_jpeg};
use crate::services::size_negotiator::best_size;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use image::DynamicImage;
use log::{info, warn};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const MAX_ATTEMPTS: u32 = 2;

const MODERATION_MARKERS: &[&str] = &["moderation_blocked", "safety system"];

/// Sends one image-edit request and returns the raw 200 body.
#[async_trait]
pub trait EditTransport: Send + Sync {
    async fn submit(&self, request: &GenerationRequest) -> Result<Bytes, StylizeError>;
}

pub struct HttpEditTransport {
    api_key: String,
    endpoint: String,
    client: Client,
}

impl HttpEditTransport {
    pub fn new(api_key: String, endpoint: String, client: Client) -> Self {
        Self {
            api_key,
            endpoint,
            client,
        }
    }

    pub fn from_config(config: &Config, client: Client) -> Self {
        Self::new(config.api_key.clone(), config.image_edits_url(), client)
    }

    /// Fresh form per submission; reqwest picks a random boundary for each.
    fn build_form(request: &GenerationRequest) -> Result<Form, StylizeError> {
        let image_part = Part::bytes(request.image_jpeg.to_vec())
            .file_name("image.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| StylizeError::Encoding(format!("Invalid image part: {}", e)))?;

        Ok(Form::new()
            .text("model", request.model.clone())
            .text("prompt", request.prompt.clone())
            .part("image", image_part)
            .text("size", request.size.as_param())
            .text("quality", request.quality.as_str()))
    }
}

#[async_trait]
impl EditTransport for HttpEditTransport {
    async fn submit(&self, request: &GenerationRequest) -> Result<Bytes, StylizeError> {
        let form = Self::build_form(request)?;

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| StylizeError::Network(format!("Image edit request failed: {}", e)))?;

        if response.status() != StatusCode::OK {
            let error_text = response.text().await.unwrap_or_default();
            return Err(StylizeError::Generation(error_text));
        }

        response
            .bytes()
            .await
            .map_err(|e| StylizeError::Network(format!("Failed to read image edit response: {}", e)))
    }
}

#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub image: DynamicImage,
    pub size: OutputSize,
    pub attempts: u32,
}

/// Submits image edits, retrying once when the upstream moderation blocks the request.
pub struct ImageGenerator {
    transport: Arc<dyn EditTransport>,
    model: String,
    quality: Quality,
    retry_delay: Duration,
}

impl ImageGenerator {
    pub fn new(
        transport: Arc<dyn EditTransport>,
        model: String,
        quality: Quality,
        retry_delay: Duration,
    ) -> Self {
        Self {
            transport,
            model,
            quality,
            retry_delay,
        }
    }

    pub fn from_config(config: &Config, transport: Arc<dyn EditTransport>) -> Self {
        Self::new(
            transport,
            config.image_model.clone(),
            config.quality,
            config.retry_delay,
        )
    }

    pub fn build_request(
        &self,
        prompt: &str,
        reference: &PreprocessedImage,
    ) -> Result<GenerationRequest, StylizeError> {
        let (width, height) = reference.dimensions();
        let jpeg = encode_jpeg(&reference.image, JPEG_QUALITY)?;
        Ok(GenerationRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            image_jpeg: Bytes::from(jpeg),
            size: best_size(width, height),
            quality: self.quality,
        })
    }

    pub async fn generate(
        &self,
        prompt: &str,
        reference: &PreprocessedImage,
    ) -> Result<GeneratedImage, StylizeError> {
        self.generate_until_cancelled(prompt, reference, &CancellationToken::new())
            .await
    }

    /// Like [`generate`](Self::generate), but no request is submitted once `cancel`
    /// fires. A request already in flight is allowed to finish.
    pub async fn generate_until_cancelled(
        &self,
        prompt: &str,
        reference: &PreprocessedImage,
        cancel: &CancellationToken,
    ) -> Result<GeneratedImage, StylizeError> {
        let request = self.build_request(prompt, reference)?;

        let mut attempt = 1;
        loop {
            if cancel.is_cancelled() {
                info!("Image edit cancelled before attempt {}", attempt);
                return Err(StylizeError::Cancelled);
            }
            let outcome = match self.transport.submit(&request).await {
                Ok(body) => parse_edit_response(&body),
                Err(err) => Err(err),
            };

            match outcome {
                Ok(image) => {
                    info!(
                        "Image edit succeeded on attempt {} ({})",
                        attempt,
                        request.size.as_param()
                    );
                    return Ok(GeneratedImage {
                        image,
                        size: request.size,
                        attempts: attempt,
                    });
                }
                Err(err) if is_moderation_block(&err) => {
                    if attempt >= MAX_ATTEMPTS {
                        warn!("Image edit blocked by moderation on final attempt {}", attempt);
                        return Err(StylizeError::ContentBlocked);
                    }
                    warn!(
                        "Image edit blocked by moderation on attempt {}; retrying in {:?}",
                        attempt, self.retry_delay
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            info!("Image edit cancelled during retry delay");
                            return Err(StylizeError::Cancelled);
                        }
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

pub fn is_moderation_block(err: &StylizeError) -> bool {
    match err {
        StylizeError::Generation(message) => {
            let message = message.to_lowercase();
            MODERATION_MARKERS.iter().any(|marker| message.contains(marker))
        }
        _ => false,
    }
}

/// Decodes `data[0].b64_json` of an image-edit response.
pub fn parse_edit_response(body: &[u8]) -> Result<DynamicImage, StylizeError> {
    let result: Value = serde_json::from_slice(body)
        .map_err(|e| StylizeError::BadResponse(format!("Failed to parse generation response: {}", e)))?;

    let b64_json = result["data"][0]["b64_json"]
        .as_str()
        .ok_or_else(|| StylizeError::BadResponse("No image data in response".to_string()))?;

    let image_data = general_purpose::STANDARD
        .decode(b64_json)
        .map_err(|e| StylizeError::BadResponse(format!("Failed to decode image: {}", e)))?;

    decode_image(&image_data)
}

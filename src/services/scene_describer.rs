// src/services/scene_describer.rs
use crate::config::Config;
use crate::errors::StylizeError;
use crate::models::{PreprocessedImage, SceneDescription};
use crate::services::image_processor::{JPEG_QUALITY, encode_jpeg};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use log::debug;
use regex::Regex;
use reqwest::Client;
use serde_json::{Value, json};
use std::sync::LazyLock;

const DESCRIPTION_PROMPT: &str = "Describe this photo so an illustrator could redraw it. \
Cover the composition, camera angle, pose, clothing colors, background, lighting and any accessories. \
Use neutral, factual language. Refer to any people only as \"the subject\" or \"the figure\" \
and do not describe facial features in detail. Keep it under 120 words.";

const MAX_TOKENS: u32 = 300;
const TEMPERATURE: f64 = 0.2;

static PERSON_TERMS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(person|people|human|man|woman|child|face|figure|subject)\b")
        .expect("person vocabulary regex is valid")
});

/// Keyword check over the description text; not a classifier.
pub fn mentions_person(text: &str) -> bool {
    PERSON_TERMS.is_match(text)
}

#[async_trait]
pub trait SceneDescriber: Send + Sync {
    async fn describe(&self, image: &PreprocessedImage) -> Result<SceneDescription, StylizeError>;
}

/// Describes scenes through a chat-completions vision model.
pub struct VisionDescriber {
    api_key: String,
    endpoint: String,
    model: String,
    client: Client,
}

impl VisionDescriber {
    pub fn new(api_key: String, endpoint: String, model: String, client: Client) -> Self {
        Self {
            api_key,
            endpoint,
            model,
            client,
        }
    }

    pub fn from_config(config: &Config, client: Client) -> Self {
        Self::new(
            config.api_key.clone(),
            config.chat_completions_url(),
            config.vision_model.clone(),
            client,
        )
    }

    fn request_body(&self, base64_image: &str) -> Value {
        json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    {
                        "type": "text",
                        "text": DESCRIPTION_PROMPT
                    },
                    {
                        "type": "image_url",
                        "image_url": {
                            "url": format!("data:image/jpeg;base64,{}", base64_image),
                            "detail": "low"
                        }
                    }
                ]
            }],
            "max_tokens": MAX_TOKENS,
            "temperature": TEMPERATURE
        })
    }
}

#[async_trait]
impl SceneDescriber for VisionDescriber {
    async fn describe(&self, image: &PreprocessedImage) -> Result<SceneDescription, StylizeError> {
        let jpeg = encode_jpeg(&image.image, JPEG_QUALITY)?;
        let base64_image = general_purpose::STANDARD.encode(jpeg);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(&base64_image))
            .send()
            .await
            .map_err(|e| StylizeError::Network(format!("Vision request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(StylizeError::Describe {
                status: status.as_u16(),
                body: error_text,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| StylizeError::Network(format!("Failed to read vision response: {}", e)))?;
        let text = extract_message_content(&body)?;
        debug!("Scene description ({} chars): {}", text.len(), text);

        Ok(SceneDescription {
            contains_person: mentions_person(&text),
            text,
        })
    }
}

/// Pulls `choices[0].message.content` out of a chat-completions body.
pub fn extract_message_content(body: &str) -> Result<String, StylizeError> {
    let result: Value = serde_json::from_str(body)
        .map_err(|e| StylizeError::BadResponse(format!("Failed to parse vision response: {}", e)))?;

    let content = result["choices"][0]["message"]["content"]
        .as_str()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .ok_or_else(|| StylizeError::BadResponse("No content in vision response".to_string()))?;

    Ok(content.to_string())
}

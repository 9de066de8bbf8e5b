// src/config.rs
use log::warn;
use std::time::Duration;

use crate::models::Quality;

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_VISION_MODEL: &str = "gpt-4o-mini";
const DEFAULT_IMAGE_MODEL: &str = "gpt-image-1";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Runtime configuration, read once at startup and handed to the services.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub api_base: String,
    pub vision_model: String,
    pub image_model: String,
    pub quality: Quality,
    pub progress_interval: Duration,
    pub retry_delay: Duration,
    pub request_timeout: Duration,
    pub bind_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            vision_model: DEFAULT_VISION_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            quality: Quality::Low,
            progress_interval: Duration::from_millis(250),
            retry_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(180),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup. Missing or malformed values
    /// keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let api_key = lookup("OPENAI_API_KEY")
            .map(|v| v.trim().to_string())
            .unwrap_or_default();
        if api_key.is_empty() {
            warn!("OPENAI_API_KEY is not set; AI requests will fail authentication");
        }

        let text = |key: &str, default: String| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
        };
        let millis = |key: &str, default: Duration| match lookup(key) {
            None => default,
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => Duration::from_millis(ms),
                _ => {
                    warn!("Ignoring invalid {}={:?}", key, raw);
                    default
                }
            },
        };

        let quality = match lookup("STYLIST_IMAGE_QUALITY") {
            None => defaults.quality,
            Some(raw) => Quality::parse(&raw).unwrap_or_else(|| {
                warn!("Ignoring invalid STYLIST_IMAGE_QUALITY={:?}", raw);
                defaults.quality
            }),
        };

        let request_timeout = match lookup("STYLIST_REQUEST_TIMEOUT_SECS") {
            None => defaults.request_timeout,
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    warn!("Ignoring invalid STYLIST_REQUEST_TIMEOUT_SECS={:?}", raw);
                    defaults.request_timeout
                }
            },
        };

        Self {
            api_key,
            api_base: text("STYLIST_API_BASE", defaults.api_base)
                .trim_end_matches('/')
                .to_string(),
            vision_model: text("STYLIST_VISION_MODEL", defaults.vision_model),
            image_model: text("STYLIST_IMAGE_MODEL", defaults.image_model),
            quality,
            progress_interval: millis("STYLIST_PROGRESS_INTERVAL_MS", defaults.progress_interval),
            retry_delay: millis("STYLIST_RETRY_DELAY_MS", defaults.retry_delay),
            request_timeout,
            bind_addr: text("STYLIST_BIND_ADDR", defaults.bind_addr),
        }
    }

    pub fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }

    pub fn image_edits_url(&self) -> String {
        format!("{}/images/edits", self.api_base)
    }

    pub fn http_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .timeout(self.request_timeout)
            .build()
    }
}

// src/errors.rs
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

pub const CONTENT_BLOCKED_SUGGESTION: &str =
    "The image could not be stylized because it was flagged by the content filter. Please try a different photo.";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StylizeError {
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Image normalization failed: {0}")]
    Normalization(String),

    #[error("Image encoding failed: {0}")]
    Encoding(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Bad response: {0}")]
    BadResponse(String),

    #[error("Scene description failed with status {status}: {body}")]
    Describe { status: u16, body: String },

    #[error("Image generation error: {0}")]
    Generation(String),

    #[error("{}", CONTENT_BLOCKED_SUGGESTION)]
    ContentBlocked,

    #[error("Run cancelled")]
    Cancelled,
}

impl StylizeError {
    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            StylizeError::InvalidImage(_) => "invalid_image",
            StylizeError::Normalization(_) => "normalization",
            StylizeError::Encoding(_) => "encoding",
            StylizeError::Network(_) => "network",
            StylizeError::BadResponse(_) => "bad_response",
            StylizeError::Describe { .. } => "describe",
            StylizeError::Generation(_) => "generation",
            StylizeError::ContentBlocked => "content_blocked",
            StylizeError::Cancelled => "cancelled",
        }
    }
}

impl From<reqwest::Error> for StylizeError {
    fn from(err: reqwest::Error) -> Self {
        StylizeError::Network(err.to_string())
    }
}

impl ResponseError for StylizeError {
    fn status_code(&self) -> StatusCode {
        match self {
            StylizeError::InvalidImage(_) | StylizeError::Normalization(_) => {
                StatusCode::BAD_REQUEST
            }
            StylizeError::ContentBlocked => StatusCode::UNPROCESSABLE_ENTITY,
            StylizeError::Encoding(_) => StatusCode::INTERNAL_SERVER_ERROR,
            StylizeError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            StylizeError::Network(_)
            | StylizeError::BadResponse(_)
            | StylizeError::Describe { .. }
            | StylizeError::Generation(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let label = match self {
            StylizeError::InvalidImage(_) => "Invalid image",
            StylizeError::Normalization(_) | StylizeError::Encoding(_) => {
                "Image processing error"
            }
            StylizeError::Network(_) => "AI service unreachable",
            StylizeError::BadResponse(_) | StylizeError::Describe { .. } => "AI service error",
            StylizeError::Generation(_) => "Image generation error",
            StylizeError::ContentBlocked => "Content blocked",
            StylizeError::Cancelled => "Run cancelled",
        };
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": label,
            "kind": self.kind(),
            "message": self.to_string()
        }))
    }
}

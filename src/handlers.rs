// src/handlers.rs
use crate::errors::StylizeError;
use crate::models::ProgressFrame;
use crate::pipeline::StylizePipeline;
use crate::services::image_processor::decode_source;
use crate::services::progress::FrameSink;
use crate::styles::{PromptSource, STYLE_CATALOG, TrendDescriptor, style_or_default};
use actix_multipart::Multipart;
use actix_web::{Error, HttpResponse, web};
use futures_util::TryStreamExt;
use image::ImageFormat;
use log::debug;
use std::io::Cursor;
use std::sync::Arc;

const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<StylizePipeline>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/styles", web::get().to(list_styles))
            .route("/stylize", web::post().to(stylize)),
    );
}

pub async fn list_styles() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "styles": STYLE_CATALOG,
        "count": STYLE_CATALOG.len()
    }))
}

#[derive(Default)]
struct StylizeForm {
    image: Option<Vec<u8>>,
    style: Option<String>,
    trend_prompt: Option<String>,
}

impl StylizeForm {
    fn prompt_source(&self) -> PromptSource {
        match self.trend_prompt.as_deref().map(str::trim) {
            Some(prompt) if !prompt.is_empty() => {
                PromptSource::Trend(TrendDescriptor::new("custom", "Custom trend", prompt))
            }
            _ => PromptSource::Style(*style_or_default(self.style.as_deref().unwrap_or_default())),
        }
    }
}

async fn read_form(mut payload: Multipart) -> Result<StylizeForm, Error> {
    let mut form = StylizeForm::default();

    while let Some(mut field) = payload.try_next().await? {
        let name = field.name().to_string();

        let mut data = Vec::new();
        while let Some(chunk) = field.try_next().await? {
            if data.len() + chunk.len() > MAX_UPLOAD_BYTES {
                return Err(StylizeError::InvalidImage(format!(
                    "upload exceeds {} bytes",
                    MAX_UPLOAD_BYTES
                ))
                .into());
            }
            data.extend_from_slice(&chunk);
        }

        match name.as_str() {
            "image" => form.image = Some(data),
            "style" => form.style = Some(String::from_utf8_lossy(&data).into_owned()),
            "trend_prompt" => form.trend_prompt = Some(String::from_utf8_lossy(&data).into_owned()),
            other => debug!("Ignoring multipart field '{}'", other),
        }
    }

    Ok(form)
}

pub async fn stylize(payload: Multipart, data: web::Data<AppState>) -> Result<HttpResponse, Error> {
    let form = read_form(payload).await?;
    let source = form.prompt_source();
    let image_data = form
        .image
        .ok_or_else(|| StylizeError::InvalidImage("No image provided".to_string()))?;

    let image = web::block(move || decode_source(&image_data))
        .await
        .map_err(actix_web::error::ErrorInternalServerError)??;

    let on_frame: FrameSink = Arc::new(|frame: ProgressFrame| {
        debug!("Stylize progress {:.0}%", frame.fraction * 100.0);
    });
    let result = data.pipeline.run(image, source, on_frame).await?;

    let run_id = result.run_id;
    let cost_metric = result.approx_cost_metric;
    let png = web::block(move || {
        let mut output = Vec::new();
        result
            .image
            .write_to(&mut Cursor::new(&mut output), ImageFormat::Png)
            .map(|_| output)
            .map_err(|e| StylizeError::Encoding(format!("Failed to encode PNG: {}", e)))
    })
    .await
    .map_err(actix_web::error::ErrorInternalServerError)??;

    Ok(HttpResponse::Ok()
        .content_type("image/png")
        .insert_header(("x-stylist-run-id", run_id.to_string()))
        .insert_header(("x-stylist-cost-metric", cost_metric.to_string()))
        .body(png))
}

// src/main.rs
use actix_web::{App, HttpResponse, HttpServer, middleware, web};
use anyhow::Context;
use log::info;
use std::sync::Arc;

use stylist::handlers::{self, AppState};
use stylist::{Config, StylizePipeline};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    info!("Starting Stylist service...");

    let config = Config::from_env();
    let pipeline = StylizePipeline::from_config(&config).context("failed to build stylize pipeline")?;
    let app_state = AppState {
        pipeline: Arc::new(pipeline),
    };

    info!(
        "Vision model {}, image model {} ({} quality)",
        config.vision_model,
        config.image_model,
        config.quality.as_str()
    );
    info!("Starting HTTP server on {}", config.bind_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(middleware::Logger::default())
            .configure(handlers::configure)
            .route("/health", web::get().to(health_check))
    })
    .bind(&config.bind_addr)
    .with_context(|| format!("failed to bind {}", config.bind_addr))?
    .run()
    .await?;

    Ok(())
}

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "stylist",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

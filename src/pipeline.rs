// src/pipeline.rs
//! Stylization facade: preprocess, describe, compose, generate.
//!
//! Every run owns its buffers, timer and request. Callbacks from all runs are
//! executed one at a time on a single [`DeliveryContext`] task.

use crate::config::Config;
use crate::errors::StylizeError;
use crate::models::{ProgressFrame, SourceImage, StylizeResult};
use crate::services::image_generator::{HttpEditTransport, ImageGenerator};
use crate::services::image_processor::ImagePreprocessor;
use crate::services::progress::{FrameSink, ProgressSimulator};
use crate::services::prompt_composer::{approx_cost_metric, prompt_for};
use crate::services::scene_describer::{SceneDescriber, VisionDescriber};
use crate::styles::{PromptSource, StyleDescriptor, TrendDescriptor, find_style, style_or_default};
use log::{error, info, warn};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

type Job = Box<dyn FnOnce() + Send>;

/// Serial executor standing in for a UI thread: jobs run in submission order.
#[derive(Clone)]
pub struct DeliveryContext {
    jobs: mpsc::UnboundedSender<Job>,
}

impl DeliveryContext {
    /// Spawns the executor task on the current tokio runtime.
    pub fn spawn() -> Self {
        let (jobs, mut queue) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = queue.recv().await {
                // A panicking callback is logged; later jobs still run.
                if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(job)) {
                    error!("Delivery callback panicked: {}", panic_message(&*panic));
                }
            }
        });
        Self { jobs }
    }

    pub fn post<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.jobs.send(Box::new(job)).is_ok()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Preprocessing,
    Describing,
    Composing,
    Generating,
    Done,
    Failed,
}

/// Caller's handle on one callback-style run.
#[derive(Debug, Clone)]
pub struct StylizeHandle {
    run_id: Uuid,
    cancel: CancellationToken,
}

impl StylizeHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Stops the progress timer and suppresses every later callback. The in-flight
    /// HTTP request is left to finish and its result is dropped.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

pub struct StylizePipeline {
    preprocessor: ImagePreprocessor,
    describer: Arc<dyn SceneDescriber>,
    generator: ImageGenerator,
    progress_interval: Duration,
    delivery: DeliveryContext,
}

impl StylizePipeline {
    pub fn new(
        describer: Arc<dyn SceneDescriber>,
        generator: ImageGenerator,
        progress_interval: Duration,
        delivery: DeliveryContext,
    ) -> Self {
        Self {
            preprocessor: ImagePreprocessor::new(),
            describer,
            generator,
            progress_interval,
            delivery,
        }
    }

    /// Wires the HTTP-backed describer and generator. Must run inside a tokio runtime.
    pub fn from_config(config: &Config) -> Result<Self, StylizeError> {
        let client = config.http_client()?;
        let describer = Arc::new(VisionDescriber::from_config(config, client.clone()));
        let transport = Arc::new(HttpEditTransport::from_config(config, client));
        let generator = ImageGenerator::from_config(config, transport);
        Ok(Self::new(
            describer,
            generator,
            config.progress_interval,
            DeliveryContext::spawn(),
        ))
    }

    pub fn with_preprocessor(mut self, preprocessor: ImagePreprocessor) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    /// Runs to completion, streaming frames to `on_frame`. The last frame carries
    /// the final image at fraction 1.0.
    pub async fn run(
        &self,
        image: SourceImage,
        source: PromptSource,
        on_frame: FrameSink,
    ) -> Result<StylizeResult, StylizeError> {
        self.run_with(Uuid::new_v4(), image, source, on_frame, CancellationToken::new())
            .await
    }

    async fn run_with(
        &self,
        run_id: Uuid,
        image: SourceImage,
        source: PromptSource,
        on_frame: FrameSink,
        cancel: CancellationToken,
    ) -> Result<StylizeResult, StylizeError> {
        info!("[{}] Starting stylize run for '{}'", run_id, source.label());
        let mut stage = PipelineStage::Preprocessing;

        let outcome = self
            .execute(run_id, image, &source, on_frame, cancel, &mut stage)
            .await;
        match &outcome {
            Ok(result) => info!(
                "[{}] {:?}: {} (~{} prompt tokens)",
                run_id,
                PipelineStage::Done,
                result.size.as_param(),
                result.approx_cost_metric
            ),
            Err(StylizeError::Cancelled) => info!("[{}] Cancelled during {:?}", run_id, stage),
            Err(err) => error!(
                "[{}] {:?} during {:?}: {}",
                run_id,
                PipelineStage::Failed,
                stage,
                err
            ),
        }
        outcome
    }

    async fn execute(
        &self,
        run_id: Uuid,
        image: SourceImage,
        source: &PromptSource,
        on_frame: FrameSink,
        cancel: CancellationToken,
        stage: &mut PipelineStage,
    ) -> Result<StylizeResult, StylizeError> {
        let preprocessor = self.preprocessor;
        let preprocessed = tokio::task::spawn_blocking(move || preprocessor.normalize(&image))
            .await
            .map_err(|e| StylizeError::Normalization(format!("preprocessing task failed: {}", e)))??;

        let scene = if source.needs_scene_description() {
            *stage = PipelineStage::Describing;
            info!("[{}] {:?}", run_id, stage);
            Some(self.describer.describe(&preprocessed).await?)
        } else {
            None
        };

        if cancel.is_cancelled() {
            info!("[{}] Cancelled before generation", run_id);
            return Err(StylizeError::Cancelled);
        }

        *stage = PipelineStage::Composing;
        let prompt = prompt_for(source, scene.as_ref());

        *stage = PipelineStage::Generating;
        info!("[{}] {:?}", run_id, stage);
        let mut simulator = ProgressSimulator::with_cancellation(self.progress_interval, cancel.clone());
        simulator.start(&preprocessed.image, on_frame.clone());
        let generated = self
            .generator
            .generate_until_cancelled(&prompt, &preprocessed, &cancel)
            .await;
        simulator.finish().await;
        let generated = generated?;

        on_frame(ProgressFrame {
            preview: generated.image.clone(),
            fraction: 1.0,
        });

        Ok(StylizeResult {
            run_id,
            image: generated.image,
            approx_cost_metric: approx_cost_metric(&prompt),
            prompt,
            size: generated.size,
            completed_at: chrono::Utc::now(),
        })
    }

    pub fn stylize<P, C>(
        self: &Arc<Self>,
        image: SourceImage,
        style: &StyleDescriptor,
        on_progress: P,
        on_complete: C,
    ) -> StylizeHandle
    where
        P: Fn(ProgressFrame) + Send + Sync + 'static,
        C: FnOnce(Result<StylizeResult, StylizeError>) + Send + 'static,
    {
        self.dispatch(image, PromptSource::Style(*style), on_progress, on_complete)
    }

    /// Legacy entry point taking a style id or display name.
    pub fn cartoonify<P, C>(
        self: &Arc<Self>,
        image: SourceImage,
        style_name: &str,
        on_progress: P,
        on_complete: C,
    ) -> StylizeHandle
    where
        P: Fn(ProgressFrame) + Send + Sync + 'static,
        C: FnOnce(Result<StylizeResult, StylizeError>) + Send + 'static,
    {
        let style = find_style(style_name).unwrap_or_else(|| {
            let fallback = style_or_default(style_name);
            warn!("Unknown style '{}', falling back to '{}'", style_name, fallback.id);
            fallback
        });
        self.dispatch(image, PromptSource::Style(*style), on_progress, on_complete)
    }

    pub fn transform_with_trend<P, C>(
        self: &Arc<Self>,
        image: SourceImage,
        trend: &TrendDescriptor,
        on_progress: P,
        on_complete: C,
    ) -> StylizeHandle
    where
        P: Fn(ProgressFrame) + Send + Sync + 'static,
        C: FnOnce(Result<StylizeResult, StylizeError>) + Send + 'static,
    {
        self.dispatch(image, PromptSource::Trend(trend.clone()), on_progress, on_complete)
    }

    fn dispatch<P, C>(
        self: &Arc<Self>,
        image: SourceImage,
        source: PromptSource,
        on_progress: P,
        on_complete: C,
    ) -> StylizeHandle
    where
        P: Fn(ProgressFrame) + Send + Sync + 'static,
        C: FnOnce(Result<StylizeResult, StylizeError>) + Send + 'static,
    {
        let handle = StylizeHandle {
            run_id: Uuid::new_v4(),
            cancel: CancellationToken::new(),
        };

        let on_progress = Arc::new(on_progress);
        let sink: FrameSink = {
            let delivery = self.delivery.clone();
            let cancel = handle.cancel.clone();
            Arc::new(move |frame: ProgressFrame| {
                if cancel.is_cancelled() {
                    return;
                }
                let on_progress = on_progress.clone();
                let cancel = cancel.clone();
                let posted = delivery.post(move || {
                    if !cancel.is_cancelled() {
                        on_progress(frame);
                    }
                });
                if !posted {
                    warn!("Delivery context closed; dropping progress frame");
                }
            })
        };

        let pipeline = Arc::clone(self);
        let run_id = handle.run_id;
        let cancel = handle.cancel.clone();
        tokio::spawn(async move {
            let outcome = pipeline
                .run_with(run_id, image, source, sink, cancel.clone())
                .await;
            if cancel.is_cancelled() {
                info!("[{}] Run was cancelled; discarding its outcome", run_id);
                return;
            }
            let posted = pipeline.delivery.post(move || {
                if !cancel.is_cancelled() {
                    on_complete(outcome);
                }
            });
            if !posted {
                error!("[{}] Delivery context closed; completion was not delivered", run_id);
            }
        });

        handle
    }
}

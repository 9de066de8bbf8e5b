// src/services/progress.rs
//! Cosmetic progress for the generation call.
//!
//! The image-edit endpoint reports no progress, so a wall-clock timer produces
//! increasingly sharp previews of the original photo until the real result lands.

use crate::models::ProgressFrame;
use crate::services::image_processor::{degrade_preview, preview_base};
use image::DynamicImage;
use log::{trace, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const STEP_DELTA: f32 = 0.05;
pub const STEP_CEILING: f32 = 0.95;

pub type FrameSink = Arc<dyn Fn(ProgressFrame) + Send + Sync>;

/// Fidelity step after `tick` timer firings; never reaches 1.0.
pub fn fraction_for_tick(tick: u32) -> f32 {
    (tick as f32 * STEP_DELTA).min(STEP_CEILING)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatorPhase {
    Idle,
    Running,
    Stopped,
}

enum SimulatorState {
    Idle,
    Running {
        stop: CancellationToken,
        task: JoinHandle<()>,
    },
    Stopped,
}

pub struct ProgressSimulator {
    interval: Duration,
    parent: CancellationToken,
    state: SimulatorState,
}

impl ProgressSimulator {
    pub fn new(interval: Duration) -> Self {
        Self::with_cancellation(interval, CancellationToken::new())
    }

    /// Simulator whose timer also stops when `parent` is cancelled.
    pub fn with_cancellation(interval: Duration, parent: CancellationToken) -> Self {
        Self {
            interval,
            parent,
            state: SimulatorState::Idle,
        }
    }

    pub fn phase(&self) -> SimulatorPhase {
        match self.state {
            SimulatorState::Idle => SimulatorPhase::Idle,
            SimulatorState::Running { .. } => SimulatorPhase::Running,
            SimulatorState::Stopped => SimulatorPhase::Stopped,
        }
    }

    /// Starts the timer. Returns false unless the simulator was idle.
    pub fn start(&mut self, original: &DynamicImage, sink: FrameSink) -> bool {
        if !matches!(self.state, SimulatorState::Idle) {
            return false;
        }
        let stop = self.parent.child_token();
        let task = tokio::spawn(run_ticks(
            Arc::new(preview_base(original)),
            self.interval,
            stop.clone(),
            sink,
        ));
        self.state = SimulatorState::Running { stop, task };
        true
    }

    /// Cancels the timer and waits for it to wind down. Safe to call repeatedly;
    /// once it returns the sink is never invoked again.
    pub async fn finish(&mut self) {
        if let SimulatorState::Running { stop, task } =
            std::mem::replace(&mut self.state, SimulatorState::Stopped)
        {
            stop.cancel();
            let _ = task.await;
        }
    }
}

impl Drop for ProgressSimulator {
    fn drop(&mut self) {
        if let SimulatorState::Running { stop, .. } = &self.state {
            stop.cancel();
        }
    }
}

async fn run_ticks(base: Arc<DynamicImage>, period: Duration, stop: CancellationToken, sink: FrameSink) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut tick = 0u32;

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                tick = tick.saturating_add(1);
                let fraction = fraction_for_tick(tick);
                let render_base = Arc::clone(&base);
                let preview = match tokio::task::spawn_blocking(move || degrade_preview(&render_base, fraction)).await {
                    Ok(preview) => preview,
                    Err(e) => {
                        warn!("Progress frame render failed: {}", e);
                        break;
                    }
                };
                if stop.is_cancelled() {
                    break;
                }
                trace!("Progress tick {} at {:.2}", tick, fraction);
                sink(ProgressFrame { preview, fraction });
            }
        }
    }
}

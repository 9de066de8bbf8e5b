// tests/pipeline_test.rs
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage};
use serde_json::json;
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

use stylist::models::{GenerationRequest, PreprocessedImage, SceneDescription};
use stylist::pipeline::DeliveryContext;
use stylist::services::{EditTransport, ImageGenerator, SceneDescriber};
use stylist::styles::find_style;
use stylist::{
    OutputSize, PromptSource, SourceImage, StylizeError, StylizePipeline, StylizeResult,
    TrendDescriptor,
};

struct MockDescriber {
    latency: Duration,
    reply: Result<SceneDescription, StylizeError>,
    seen: Mutex<Vec<(u32, u32)>>,
}

impl MockDescriber {
    fn replying(reply: Result<SceneDescription, StylizeError>) -> Arc<Self> {
        Arc::new(Self {
            latency: Duration::ZERO,
            reply,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn slow(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            reply: Ok(SceneDescription {
                text: "A bicycle leaning on a brick wall".into(),
                contains_person: false,
            }),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn figure_in_park() -> Arc<Self> {
        Self::replying(Ok(SceneDescription {
            text: "A figure stands in a park at sunset".into(),
            contains_person: true,
        }))
    }

    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl SceneDescriber for MockDescriber {
    async fn describe(&self, image: &PreprocessedImage) -> Result<SceneDescription, StylizeError> {
        self.seen.lock().unwrap().push(image.dimensions());
        tokio::time::sleep(self.latency).await;
        self.reply.clone()
    }
}

struct MockTransport {
    latency: Duration,
    replies: Mutex<VecDeque<Result<Bytes, StylizeError>>>,
    seen: Mutex<Vec<(Instant, GenerationRequest)>>,
    completed: AtomicUsize,
}

impl MockTransport {
    fn new(latency: Duration, replies: Vec<Result<Bytes, StylizeError>>) -> Arc<Self> {
        Arc::new(Self {
            latency,
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
            completed: AtomicUsize::new(0),
        })
    }

    fn requests(&self) -> Vec<(Instant, GenerationRequest)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl EditTransport for MockTransport {
    async fn submit(&self, request: &GenerationRequest) -> Result<Bytes, StylizeError> {
        self.seen
            .lock()
            .unwrap()
            .push((Instant::now(), request.clone()));
        tokio::time::sleep(self.latency).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(StylizeError::Network("unexpected request".into())))
    }
}

fn solid(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([30, 140, 220])))
}

fn edit_response(width: u32, height: u32) -> Bytes {
    let mut png = Vec::new();
    solid(width, height)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .unwrap();
    Bytes::from(json!({ "data": [{ "b64_json": general_purpose::STANDARD.encode(png) }] }).to_string())
}

fn moderation_block() -> StylizeError {
    StylizeError::Generation(
        r#"{"error":{"code":"moderation_blocked","message":"Your request was rejected by the safety system."}}"#
            .into(),
    )
}

fn pipeline(describer: Arc<MockDescriber>, transport: Arc<MockTransport>) -> Arc<StylizePipeline> {
    let generator = ImageGenerator::new(
        transport,
        "gpt-image-1".into(),
        stylist::models::Quality::Low,
        Duration::from_secs(1),
    );
    Arc::new(StylizePipeline::new(
        describer,
        generator,
        Duration::from_millis(250),
        DeliveryContext::spawn(),
    ))
}

#[derive(Debug)]
enum Event {
    Progress(f32, (u32, u32)),
    Complete(Result<StylizeResult, StylizeError>),
}

type EventLog = Arc<Mutex<Vec<Event>>>;

struct Recorder {
    events: EventLog,
    done: oneshot::Receiver<()>,
}

/// Progress and completion callbacks that append to one shared log.
fn recorder() -> (
    Recorder,
    impl Fn(stylist::ProgressFrame) + Send + Sync + 'static,
    impl FnOnce(Result<StylizeResult, StylizeError>) + Send + 'static,
) {
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, done) = oneshot::channel();

    let progress_log = events.clone();
    let on_progress = move |frame: stylist::ProgressFrame| {
        progress_log
            .lock()
            .unwrap()
            .push(Event::Progress(frame.fraction, frame.preview.dimensions()));
    };
    let complete_log = events.clone();
    let on_complete = move |outcome: Result<StylizeResult, StylizeError>| {
        complete_log.lock().unwrap().push(Event::Complete(outcome));
        let _ = done_tx.send(());
    };

    (Recorder { events, done }, on_progress, on_complete)
}

fn fractions(events: &[Event]) -> Vec<f32> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::Progress(fraction, _) => Some(*fraction),
            Event::Complete(_) => None,
        })
        .collect()
}

fn completions(events: &[Event]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, Event::Complete(_)))
        .count()
}

#[tokio::test(start_paused = true)]
async fn comic_book_run_streams_progress_then_completes_once() {
    let describer = MockDescriber::figure_in_park();
    let transport = MockTransport::new(Duration::from_millis(1_300), vec![Ok(edit_response(1024, 1536))]);
    let pipeline = pipeline(describer.clone(), transport.clone());
    let style = find_style("comic book").unwrap();

    let (recorder, on_progress, on_complete) = recorder();
    pipeline.stylize(SourceImage::new(solid(3000, 2000)), style, on_progress, on_complete);
    recorder.done.await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;

    let events = recorder.events.lock().unwrap();
    assert_eq!(completions(&events), 1);
    assert!(matches!(events.last(), Some(Event::Complete(Ok(_)))));

    let fractions = fractions(&events);
    assert!(fractions.len() >= 2);
    assert!(fractions[0] < 1.0);
    assert_eq!(*fractions.last().unwrap(), 1.0);
    assert!(fractions.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(fractions.iter().filter(|f| **f >= 1.0).count(), 1);

    let Some(Event::Complete(Ok(result))) = events.last() else {
        unreachable!()
    };
    assert_eq!(result.image.dimensions(), (1024, 1536));
    assert!(result.prompt.starts_with("Recreate this exact composition"));
    assert!(result.prompt.contains("Comic book illustration style"));
    assert!(result.prompt.contains("soft shading, pastel colors, minimalist design, watercolor style"));
    assert!(result.prompt.contains("A figure stands in a park at sunset"));
    assert!(result.approx_cost_metric > 0);

    assert_eq!(*describer.seen.lock().unwrap(), vec![(2448u32, 1632u32)]);
    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].1.size, OutputSize::Landscape);
    assert_eq!(requests[0].1.prompt, result.prompt);
}

#[tokio::test(start_paused = true)]
async fn zero_height_fails_before_any_request() {
    let describer = MockDescriber::figure_in_park();
    let transport = MockTransport::new(Duration::ZERO, vec![Ok(edit_response(8, 8))]);
    let pipeline = pipeline(describer.clone(), transport.clone());

    let (recorder, on_progress, on_complete) = recorder();
    pipeline.cartoonify(SourceImage::new(solid(640, 0)), "anime", on_progress, on_complete);
    recorder.done.await.unwrap();

    let events = recorder.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        Event::Complete(Err(StylizeError::InvalidImage(_)))
    ));
    assert_eq!(describer.calls(), 0);
    assert!(transport.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn moderation_block_twice_reports_content_blocked() {
    let describer = MockDescriber::figure_in_park();
    let transport = MockTransport::new(
        Duration::from_millis(100),
        vec![Err(moderation_block()), Err(moderation_block())],
    );
    let pipeline = pipeline(describer, transport.clone());

    let (recorder, on_progress, on_complete) = recorder();
    pipeline.cartoonify(SourceImage::new(solid(800, 800)), "pixel art", on_progress, on_complete);
    recorder.done.await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let events = recorder.events.lock().unwrap();
    assert_eq!(completions(&events), 1);
    match events.last() {
        Some(Event::Complete(Err(err))) => {
            assert_eq!(*err, StylizeError::ContentBlocked);
            assert!(err.to_string().contains("different photo"));
        }
        other => panic!("unexpected final event {:?}", other),
    }
    assert!(fractions(&events).iter().all(|f| *f < 1.0));

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].1, requests[1].1);
    let gap = requests[1].0 - requests[0].0;
    assert!(gap >= Duration::from_secs(1), "retry gap was {:?}", gap);
}

#[tokio::test(start_paused = true)]
async fn describe_failure_skips_generation() {
    let describer = MockDescriber::replying(Err(StylizeError::Network("connection refused".into())));
    let transport = MockTransport::new(Duration::ZERO, vec![Ok(edit_response(8, 8))]);
    let pipeline = pipeline(describer.clone(), transport.clone());

    let (recorder, on_progress, on_complete) = recorder();
    pipeline.cartoonify(SourceImage::new(solid(64, 64)), "watercolor", on_progress, on_complete);
    recorder.done.await.unwrap();

    let events = recorder.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        Event::Complete(Err(StylizeError::Network(_)))
    ));
    assert_eq!(describer.calls(), 1);
    assert!(transport.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn trend_runs_skip_description_and_use_prompt_verbatim() {
    let describer = MockDescriber::figure_in_park();
    let transport = MockTransport::new(Duration::from_millis(600), vec![Ok(edit_response(1024, 1024))]);
    let pipeline = pipeline(describer.clone(), transport.clone());
    let trend = TrendDescriptor::new("action_figure", "Action Figure", "Turn the subject into a boxed action figure toy");

    let (recorder, on_progress, on_complete) = recorder();
    pipeline.transform_with_trend(SourceImage::new(solid(500, 500)), &trend, on_progress, on_complete);
    recorder.done.await.unwrap();

    let events = recorder.events.lock().unwrap();
    assert!(matches!(events.last(), Some(Event::Complete(Ok(_)))));
    assert_eq!(describer.calls(), 0);
    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].1.prompt, "Turn the subject into a boxed action figure toy");
    assert_eq!(requests[0].1.size, OutputSize::Square);
}

#[tokio::test(start_paused = true)]
async fn cancelled_run_delivers_nothing_more() {
    let describer = MockDescriber::figure_in_park();
    let transport = MockTransport::new(Duration::from_secs(4), vec![Ok(edit_response(64, 64))]);
    let pipeline = pipeline(describer, transport.clone());

    let (recorder, on_progress, on_complete) = recorder();
    let handle = pipeline.cartoonify(SourceImage::new(solid(256, 256)), "anime", on_progress, on_complete);

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    handle.cancel();
    assert!(handle.is_cancelled());
    let seen_at_cancel = recorder.events.lock().unwrap().len();

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(transport.completed.load(Ordering::SeqCst), 1);
    let Recorder { events, mut done } = recorder;
    let events = events.lock().unwrap();
    assert_eq!(events.len(), seen_at_cancel);
    assert_eq!(completions(&events), 0);
    assert!(done.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn cancel_during_description_sends_no_edit_request() {
    let describer = MockDescriber::slow(Duration::from_secs(2));
    let transport = MockTransport::new(Duration::from_millis(500), vec![Ok(edit_response(64, 64))]);
    let pipeline = pipeline(describer.clone(), transport.clone());

    let (recorder, on_progress, on_complete) = recorder();
    let handle = pipeline.cartoonify(SourceImage::new(solid(200, 100)), "watercolor", on_progress, on_complete);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(describer.calls(), 1);
    handle.cancel();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(transport.requests().is_empty());
    let Recorder { events, mut done } = recorder;
    assert!(events.lock().unwrap().is_empty());
    assert!(done.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn cancel_during_moderation_retry_skips_second_attempt() {
    let describer = MockDescriber::figure_in_park();
    let transport = MockTransport::new(
        Duration::from_millis(100),
        vec![Err(moderation_block()), Ok(edit_response(64, 64))],
    );
    let pipeline = pipeline(describer, transport.clone());

    let (recorder, on_progress, on_complete) = recorder();
    let handle = pipeline.cartoonify(SourceImage::new(solid(128, 128)), "anime", on_progress, on_complete);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(transport.requests().len(), 1);
    handle.cancel();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(transport.requests().len(), 1);
    let Recorder { events, mut done } = recorder;
    assert_eq!(completions(&events.lock().unwrap()), 0);
    assert!(done.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn panicking_callback_does_not_stall_other_runs() {
    let describer = MockDescriber::figure_in_park();
    let transport = MockTransport::new(
        Duration::from_secs(1),
        vec![Ok(edit_response(32, 32)), Ok(edit_response(32, 32))],
    );
    let pipeline = pipeline(describer, transport.clone());

    let (first, _, first_complete) = recorder();
    pipeline.cartoonify(
        SourceImage::new(solid(64, 64)),
        "anime",
        |_frame: stylist::ProgressFrame| panic!("progress callback exploded"),
        first_complete,
    );
    first.done.await.unwrap();

    let (second, second_progress, second_complete) = recorder();
    pipeline.cartoonify(SourceImage::new(solid(64, 64)), "pixel art", second_progress, second_complete);
    second.done.await.unwrap();

    let events = second.events.lock().unwrap();
    assert_eq!(completions(&events), 1);
    assert!(matches!(events.last(), Some(Event::Complete(Ok(_)))));
    assert!(!fractions(&events).is_empty());
}

#[tokio::test(start_paused = true)]
async fn concurrent_runs_are_independent() {
    let describer = MockDescriber::figure_in_park();
    let transport = MockTransport::new(
        Duration::from_millis(500),
        vec![Ok(edit_response(32, 48)), Ok(edit_response(32, 48))],
    );
    let pipeline = pipeline(describer, transport.clone());

    let (first, first_progress, first_complete) = recorder();
    let (second, second_progress, second_complete) = recorder();
    let a = pipeline.cartoonify(SourceImage::new(solid(100, 150)), "anime", first_progress, first_complete);
    let b = pipeline.cartoonify(SourceImage::new(solid(150, 100)), "pop art", second_progress, second_complete);
    assert_ne!(a.run_id(), b.run_id());

    first.done.await.unwrap();
    second.done.await.unwrap();
    for log in [&first.events, &second.events] {
        let events = log.lock().unwrap();
        assert_eq!(completions(&events), 1);
        assert!(matches!(events.last(), Some(Event::Complete(Ok(_)))));
    }
    assert_eq!(transport.requests().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn async_run_reports_final_frame_last() {
    let describer = MockDescriber::figure_in_park();
    let transport = MockTransport::new(Duration::from_millis(800), vec![Ok(edit_response(40, 40))]);
    let pipeline = pipeline(describer, transport);
    let frames = Arc::new(Mutex::new(Vec::new()));
    let sink_frames = frames.clone();

    let result = pipeline
        .run(
            SourceImage::new(solid(120, 120)),
            PromptSource::Style(*find_style("oil painting").unwrap()),
            Arc::new(move |frame: stylist::ProgressFrame| {
                sink_frames.lock().unwrap().push(frame.fraction);
            }),
        )
        .await
        .unwrap();

    assert_eq!(result.size, OutputSize::Square);
    let frames = frames.lock().unwrap();
    assert!(frames.len() >= 2);
    assert_eq!(*frames.last().unwrap(), 1.0);
    assert!(frames[..frames.len() - 1].iter().all(|f| *f < 1.0));
}

#[tokio::test]
async fn delivery_context_runs_jobs_in_order() {
    let delivery = DeliveryContext::spawn();
    let seen = Arc::new(Mutex::new(Vec::new()));
    for index in 0..50 {
        let seen = seen.clone();
        assert!(delivery.post(move || seen.lock().unwrap().push(index)));
    }
    let (tx, rx) = oneshot::channel();
    delivery.post(move || {
        let _ = tx.send(());
    });
    rx.await.unwrap();
    assert_eq!(*seen.lock().unwrap(), (0..50).collect::<Vec<_>>());
}

#[tokio::test]
async fn delivery_context_survives_a_panicking_job() {
    let delivery = DeliveryContext::spawn();
    assert!(delivery.post(|| panic!("job exploded")));
    let (tx, rx) = oneshot::channel();
    assert!(delivery.post(move || {
        let _ = tx.send("still running");
    }));
    assert_eq!(rx.await.unwrap(), "still running");
}

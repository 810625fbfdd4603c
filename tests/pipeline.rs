//! Integration tests for the illustration pipeline.
//!
//! Both external services are replaced by in-process fakes, so these tests
//! need no network and no API key. Fakes sleep for randomised, seeded
//! durations to shake out ordering assumptions in the concurrent paths.
//!
//! Run with:
//!   cargo test --test pipeline -- --nocapture

use async_trait::async_trait;
use edgequake_doc2img::document::{markdown, ImageRef, Node};
use edgequake_doc2img::pipeline::input::OutputLayout;
use edgequake_doc2img::pipeline::mutate::{format_record, DocumentMutator, PromptLog};
use edgequake_doc2img::{
    generate_with_synthesizers, prepare_chunks, CharacterSheet, ChunkError, ConfigError,
    Doc2ImgError, GenerationConfig, GenerationProgressCallback, ImageSettings, ImageSynthesizer,
    OutputDocument, PipelineOrchestrator, PromptSynthesizer, Resolution, ServiceError, TaskState,
    WordTokenizer,
};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Test helpers ─────────────────────────────────────────────────────────────

const PREFIX: &str = "(masterpiece, best quality)";

fn png(w: u32, h: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([20, 40, 60, 255])));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .expect("encode png");
    buf
}

fn config() -> edgequake_doc2img::GenerationConfigBuilder {
    GenerationConfig::builder()
        .quality_prefix(PREFIX)
        .retry_delay_ms(1)
        .tokenizer(Arc::new(WordTokenizer))
        .image(ImageSettings::new("http://unused.invalid", "test-model"))
}

/// `n` paragraphs of exactly five word tokens each: "Paragraph <i> of the story".
fn story(n: usize) -> String {
    (0..n)
        .map(|i| format!("Paragraph {i} of the story"))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn write_story(dir: &Path, text: &str) -> PathBuf {
    let path = dir.join("story.md");
    std::fs::write(&path, text).expect("write source");
    path
}

/// Random sleep drawn from a shared seeded RNG.
struct Jitter(Mutex<StdRng>, u64);

impl Jitter {
    fn new(seed: u64, max_ms: u64) -> Self {
        Self(Mutex::new(StdRng::seed_from_u64(seed)), max_ms)
    }

    async fn sleep(&self) {
        let ms = self.0.lock().unwrap().random_range(0..=self.1);
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

/// Echoes the chunk text; fails the first `fail_first` calls.
struct EchoPrompts {
    calls: AtomicU32,
    fail_first: u32,
    jitter: Option<Jitter>,
}

impl EchoPrompts {
    fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
            fail_first: 0,
            jitter: None,
        }
    }
}

#[async_trait]
impl PromptSynthesizer for EchoPrompts {
    async fn synthesize(&self, chunk_text: &str, corpus: &str) -> Result<String, ServiceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(j) = &self.jitter {
            j.sleep().await;
        }
        if call <= self.fail_first {
            return Err(ServiceError::Timeout {
                service: "llm",
                secs: 130,
            });
        }
        Ok(format!("attempt {call}, {chunk_text}, {corpus}"))
    }
}

/// Returns a PNG; always fails for directives containing `fail_marker`.
struct FakeImages {
    calls: Mutex<HashMap<String, u32>>,
    seen: Mutex<Vec<(String, Resolution)>>,
    fail_marker: Option<&'static str>,
    panic_marker: Option<&'static str>,
    jitter: Option<Jitter>,
}

impl FakeImages {
    fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
            seen: Mutex::new(Vec::new()),
            fail_marker: None,
            panic_marker: None,
            jitter: None,
        }
    }

    fn calls_matching(&self, needle: &str) -> u32 {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(d, _)| d.contains(needle))
            .map(|(_, n)| *n)
            .sum()
    }
}

#[async_trait]
impl ImageSynthesizer for FakeImages {
    async fn synthesize(&self, directive: &str, resolution: Resolution) -> Result<Vec<u8>, ServiceError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(directive.to_string())
            .or_default() += 1;
        self.seen
            .lock()
            .unwrap()
            .push((directive.to_string(), resolution));
        if let Some(j) = &self.jitter {
            j.sleep().await;
        }
        if let Some(marker) = self.panic_marker {
            if directive.contains(marker) {
                panic!("synthesizer blew up");
            }
        }
        if let Some(marker) = self.fail_marker {
            if directive.contains(marker) {
                return Err(ServiceError::Http {
                    service: "txt2img",
                    status: 500,
                    body: "CUDA out of memory".into(),
                });
            }
        }
        Ok(png(8, 8))
    }
}

/// Records every state transition.
#[derive(Default)]
struct Recorder {
    states: Mutex<Vec<(usize, TaskState)>>,
    completed: Mutex<Vec<usize>>,
    failed: Mutex<Vec<usize>>,
    /// Every event in arrival order, terminal ones as DONE/FAILED.
    events: Mutex<Vec<(usize, TaskState)>>,
}

impl GenerationProgressCallback for Recorder {
    fn on_chunk_state(&self, chunk: usize, _total: usize, state: TaskState) {
        self.states.lock().unwrap().push((chunk, state));
        self.events.lock().unwrap().push((chunk, state));
    }

    fn on_chunk_complete(&self, chunk: usize, _total: usize, _image_path: &Path) {
        self.completed.lock().unwrap().push(chunk);
        self.events.lock().unwrap().push((chunk, TaskState::Done));
    }

    fn on_chunk_error(&self, chunk: usize, _total: usize, _error: &str) {
        self.failed.lock().unwrap().push(chunk);
        self.events.lock().unwrap().push((chunk, TaskState::Failed));
    }
}

/// Returns the first half of a PNG on the first call, a whole one after.
struct TruncatingImages {
    calls: AtomicU32,
}

#[async_trait]
impl ImageSynthesizer for TruncatingImages {
    async fn synthesize(&self, _directive: &str, _resolution: Resolution) -> Result<Vec<u8>, ServiceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let full = png(16, 16);
        if call == 1 {
            Ok(full[..full.len() / 2].to_vec())
        } else {
            Ok(full)
        }
    }
}

/// Assert every image sits directly after the paragraph of its chunk, where
/// chunk `i` is paragraph `i`.
fn assert_images_follow_anchors(doc: &OutputDocument, expected_images: usize) {
    let nodes = doc.nodes();
    let mut seen = 0;
    for (pos, node) in nodes.iter().enumerate() {
        if let Node::Image(img) = node {
            seen += 1;
            let chunk: usize = img
                .alt
                .strip_prefix("chunk ")
                .and_then(|s| s.parse().ok())
                .expect("alt is 'chunk <i>'");
            assert_eq!(img.src, format!("story_chunk_{chunk}.png"));
            match &nodes[pos - 1] {
                Node::Paragraph { index, .. } => assert_eq!(*index, chunk, "image {chunk} misplaced"),
                other => panic!("image {chunk} follows {other:?}"),
            }
        }
    }
    assert_eq!(seen, expected_images);
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn prompt_retries_until_third_attempt_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let src = write_story(dir.path(), "The rain fell on the old temple.\n");
    let prompts = Arc::new(EchoPrompts {
        fail_first: 2,
        ..EchoPrompts::new()
    });
    let images = Arc::new(FakeImages::new());
    let recorder = Arc::new(Recorder::default());
    let config = config()
        .retry_times(5)
        .characters(CharacterSheet::new().with("Lin", "red scarf"))
        .progress_callback(recorder.clone())
        .build()
        .unwrap();

    let output = generate_with_synthesizers(&src, &config, prompts.clone(), images.clone())
        .await
        .unwrap();

    assert_eq!(prompts.calls.load(Ordering::SeqCst), 3);
    let outcome = &output.outcomes[0];
    assert_eq!(outcome.state(), TaskState::Done);
    let artifact = outcome.artifact().unwrap();
    assert_eq!(
        artifact.directive,
        format!("{PREFIX}, attempt 3, The rain fell on the old temple., red scarf")
    );
    assert!(recorder
        .states
        .lock()
        .unwrap()
        .contains(&(0, TaskState::Writing)));
    assert!(artifact.image_path.exists());
    assert_eq!(output.stats.succeeded, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_image_chunk_does_not_stop_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let src = write_story(
        dir.path(),
        "Paragraph 0 of the story\n\nParagraph 1 FAIL the story\n\nParagraph 2 of the story\n",
    );
    let prompts = Arc::new(EchoPrompts::new());
    let images = Arc::new(FakeImages {
        fail_marker: Some("FAIL"),
        jitter: Some(Jitter::new(3, 10)),
        ..FakeImages::new()
    });
    let recorder = Arc::new(Recorder::default());
    let config = config()
        .token_per_chunk(5)
        .concurrency(2)
        .retry_times(2)
        .progress_callback(recorder.clone())
        .build()
        .unwrap();

    let output = generate_with_synthesizers(&src, &config, prompts, images.clone())
        .await
        .unwrap();

    assert_eq!(images.calls_matching("FAIL"), 3);
    let states: Vec<_> = output.outcomes.iter().map(|o| o.state()).collect();
    assert_eq!(states, vec![TaskState::Done, TaskState::Failed, TaskState::Done]);

    match output.outcomes[1].error() {
        Some(ChunkError::Image { chunk: 1, source }) => {
            assert_eq!(source.attempts, 3);
            assert!(matches!(source.source, ServiceError::Http { status: 500, .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    let report = output.report();
    let message = report.chunks[1].error.as_deref().unwrap();
    assert_eq!(message.matches("CUDA out of memory").count(), 1, "got: {message}");

    assert_eq!(output.stats.failed, 1);
    assert_eq!(*recorder.failed.lock().unwrap(), vec![1]);
    let doc = OutputDocument::from_markdown(&std::fs::read_to_string(&output.document_path).unwrap());
    assert_eq!(doc.image_count(), 2);
    assert!(!dir.path().join("story_chunk_1.png").exists());

    // The failed chunk leaves no record and does not block later ones.
    let log = std::fs::read_to_string(&output.prompt_log_path).unwrap();
    assert!(log.contains("===== chunk 0 directive ====="));
    assert!(!log.contains("===== chunk 1 directive ====="));
    assert!(log.contains("===== chunk 2 directive ====="));
}

#[tokio::test]
async fn undersized_resolutions_fail_before_any_task() {
    let err = config()
        .resolutions(vec![Resolution::new(256, 256)])
        .build()
        .unwrap_err();
    assert!(matches!(err, ConfigError::EmptyResolutionSet { .. }));

    // Same set smuggled past the builder through the public field.
    let dir = tempfile::tempdir().unwrap();
    let src = write_story(dir.path(), &story(2));
    let mut cfg = config().build().unwrap();
    cfg.resolutions = vec![Resolution::new(256, 256)];
    let prompts = Arc::new(EchoPrompts::new());
    let images = Arc::new(FakeImages::new());

    let err = generate_with_synthesizers(&src, &cfg, prompts.clone(), images.clone())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Doc2ImgError::Config(ConfigError::EmptyResolutionSet { .. })
    ));
    assert_eq!(prompts.calls.load(Ordering::SeqCst), 0);
    assert!(images.seen.lock().unwrap().is_empty());
    assert!(!dir.path().join("story_copy.md").exists());
}

#[tokio::test]
async fn truncated_image_is_retried() {
    let dir = tempfile::tempdir().unwrap();
    let src = write_story(dir.path(), "A lantern swings in the dark hall.\n");
    let images = Arc::new(TruncatingImages {
        calls: AtomicU32::new(0),
    });
    let config = config().retry_times(2).build().unwrap();

    let output = generate_with_synthesizers(&src, &config, Arc::new(EchoPrompts::new()), images.clone())
        .await
        .unwrap();

    assert_eq!(images.calls.load(Ordering::SeqCst), 2);
    assert_eq!(output.outcomes[0].state(), TaskState::Done);
    let saved = image::open(dir.path().join("story_chunk_0.png")).unwrap();
    assert_eq!((saved.width(), saved.height()), (16, 16));
}

#[tokio::test]
async fn truncated_image_on_every_attempt_exhausts_retries() {
    struct AlwaysTruncated;

    #[async_trait]
    impl ImageSynthesizer for AlwaysTruncated {
        async fn synthesize(&self, _d: &str, _r: Resolution) -> Result<Vec<u8>, ServiceError> {
            let full = png(16, 16);
            Ok(full[..full.len() / 2].to_vec())
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let src = write_story(dir.path(), "A lantern swings in the dark hall.\n");
    let config = config().retry_times(1).build().unwrap();

    let output = generate_with_synthesizers(&src, &config, Arc::new(EchoPrompts::new()), Arc::new(AlwaysTruncated))
        .await
        .unwrap();

    match output.outcomes[0].error() {
        Some(ChunkError::Image { source, .. }) => {
            assert_eq!(source.attempts, 2);
            assert!(matches!(source.source, ServiceError::MalformedResponse { .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!dir.path().join("story_chunk_0.png").exists());
}

#[tokio::test]
async fn unknown_anchor_fails_chunk_and_removes_its_image() {
    let dir = tempfile::tempdir().unwrap();
    let src = write_story(dir.path(), &story(3));
    let doc = OutputDocument::from_markdown(&std::fs::read_to_string(&src).unwrap());
    let config = config().token_per_chunk(5).concurrency(1).build().unwrap();
    let chunks = prepare_chunks(&doc, &config).unwrap();

    // The mutator only knows paragraph 0.
    let layout = OutputLayout::for_source(&src);
    let mutator = Arc::new(DocumentMutator::new(
        OutputDocument::from_markdown("Only one paragraph here\n"),
        layout.copy_path(),
        576,
    ));
    let log = Arc::new(PromptLog::open(layout.prompt_log_path()).await.unwrap());
    let orchestrator = PipelineOrchestrator::new(
        Arc::new(EchoPrompts::new()),
        Arc::new(FakeImages::new()),
        mutator,
        log,
        layout,
        &config,
    )
    .unwrap();

    let outcomes = orchestrator.run(chunks).await;

    assert!(outcomes[0].is_success());
    assert!(dir.path().join("story_chunk_0.png").exists());
    for i in [1, 2] {
        assert!(matches!(outcomes[i].error(), Some(ChunkError::Mutation { .. })));
        assert!(!dir.path().join(format!("story_chunk_{i}.png")).exists());
    }
}

// ── Concurrency properties ───────────────────────────────────────────────────

#[tokio::test]
async fn chunk_completion_is_reported_as_it_happens() {
    let dir = tempfile::tempdir().unwrap();
    let src = write_story(
        dir.path(),
        "Paragraph 0 of the story\n\nParagraph 1 FAIL the story\n\nParagraph 2 of the story\n",
    );
    let recorder = Arc::new(Recorder::default());
    let images = Arc::new(FakeImages {
        fail_marker: Some("FAIL"),
        ..FakeImages::new()
    });
    let config = config()
        .token_per_chunk(5)
        .concurrency(1)
        .retry_times(0)
        .progress_callback(recorder.clone())
        .build()
        .unwrap();

    generate_with_synthesizers(&src, &config, Arc::new(EchoPrompts::new()), images)
        .await
        .unwrap();

    // With one worker, every chunk's terminal event comes before the next
    // chunk starts.
    let events = recorder.events.lock().unwrap().clone();
    let mut runs: Vec<Vec<(usize, TaskState)>> = Vec::new();
    for event in events {
        match runs.last_mut() {
            Some(run) if run[0].0 == event.0 => run.push(event),
            _ => runs.push(vec![event]),
        }
    }
    let mut order: Vec<usize> = runs.iter().map(|r| r[0].0).collect();
    order.sort_unstable();
    assert_eq!(order, vec![0, 1, 2], "interleaved events: {runs:?}");
    for run in &runs {
        let states: Vec<TaskState> = run.iter().map(|e| e.1).collect();
        let expected = if run[0].0 == 1 {
            vec![TaskState::Prompting, TaskState::Imaging, TaskState::Failed]
        } else {
            vec![TaskState::Prompting, TaskState::Imaging, TaskState::Writing, TaskState::Done]
        };
        assert_eq!(states, expected);
    }
}


#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_insertions_land_after_their_anchors() {
    const K: usize = 12;
    for seed in [1u64, 7, 42] {
        let dir = tempfile::tempdir().unwrap();
        let src = write_story(dir.path(), &story(K));
        let prompts = Arc::new(EchoPrompts {
            jitter: Some(Jitter::new(seed, 15)),
            ..EchoPrompts::new()
        });
        let images = Arc::new(FakeImages {
            jitter: Some(Jitter::new(seed.wrapping_mul(31), 15)),
            ..FakeImages::new()
        });
        let config = config().token_per_chunk(5).concurrency(4).build().unwrap();

        let output = generate_with_synthesizers(&src, &config, prompts, images)
            .await
            .unwrap();

        assert_eq!(output.stats.total_chunks, K);
        assert_eq!(output.stats.succeeded, K);
        let indices: Vec<_> = output.outcomes.iter().map(|o| o.index).collect();
        assert_eq!(indices, (0..K).collect::<Vec<_>>());

        let on_disk = std::fs::read_to_string(&output.document_path).unwrap();
        let doc = OutputDocument::from_markdown(&on_disk);
        assert_images_follow_anchors(&doc, K);
        assert_eq!(markdown::render(&doc), on_disk);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn prompt_log_is_in_chunk_order() {
    const K: usize = 8;
    let dir = tempfile::tempdir().unwrap();
    let src = write_story(dir.path(), &story(K));
    let prompts = Arc::new(EchoPrompts {
        jitter: Some(Jitter::new(99, 20)),
        ..EchoPrompts::new()
    });
    let images = Arc::new(FakeImages::new());
    let config = config().token_per_chunk(5).concurrency(4).build().unwrap();

    let output = generate_with_synthesizers(&src, &config, prompts, images)
        .await
        .unwrap();

    let expected: String = output
        .outcomes
        .iter()
        .map(|o| format_record(o.index, &o.artifact().unwrap().directive))
        .collect();
    assert_eq!(std::fs::read_to_string(&output.prompt_log_path).unwrap(), expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_synthesizer_fails_only_its_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let src = write_story(
        dir.path(),
        "Paragraph 0 of the story\n\nParagraph 1 BOOM the story\n\nParagraph 2 of the story\n",
    );
    let images = Arc::new(FakeImages {
        panic_marker: Some("BOOM"),
        ..FakeImages::new()
    });
    let config = config().token_per_chunk(5).concurrency(2).build().unwrap();

    let output = generate_with_synthesizers(&src, &config, Arc::new(EchoPrompts::new()), images)
        .await
        .unwrap();

    assert!(matches!(
        output.outcomes[1].error(),
        Some(ChunkError::Aborted { chunk: 1, .. })
    ));
    assert!(output.outcomes[0].is_success());
    assert!(output.outcomes[2].is_success());
    let log = std::fs::read_to_string(&output.prompt_log_path).unwrap();
    assert!(log.contains("===== chunk 2 directive ====="));
}

#[tokio::test]
async fn seeded_rng_fixes_resolution_per_chunk() {
    async fn resolutions_for(seed: u64) -> Vec<(String, Resolution)> {
        let dir = tempfile::tempdir().unwrap();
        let src = write_story(dir.path(), &story(6));
        let doc = OutputDocument::from_markdown(&std::fs::read_to_string(&src).unwrap());
        let config = config().token_per_chunk(5).concurrency(3).build().unwrap();
        let chunks = prepare_chunks(&doc, &config).unwrap();

        let layout = OutputLayout::for_source(&src);
        let mutator = Arc::new(DocumentMutator::new(doc, layout.copy_path(), 576));
        let log = Arc::new(PromptLog::open(layout.prompt_log_path()).await.unwrap());
        let images = Arc::new(FakeImages {
            jitter: Some(Jitter::new(seed, 5)),
            ..FakeImages::new()
        });
        let orchestrator = PipelineOrchestrator::new(
            Arc::new(EchoPrompts::new()),
            images.clone(),
            mutator,
            log,
            layout,
            &config,
        )
        .unwrap()
        .with_rng(StdRng::seed_from_u64(seed));

        let outcomes = orchestrator.run(chunks).await;
        assert!(outcomes.iter().all(|o| o.is_success()));
        let seen: Vec<(String, Resolution)> = outcomes
            .iter()
            .map(|o| {
                let a = o.artifact().unwrap();
                (format!("chunk {}", o.index), a.resolution)
            })
            .collect();
        for (_, r) in &seen {
            assert!(Resolution::defaults().contains(r));
        }
        seen
    }

    assert_eq!(resolutions_for(5).await, resolutions_for(5).await);
}

// ── Input handling ───────────────────────────────────────────────────────────

#[tokio::test]
async fn source_document_is_never_modified() {
    let dir = tempfile::tempdir().unwrap();
    let text = story(3);
    let src = write_story(dir.path(), &text);
    let config = config().token_per_chunk(5).build().unwrap();

    let output = generate_with_synthesizers(
        &src,
        &config,
        Arc::new(EchoPrompts::new()),
        Arc::new(FakeImages::new()),
    )
    .await
    .unwrap();

    assert_eq!(std::fs::read_to_string(&src).unwrap(), text);
    assert_eq!(output.document_path, dir.path().join("story_copy.md"));
    assert_eq!(output.prompt_log_path, dir.path().join("story_prompts.txt"));
    for i in 0..3 {
        let img = image::open(dir.path().join(format!("story_chunk_{i}.png"))).unwrap();
        assert_eq!(img.width(), 8);
    }
}

#[tokio::test]
async fn working_copy_differs_from_source_only_by_images() {
    let dir = tempfile::tempdir().unwrap();
    let source = "Line one of it  \r\nLine two.\r\n\r\n\r\n\r\nSecond para is here\r\n  \r\n\r\nThird and final one\r\n\r\n";
    let src = write_story(dir.path(), source);
    let config = config().token_per_chunk(5).build().unwrap();

    let output = generate_with_synthesizers(
        &src,
        &config,
        Arc::new(EchoPrompts::new()),
        Arc::new(FakeImages::new()),
    )
    .await
    .unwrap();
    assert_eq!(output.stats.succeeded, 3);

    let mut copy = std::fs::read_to_string(&output.document_path).unwrap();
    for outcome in &output.outcomes {
        let markup = markdown::render_image(&ImageRef {
            src: format!("story_chunk_{}.png", outcome.index),
            alt: format!("chunk {}", outcome.index),
            width: 576,
        });
        let inserted = format!("\r\n\r\n{markup}");
        assert_eq!(copy.matches(&inserted).count(), 1, "chunk {} image missing", outcome.index);
        copy = copy.replace(&inserted, "");
    }
    assert_eq!(copy, source);
}

#[tokio::test]
async fn blank_document_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let src = write_story(dir.path(), "\n\n   \n");
    let config = config().build().unwrap();
    let err = generate_with_synthesizers(
        &src,
        &config,
        Arc::new(EchoPrompts::new()),
        Arc::new(FakeImages::new()),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Doc2ImgError::EmptyDocument { .. }));
}

#[tokio::test]
async fn table_cell_chunks_append_their_image() {
    let dir = tempfile::tempdir().unwrap();
    let src = write_story(
        dir.path(),
        "Intro line of the story\n\n| Name | Role |\n|---|---|\n| Lin | heir |\n",
    );
    // One chunk holding everything; its last block is a table cell.
    let config = config().token_per_chunk(100).build().unwrap();

    let output = generate_with_synthesizers(
        &src,
        &config,
        Arc::new(EchoPrompts::new()),
        Arc::new(FakeImages::new()),
    )
    .await
    .unwrap();

    assert_eq!(output.outcomes.len(), 1);
    assert!(output.outcomes[0].anchor.is_cell());
    let doc = OutputDocument::from_markdown(&std::fs::read_to_string(&output.document_path).unwrap());
    assert!(matches!(doc.nodes().last(), Some(Node::Image(_))));
}

#[tokio::test]
async fn oversized_paragraph_is_counted() {
    let dir = tempfile::tempdir().unwrap();
    let long = vec!["word"; 40].join(" ");
    let src = write_story(dir.path(), &format!("Short one here\n\n{long}\n\nShort two here\n"));
    let config = config().token_per_chunk(10).build().unwrap();

    let output = generate_with_synthesizers(
        &src,
        &config,
        Arc::new(EchoPrompts::new()),
        Arc::new(FakeImages::new()),
    )
    .await
    .unwrap();

    assert_eq!(output.stats.total_chunks, 3);
    assert_eq!(output.stats.oversized_chunks, 1);
    assert_eq!(output.outcomes[1].token_count, 40);
    assert_eq!(output.stats.succeeded, 3);
}

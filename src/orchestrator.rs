//! Bounded worker pool running the per-chunk pipeline.
//!
//! Every chunk becomes one spawned task: PROMPTING → IMAGING → WRITING →
//! DONE, or FAILED from any of them. At most `concurrency` tasks hold a
//! semaphore permit at a time; the rest wait in PENDING. Tasks run on the
//! multi-threaded runtime, so chunks are processed in parallel and finish in
//! any order.
//!
//! A task's failure never escapes it. Exhausted retries, persistence and
//! mutation errors, and even a panic inside a synthesizer, end up as a
//! [`ChunkError`] in that chunk's [`ChunkOutcome`]; sibling tasks carry on.
//!
//! Each task reports its own completion or failure before it gives up its
//! permit, so progress callbacks and the prompt log follow the run as it
//! happens. Only a panicked task is reported by the collector, as soon as
//! its handle resolves.
//!
//! Resolutions are drawn for all chunks, in chunk order, before any task is
//! spawned. With a seeded RNG ([`PipelineOrchestrator::with_rng`]) the
//! resolution of chunk *i* is therefore the same however the tasks are
//! scheduled.

use crate::config::{GenerationConfig, Resolution, ResolutionSet};
use crate::error::{ChunkError, ConfigError, ServiceError};
use crate::output::{ChunkArtifact, ChunkOutcome, GeneratedAsset, TaskState};
use crate::pipeline::chunk::Chunk;
use crate::pipeline::decode::{decode_image, save_png};
use crate::pipeline::image::ImageSynthesizer;
use crate::pipeline::input::OutputLayout;
use crate::pipeline::llm::PromptSynthesizer;
use crate::pipeline::mutate::{DocumentMutator, PromptLog};
use crate::pipeline::postprocess::{clean_directive, ensure_quality_prefix};
use crate::pipeline::retry::RetryPolicy;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use futures::stream::{FuturesUnordered, StreamExt};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

/// Runs chunks through prompt synthesis, image synthesis and document
/// mutation with bounded parallelism.
pub struct PipelineOrchestrator {
    worker: Worker,
    resolutions: ResolutionSet,
    concurrency: usize,
    rng: Mutex<StdRng>,
}

/// Everything one task needs; cheap to clone into each spawned task.
#[derive(Clone)]
struct Worker {
    prompts: Arc<dyn PromptSynthesizer>,
    images: Arc<dyn ImageSynthesizer>,
    mutator: Arc<DocumentMutator>,
    prompt_log: Arc<PromptLog>,
    layout: Arc<OutputLayout>,
    retry: RetryPolicy,
    character_corpus: Arc<str>,
    quality_prefix: Arc<str>,
    progress: ProgressCallback,
}

impl PipelineOrchestrator {
    /// Fails before any task exists if the configuration cannot run: no
    /// resolution at or above 512×512, or a zero concurrency.
    pub fn new(
        prompts: Arc<dyn PromptSynthesizer>,
        images: Arc<dyn ImageSynthesizer>,
        mutator: Arc<DocumentMutator>,
        prompt_log: Arc<PromptLog>,
        layout: OutputLayout,
        config: &GenerationConfig,
    ) -> Result<Self, ConfigError> {
        let resolutions = config.resolution_set()?;
        if config.concurrency == 0 {
            return Err(ConfigError::InvalidValue("concurrency must be ≥ 1".into()));
        }
        let progress = config
            .progress_callback
            .clone()
            .unwrap_or_else(|| Arc::new(NoopProgressCallback));

        Ok(Self {
            worker: Worker {
                prompts,
                images,
                mutator,
                prompt_log,
                layout: Arc::new(layout),
                retry: RetryPolicy::new(
                    config.retry_times,
                    Duration::from_millis(config.retry_delay_ms),
                ),
                character_corpus: config.characters.corpus().into(),
                quality_prefix: config.quality_prefix.as_str().into(),
                progress,
            },
            resolutions,
            concurrency: config.concurrency,
            rng: Mutex::new(StdRng::from_rng(&mut rand::rng())),
        })
    }

    /// Replace the random source used for resolution choice.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    /// Replace the progress callback taken from the configuration.
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.worker.progress = progress;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Process every chunk and return one outcome per chunk, sorted by index.
    ///
    /// Returns only once every task is DONE or FAILED.
    pub async fn run(&self, chunks: Vec<Chunk>) -> Vec<ChunkOutcome> {
        let total = chunks.len();
        let start = Instant::now();
        self.worker.progress.on_run_start(total);
        info!(
            "Dispatching {} chunks to {} workers",
            total, self.concurrency
        );

        let resolutions: Vec<Resolution> = {
            let mut rng = self.rng.lock().await;
            chunks
                .iter()
                .map(|_| self.resolutions.choose(&mut *rng))
                .collect()
        };

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut running = FuturesUnordered::new();

        for (index, (chunk, resolution)) in chunks.into_iter().zip(resolutions).enumerate() {
            let anchor = chunk.end_anchor().clone();
            let token_count = chunk.token_count();
            let worker = self.worker.clone();
            let semaphore = Arc::clone(&semaphore);
            let handle = tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        let result = Err(ChunkError::Aborted {
                            chunk: index,
                            detail: e.to_string(),
                        });
                        worker.report(index, total, &result).await;
                        return (result, 0);
                    }
                };
                let began = Instant::now();
                let result = worker.process(index, total, chunk, resolution).await;
                let duration_ms = began.elapsed().as_millis() as u64;
                worker.report(index, total, &result).await;
                (result, duration_ms)
            });
            running.push(async move { (index, anchor, token_count, handle.await) });
        }

        let mut outcomes = Vec::with_capacity(total);
        while let Some((index, anchor, token_count, joined)) = running.next().await {
            let (result, duration_ms) = match joined {
                Ok(done) => done,
                Err(e) => {
                    let result = Err(ChunkError::Aborted {
                        chunk: index,
                        detail: e.to_string(),
                    });
                    self.worker.report(index, total, &result).await;
                    (result, 0)
                }
            };
            outcomes.push(ChunkOutcome {
                index,
                anchor,
                token_count,
                duration_ms,
                result,
            });
        }
        outcomes.sort_by_key(|o| o.index);

        if let Err(e) = self.worker.prompt_log.close().await {
            warn!("{e}");
        }

        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        self.worker.progress.on_run_complete(total, succeeded);
        info!(
            "Run finished: {}/{} chunks illustrated in {:?}",
            succeeded,
            total,
            start.elapsed()
        );
        outcomes
    }
}

impl Worker {
    /// Emit the terminal event of a chunk. A failed chunk also releases its
    /// prompt-log slot so later records are not held back.
    async fn report(&self, index: usize, total: usize, result: &Result<ChunkArtifact, ChunkError>) {
        match result {
            Ok(artifact) => {
                debug!("Chunk {index}: {}", TaskState::Done);
                self.progress.on_chunk_complete(index, total, &artifact.image_path);
            }
            Err(err) => {
                let message = err.chain_message();
                warn!("{message}");
                if let Err(e) = self.prompt_log.skip(index).await {
                    warn!("{e}");
                }
                self.progress.on_chunk_error(index, total, &message);
            }
        }
    }

    fn enter(&self, index: usize, total: usize, state: TaskState) {
        debug!("Chunk {index}: {state}");
        self.progress.on_chunk_state(index, total, state);
    }

    async fn process(
        &self,
        index: usize,
        total: usize,
        chunk: Chunk,
        resolution: Resolution,
    ) -> Result<ChunkArtifact, ChunkError> {
        // ── PROMPTING ────────────────────────────────────────────────────
        self.enter(index, total, TaskState::Prompting);
        let text = chunk.text();
        let text = text.as_str();
        let corpus: &str = &self.character_corpus;
        let prefix: &str = &self.quality_prefix;
        let prompts = &self.prompts;

        let directive = self
            .retry
            .execute("prompt synthesis", move |attempt| async move {
                debug!("Chunk {index}: prompt attempt {}", attempt + 1);
                let raw = prompts.synthesize(text, corpus).await?;
                let cleaned = clean_directive(&raw);
                if cleaned.is_empty() {
                    return Err(ServiceError::EmptyResponse { service: "llm" });
                }
                Ok(ensure_quality_prefix(&cleaned, prefix))
            })
            .await
            .map_err(|source| ChunkError::Prompt {
                chunk: index,
                source,
            })?;

        // ── IMAGING ──────────────────────────────────────────────────────
        self.enter(index, total, TaskState::Imaging);
        let images = &self.images;
        let directive_ref = directive.as_str();
        let (image_bytes, image) = self
            .retry
            .execute("image synthesis", move |attempt| async move {
                debug!("Chunk {index}: image attempt {} at {resolution}", attempt + 1);
                let bytes = images.synthesize(directive_ref, resolution).await?;
                let image = decode_image(bytes.clone()).await?;
                Ok((bytes, image))
            })
            .await
            .map_err(|source| ChunkError::Image {
                chunk: index,
                source,
            })?;

        let image_path = self.layout.image_path(index);
        save_png(image, image_path.clone())
            .await
            .map_err(|e| ChunkError::PersistImage {
                chunk: index,
                path: image_path.clone(),
                detail: e.to_string(),
            })?;

        let asset = GeneratedAsset {
            directive,
            resolution,
            image_bytes,
            image_path,
        };

        // ── WRITING ──────────────────────────────────────────────────────
        self.enter(index, total, TaskState::Writing);
        if let Err(source) = self.mutator.insert(index, &asset, chunk.end_anchor()).await {
            // A FAILED chunk leaves no image file behind.
            if let Err(e) = tokio::fs::remove_file(&asset.image_path).await {
                warn!("Chunk {index}: could not remove {}: {e}", asset.image_path.display());
            }
            return Err(ChunkError::Mutation {
                chunk: index,
                source,
            });
        }
        if let Err(e) = self.prompt_log.record(index, &asset.directive).await {
            warn!("Chunk {index}: {e}");
        }

        Ok(asset.into_artifact())
    }
}

//! Configuration types for document illustration.
//!
//! All run behaviour is controlled through [`GenerationConfig`], built via
//! its [`GenerationConfigBuilder`]. Validation happens in
//! [`GenerationConfigBuilder::build`], so an invalid setting (for example a
//! resolution list with nothing at or above 512×512) is rejected before any
//! chunk is dispatched.

use crate::error::ConfigError;
use crate::pipeline::chunk::Tokenizer;
use crate::prompts::{DEFAULT_NEGATIVE_PROMPT, DEFAULT_QUALITY_PREFIX};
use edgequake_llm::LLMProvider;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Smallest width and height the txt2img backend can render well.
pub const MIN_DIMENSION: u32 = 512;

/// Configuration for one illustration run.
///
/// # Example
/// ```rust
/// use edgequake_doc2img::{GenerationConfig, ImageSettings};
///
/// let config = GenerationConfig::builder()
///     .token_per_chunk(700)
///     .concurrency(4)
///     .retry_times(5)
///     .image(ImageSettings::new("http://127.0.0.1:7860", "v1-5-pruned.safetensors"))
///     .build()
///     .unwrap();
/// assert_eq!(config.resolutions.len(), 4);
/// ```
#[derive(Clone)]
pub struct GenerationConfig {
    /// Upper bound on tokens per chunk. Default: 1000.
    ///
    /// A single paragraph that is longer than this on its own still forms a
    /// chunk by itself; it is never split.
    pub token_per_chunk: usize,

    /// Number of chunks processed in parallel. Default: 2.
    ///
    /// Each in-flight chunk holds one LLM call or one txt2img render; a local
    /// Stable Diffusion WebUI usually renders one image at a time, so large
    /// values mostly queue work on the GPU side.
    pub concurrency: usize,

    /// Extra attempts granted to each external call. Default: 2.
    pub retry_times: u32,

    /// Fixed delay between attempts in milliseconds. Default: 1000.
    pub retry_delay_ms: u64,

    /// Per-call timeout for the LLM in seconds. Default: 130.
    pub llm_timeout_secs: u64,

    /// Per-call timeout for txt2img in seconds. Default: 130.
    pub image_timeout_secs: u64,

    /// LLM model identifier. If None, `gpt-3.5-turbo` is used with a named
    /// provider.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for prompt synthesis. Default: 0.7.
    pub temperature: f32,

    /// Maximum tokens the LLM may generate per directive. Default: 1000.
    pub max_tokens: usize,

    /// Custom system prompt. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Keywords every directive must start with.
    pub quality_prefix: String,

    /// Appearance descriptors passed in full to every prompt.
    pub characters: CharacterSheet,

    /// Candidate output sizes; one is picked at random per chunk.
    pub resolutions: Vec<Resolution>,

    /// Display width of inserted images in pixels. Default: 576 (6 in).
    pub display_width_px: u32,

    /// txt2img request settings.
    pub image: ImageSettings,

    /// Token counter for chunking. If None, the BPE default is used.
    pub tokenizer: Option<Arc<dyn Tokenizer>>,

    /// Progress callback invoked as chunks move through the pipeline.
    pub progress_callback: Option<crate::progress::ProgressCallback>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            token_per_chunk: 1000,
            concurrency: 2,
            retry_times: 2,
            retry_delay_ms: 1000,
            llm_timeout_secs: 130,
            image_timeout_secs: 130,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.7,
            max_tokens: 1000,
            system_prompt: None,
            quality_prefix: DEFAULT_QUALITY_PREFIX.to_string(),
            characters: CharacterSheet::default(),
            resolutions: Resolution::defaults(),
            display_width_px: 576,
            image: ImageSettings::default(),
            tokenizer: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationConfig")
            .field("token_per_chunk", &self.token_per_chunk)
            .field("concurrency", &self.concurrency)
            .field("retry_times", &self.retry_times)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("llm_timeout_secs", &self.llm_timeout_secs)
            .field("image_timeout_secs", &self.image_timeout_secs)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("characters", &self.characters.len())
            .field("resolutions", &self.resolutions)
            .field("display_width_px", &self.display_width_px)
            .field("image", &self.image)
            .field("tokenizer", &self.tokenizer.as_ref().map(|_| "<dyn Tokenizer>"))
            .finish()
    }
}

impl GenerationConfig {
    /// Create a new builder for `GenerationConfig`.
    pub fn builder() -> GenerationConfigBuilder {
        GenerationConfigBuilder {
            config: Self::default(),
        }
    }

    /// The validated resolution candidates.
    pub fn resolution_set(&self) -> Result<ResolutionSet, ConfigError> {
        ResolutionSet::new(self.resolutions.clone())
    }
}

/// Builder for [`GenerationConfig`].
pub struct GenerationConfigBuilder {
    config: GenerationConfig,
}

impl fmt::Debug for GenerationConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl GenerationConfigBuilder {
    pub fn token_per_chunk(mut self, n: usize) -> Self {
        self.config.token_per_chunk = n;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn retry_times(mut self, n: u32) -> Self {
        self.config.retry_times = n;
        self
    }

    pub fn retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry_delay_ms = ms;
        self
    }

    pub fn llm_timeout_secs(mut self, secs: u64) -> Self {
        self.config.llm_timeout_secs = secs;
        self
    }

    pub fn image_timeout_secs(mut self, secs: u64) -> Self {
        self.config.image_timeout_secs = secs;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn quality_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.quality_prefix = prefix.into();
        self
    }

    pub fn characters(mut self, sheet: CharacterSheet) -> Self {
        self.config.characters = sheet;
        self
    }

    pub fn resolutions(mut self, candidates: Vec<Resolution>) -> Self {
        self.config.resolutions = candidates;
        self
    }

    pub fn display_width_px(mut self, px: u32) -> Self {
        self.config.display_width_px = px;
        self
    }

    pub fn image(mut self, settings: ImageSettings) -> Self {
        self.config.image = settings;
        self
    }

    pub fn tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.config.tokenizer = Some(tokenizer);
        self
    }

    pub fn progress_callback(mut self, cb: crate::progress::ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    ///
    /// Resolution candidates below 512×512 are dropped here; if nothing
    /// survives the filter the build fails with
    /// [`ConfigError::EmptyResolutionSet`].
    pub fn build(mut self) -> Result<GenerationConfig, ConfigError> {
        let set = ResolutionSet::new(std::mem::take(&mut self.config.resolutions))?;
        self.config.resolutions = set.candidates().to_vec();

        let c = &self.config;
        if c.token_per_chunk == 0 {
            return Err(ConfigError::InvalidValue(
                "token_per_chunk must be ≥ 1".into(),
            ));
        }
        if c.concurrency == 0 {
            return Err(ConfigError::InvalidValue("concurrency must be ≥ 1".into()));
        }
        if c.display_width_px == 0 {
            return Err(ConfigError::InvalidValue(
                "display width must be ≥ 1 px".into(),
            ));
        }
        if c.image.api_url.trim().is_empty() {
            return Err(ConfigError::MissingImageEndpoint);
        }
        if c.image.model_checkpoint.trim().is_empty() {
            return Err(ConfigError::MissingCheckpoint);
        }
        Ok(self.config)
    }
}

// ── Resolutions ──────────────────────────────────────────────────────────

/// Output image size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// The four square sizes used when no list is configured.
    pub fn defaults() -> Vec<Resolution> {
        vec![
            Resolution::new(512, 512),
            Resolution::new(768, 768),
            Resolution::new(896, 896),
            Resolution::new(1024, 1024),
        ]
    }

    /// Whether both sides meet [`MIN_DIMENSION`].
    pub fn is_renderable(&self) -> bool {
        self.width >= MIN_DIMENSION && self.height >= MIN_DIMENSION
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl std::str::FromStr for Resolution {
    type Err = ConfigError;

    /// Parse `"768x512"` (also accepts `X` and `*`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (w, h) = s
            .split_once(['x', 'X', '*'])
            .ok_or_else(|| ConfigError::InvalidValue(format!("resolution '{s}' is not WIDTHxHEIGHT")))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidValue(format!("resolution '{s}' is not WIDTHxHEIGHT")))
        };
        Ok(Resolution::new(parse(w)?, parse(h)?))
    }
}

/// A non-empty list of renderable resolutions.
///
/// The only way to obtain one is [`ResolutionSet::new`], so holders never
/// need to handle the empty case at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionSet {
    candidates: Vec<Resolution>,
}

impl ResolutionSet {
    /// Keep the candidates with width ≥ 512 and height ≥ 512.
    pub fn new(candidates: Vec<Resolution>) -> Result<Self, ConfigError> {
        let (kept, rejected): (Vec<_>, Vec<_>) =
            candidates.into_iter().partition(Resolution::is_renderable);
        if kept.is_empty() {
            return Err(ConfigError::EmptyResolutionSet { rejected });
        }
        Ok(Self { candidates: kept })
    }

    pub fn candidates(&self) -> &[Resolution] {
        &self.candidates
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Never true for a constructed set.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Pick one candidate uniformly at random.
    pub fn choose<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> Resolution {
        self.candidates[rng.random_range(0..self.candidates.len())]
    }
}

// ── txt2img settings ─────────────────────────────────────────────────────

/// Request settings for the Stable Diffusion WebUI txt2img endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSettings {
    /// Base URL of the WebUI, e.g. `http://127.0.0.1:7860`.
    pub api_url: String,
    /// Checkpoint override, e.g. `v1-5-pruned.safetensors`. Required.
    pub model_checkpoint: String,
    /// Optional VAE override.
    pub vae: Option<String>,
    pub negative_prompt: String,
    pub steps: u32,
    pub sampler_name: String,
    pub batch_size: u32,
    pub n_iter: u32,
    pub seed: i64,
    /// CLIP layers to skip (`CLIP_stop_at_last_layers`).
    pub clip_skip: u32,
    pub restore_faces: bool,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:7860".to_string(),
            model_checkpoint: String::new(),
            vae: None,
            negative_prompt: DEFAULT_NEGATIVE_PROMPT.to_string(),
            steps: 30,
            sampler_name: "Euler a".to_string(),
            batch_size: 1,
            n_iter: 1,
            seed: 1,
            clip_skip: 2,
            restore_faces: false,
        }
    }
}

impl ImageSettings {
    /// Default settings pointed at `api_url` with the given checkpoint.
    pub fn new(api_url: impl Into<String>, model_checkpoint: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            model_checkpoint: model_checkpoint.into(),
            ..Self::default()
        }
    }
}

// ── Characters ───────────────────────────────────────────────────────────

/// Character name → appearance keywords, in declaration order.
///
/// The whole sheet is sent with every chunk so the LLM can pick whichever
/// characters appear in the scene and keep their looks consistent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacterSheet {
    entries: IndexMap<String, String>,
}

impl CharacterSheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a character.
    pub fn insert(&mut self, name: impl Into<String>, appearance: impl Into<String>) {
        self.entries.insert(name.into(), appearance.into());
    }

    pub fn with(mut self, name: impl Into<String>, appearance: impl Into<String>) -> Self {
        self.insert(name, appearance);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All appearance descriptors joined with `", "`. Names are not included.
    pub fn corpus(&self) -> String {
        self.entries
            .values()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Parse a JSON object of `{"name": "appearance", …}`.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Read and parse a JSON character file.
    pub fn from_path(path: &Path) -> Result<Self, crate::error::Doc2ImgError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            crate::error::Doc2ImgError::CharacterSheet {
                path: path.to_path_buf(),
                detail: e.to_string(),
            }
        })?;
        Self::from_json(&raw).map_err(|e| crate::error::Doc2ImgError::CharacterSheet {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    }
}

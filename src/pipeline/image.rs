//! Image synthesis through the Stable Diffusion WebUI `txt2img` API.
//!
//! [`StableDiffusionClient`] owns a single `reqwest::Client`, so every
//! attempt of every chunk shares one connection pool. The checkpoint
//! override is sent with every request; the WebUI switches models lazily and
//! ignores the override when the requested checkpoint is already loaded.

use crate::config::{ImageSettings, Resolution};
use crate::error::ServiceError;
use crate::pipeline::decode::decode_image_payload;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const SERVICE: &str = "txt2img";
const TXT2IMG_PATH: &str = "/sdapi/v1/txt2img";

/// Converts a directive and a resolution into raw image bytes.
#[async_trait]
pub trait ImageSynthesizer: Send + Sync {
    /// One attempt. Returns the bytes of a single encoded image.
    async fn synthesize(
        &self,
        directive: &str,
        resolution: Resolution,
    ) -> Result<Vec<u8>, ServiceError>;
}

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverrideSettings {
    pub sd_model_checkpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sd_vae: Option<String>,
    #[serde(rename = "CLIP_stop_at_last_layers")]
    pub clip_stop_at_last_layers: u32,
}

/// Request body of `POST /sdapi/v1/txt2img`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Txt2ImgRequest {
    pub override_settings: OverrideSettings,
    pub prompt: String,
    pub negative_prompt: String,
    pub steps: u32,
    pub sampler_name: String,
    pub width: u32,
    pub height: u32,
    pub batch_size: u32,
    pub n_iter: u32,
    pub seed: i64,
    #[serde(rename = "CLIP_stop_at_last_layers")]
    pub clip_stop_at_last_layers: u32,
    pub restore_faces: bool,
}

impl Txt2ImgRequest {
    pub fn new(settings: &ImageSettings, directive: &str, resolution: Resolution) -> Self {
        Self {
            override_settings: OverrideSettings {
                sd_model_checkpoint: settings.model_checkpoint.clone(),
                sd_vae: settings.vae.clone(),
                clip_stop_at_last_layers: settings.clip_skip,
            },
            prompt: directive.to_string(),
            negative_prompt: settings.negative_prompt.clone(),
            steps: settings.steps,
            sampler_name: settings.sampler_name.clone(),
            width: resolution.width,
            height: resolution.height,
            batch_size: settings.batch_size,
            n_iter: settings.n_iter,
            seed: settings.seed,
            clip_stop_at_last_layers: settings.clip_skip,
            restore_faces: settings.restore_faces,
        }
    }
}

/// Response body; only `images` is used.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Txt2ImgResponse {
    #[serde(default)]
    pub images: Vec<String>,
}

// ── Client ───────────────────────────────────────────────────────────────────

/// [`ImageSynthesizer`] for an AUTOMATIC1111-compatible WebUI.
#[derive(Debug, Clone)]
pub struct StableDiffusionClient {
    http: reqwest::Client,
    endpoint: String,
    settings: ImageSettings,
    timeout: Duration,
}

impl StableDiffusionClient {
    pub fn new(settings: ImageSettings, timeout_secs: u64) -> Result<Self, ServiceError> {
        let timeout = Duration::from_secs(timeout_secs);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Connection {
                service: SERVICE,
                detail: e.to_string(),
            })?;
        Ok(Self {
            http,
            endpoint: txt2img_url(&settings.api_url),
            settings,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn map_send_error(&self, e: reqwest::Error) -> ServiceError {
        if e.is_timeout() {
            ServiceError::Timeout {
                service: SERVICE,
                secs: self.timeout.as_secs(),
            }
        } else if e.is_connect() {
            ServiceError::Connection {
                service: SERVICE,
                detail: e.to_string(),
            }
        } else if e.is_decode() {
            ServiceError::MalformedResponse {
                service: SERVICE,
                detail: e.to_string(),
            }
        } else {
            ServiceError::Upstream {
                service: SERVICE,
                detail: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl ImageSynthesizer for StableDiffusionClient {
    async fn synthesize(
        &self,
        directive: &str,
        resolution: Resolution,
    ) -> Result<Vec<u8>, ServiceError> {
        let body = Txt2ImgRequest::new(&self.settings, directive, resolution);
        debug!("POST {} ({resolution})", self.endpoint);

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Http {
                service: SERVICE,
                status: status.as_u16(),
                body: truncate(&body, 300),
            });
        }

        let reply: Txt2ImgResponse = response.json().await.map_err(|e| self.map_send_error(e))?;
        let first = reply
            .images
            .first()
            .ok_or(ServiceError::EmptyResponse { service: SERVICE })?;
        decode_image_payload(first)
    }
}

fn txt2img_url(api_url: &str) -> String {
    format!("{}{}", api_url.trim_end_matches('/'), TXT2IMG_PATH)
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

//! Media collaborator used by render strategies

use crate::error::{Result, WorkerError};
use async_trait::async_trait;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;
use url::Url;
use uuid::Uuid;

/// Default length of a synthesized short
pub const DEFAULT_SHORT_SECONDS: u32 = 30;

/// Input of an `ai_short` render
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortSpec {
    pub prompt: String,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<u32>,
}

/// Input of a `render_clip` render
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipSpec {
    pub source_url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub start_seconds: Option<f64>,
    #[serde(default)]
    pub end_seconds: Option<f64>,
    #[serde(default)]
    pub duration_seconds: Option<u32>,
}

/// Input of a `long_form` render
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LongFormSpec {
    pub source_url: String,
}

/// A finished video artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedVideo {
    pub video_url: String,
    pub duration_seconds: f64,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

/// A highlight segment found in a long-form source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub score: u8,
    pub label: String,
}

/// Download/transcode/compose capabilities, one per render kind
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    async fn synthesize_short(&self, spec: &ShortSpec) -> Result<RenderedVideo>;

    async fn extract_highlights(&self, source_url: &Url) -> Result<Vec<Highlight>>;

    async fn render_clip(&self, spec: &ClipSpec) -> Result<RenderedVideo>;
}

/// Stand-in toolkit that returns artifact metadata without touching any media
#[derive(Debug, Clone)]
pub struct SimulatedMedia {
    pub cdn_base: String,
    pub latency: Duration,
}

impl Default for SimulatedMedia {
    fn default() -> Self {
        Self {
            cdn_base: "https://cdn.clips.local".to_string(),
            latency: Duration::from_millis(250),
        }
    }
}

impl SimulatedMedia {
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    async fn work(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn artifact_url(&self, folder: &str, key: &str) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!(
            "{}/{}/{}-{}.mp4",
            self.cdn_base.trim_end_matches('/'),
            folder,
            key,
            &suffix[..8]
        )
    }
}

#[async_trait]
impl MediaToolkit for SimulatedMedia {
    async fn synthesize_short(&self, spec: &ShortSpec) -> Result<RenderedVideo> {
        if spec.prompt.trim().is_empty() {
            return Err(WorkerError::MediaError("short prompt is empty".to_string()));
        }
        self.work().await;

        let key = slugify(&spec.prompt);
        debug!("Synthesized short '{}'", key);
        Ok(RenderedVideo {
            video_url: self.artifact_url("shorts", &key),
            duration_seconds: f64::from(spec.duration_seconds.unwrap_or(DEFAULT_SHORT_SECONDS)),
            thumbnail_url: None,
        })
    }

    async fn extract_highlights(&self, source_url: &Url) -> Result<Vec<Highlight>> {
        self.work().await;

        let key = source_key(source_url);
        let highlights = {
            let mut rng = rand::thread_rng();
            let mut cursor = 0.0;
            (1..=3)
                .map(|n| {
                    let start = cursor + f64::from(rng.gen_range(30..=240u32));
                    let end = start + f64::from(rng.gen_range(20..=60u32));
                    cursor = end;
                    Highlight {
                        start_seconds: start,
                        end_seconds: end,
                        score: rng.gen_range(60..=100),
                        label: format!("{} highlight {}", key, n),
                    }
                })
                .collect::<Vec<_>>()
        };

        debug!("Extracted {} highlights from {}", highlights.len(), source_url);
        Ok(highlights)
    }

    async fn render_clip(&self, spec: &ClipSpec) -> Result<RenderedVideo> {
        let source = Url::parse(&spec.source_url)?;
        let duration = match (spec.start_seconds, spec.end_seconds) {
            (Some(start), Some(end)) if end > start => end - start,
            (Some(start), Some(end)) => {
                return Err(WorkerError::MediaError(format!(
                    "clip window is empty: {}..{}",
                    start, end
                )))
            }
            _ => f64::from(spec.duration_seconds.unwrap_or(DEFAULT_SHORT_SECONDS)),
        };
        self.work().await;

        let key = source_key(&source);
        Ok(RenderedVideo {
            video_url: self.artifact_url("clips", &key),
            duration_seconds: duration,
            thumbnail_url: Some(format!("{}/thumbs/{}.jpg", self.cdn_base.trim_end_matches('/'), key)),
        })
    }
}

/// Stable short name for a source video: the platform video id when one can
/// be recognized, otherwise the last path segment.
pub fn source_key(url: &Url) -> String {
    static VIDEO_ID: OnceLock<Regex> = OnceLock::new();
    let re = VIDEO_ID.get_or_init(|| {
        Regex::new(r"(?:[?&]v=|youtu\.be/|/video/|/reel/|clips\.twitch\.tv/)([A-Za-z0-9_-]{3,})")
            .expect("video id pattern is valid")
    });

    if let Some(id) = re.captures(url.as_str()).and_then(|c| c.get(1)) {
        return id.as_str().to_string();
    }

    url.path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .map(slugify)
        .unwrap_or_else(|| "source".to_string())
}

fn slugify(s: &str) -> String {
    let slug: String = s
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let slug = slug
        .split('-')
        .filter(|part| !part.is_empty())
        .take(6)
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

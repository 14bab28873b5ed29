//! Render strategies and the kind -> strategy registry

use crate::db::JobType;
use crate::error::{Result, WorkerError};
use crate::media::{ClipSpec, LongFormSpec, MediaToolkit, ShortSpec};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

/// One way of turning a task input into an output payload
#[async_trait]
pub trait RenderStrategy: Send + Sync {
    async fn run(&self, input: &serde_json::Value) -> Result<serde_json::Value>;
}

fn parse_input<T: DeserializeOwned>(kind: JobType, input: &serde_json::Value) -> Result<T> {
    serde_json::from_value(input.clone())
        .map_err(|e| WorkerError::InvalidInput(format!("{} input: {}", kind, e)))
}

/// `ai_short`: synthesize a short from a prompt
pub struct AiShortStrategy {
    media: Arc<dyn MediaToolkit>,
}

impl AiShortStrategy {
    pub fn new(media: Arc<dyn MediaToolkit>) -> Self {
        Self { media }
    }
}

#[async_trait]
impl RenderStrategy for AiShortStrategy {
    async fn run(&self, input: &serde_json::Value) -> Result<serde_json::Value> {
        let spec: ShortSpec = parse_input(JobType::AiShort, input)?;
        let video = self.media.synthesize_short(&spec).await?;
        Ok(serde_json::to_value(video)?)
    }
}

/// `long_form`: find highlight segments in a long source video
pub struct LongFormStrategy {
    media: Arc<dyn MediaToolkit>,
}

impl LongFormStrategy {
    pub fn new(media: Arc<dyn MediaToolkit>) -> Self {
        Self { media }
    }
}

#[async_trait]
impl RenderStrategy for LongFormStrategy {
    async fn run(&self, input: &serde_json::Value) -> Result<serde_json::Value> {
        let spec: LongFormSpec = parse_input(JobType::LongForm, input)?;
        let source = Url::parse(&spec.source_url)?;
        let highlights = self.media.extract_highlights(&source).await?;
        Ok(json!({
            "source_url": spec.source_url,
            "highlights": highlights,
        }))
    }
}

/// `render_clip`: cut and render one clip from its source
pub struct RenderClipStrategy {
    media: Arc<dyn MediaToolkit>,
}

impl RenderClipStrategy {
    pub fn new(media: Arc<dyn MediaToolkit>) -> Self {
        Self { media }
    }
}

#[async_trait]
impl RenderStrategy for RenderClipStrategy {
    async fn run(&self, input: &serde_json::Value) -> Result<serde_json::Value> {
        let spec: ClipSpec = parse_input(JobType::RenderClip, input)?;
        let video = self.media.render_clip(&spec).await?;
        Ok(serde_json::to_value(video)?)
    }
}

/// Maps every render kind to its strategy
///
/// Built once at startup; a missing or misplaced kind is a configuration
/// error there rather than a surprise at dispatch time.
pub struct StrategyRegistry {
    strategies: HashMap<JobType, Arc<dyn RenderStrategy>>,
}

impl StrategyRegistry {
    pub fn builder() -> StrategyRegistryBuilder {
        StrategyRegistryBuilder::default()
    }

    /// Registry with the three built-in strategies over one toolkit
    pub fn with_media(media: Arc<dyn MediaToolkit>) -> Result<Self> {
        Self::builder()
            .register(JobType::AiShort, Arc::new(AiShortStrategy::new(media.clone())))
            .register(JobType::LongForm, Arc::new(LongFormStrategy::new(media.clone())))
            .register(JobType::RenderClip, Arc::new(RenderClipStrategy::new(media)))
            .build()
    }

    /// Look up the strategy for a raw `job_type` discriminator
    pub fn get(&self, job_type: &str) -> Result<Arc<dyn RenderStrategy>> {
        let kind: JobType = job_type.parse()?;
        self.strategies
            .get(&kind)
            .cloned()
            .ok_or_else(|| WorkerError::UnknownJobType(job_type.to_string()))
    }

    pub fn kinds(&self) -> Vec<JobType> {
        let mut kinds: Vec<JobType> = self.strategies.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }
}

/// Builder for StrategyRegistry
#[derive(Default)]
pub struct StrategyRegistryBuilder {
    strategies: HashMap<JobType, Arc<dyn RenderStrategy>>,
    duplicates: Vec<JobType>,
}

impl StrategyRegistryBuilder {
    pub fn register(mut self, kind: JobType, strategy: Arc<dyn RenderStrategy>) -> Self {
        if self.strategies.insert(kind, strategy).is_some() {
            self.duplicates.push(kind);
        }
        self
    }

    pub fn build(self) -> Result<StrategyRegistry> {
        if let Some(kind) = self.duplicates.first() {
            return Err(WorkerError::ConfigError(format!(
                "render strategy for '{}' registered twice",
                kind
            )));
        }
        if let Some(kind) = self.strategies.keys().find(|k| !k.is_render()) {
            return Err(WorkerError::ConfigError(format!(
                "'{}' is not a render kind",
                kind
            )));
        }
        if let Some(missing) = JobType::RENDER_KINDS
            .iter()
            .find(|k| !self.strategies.contains_key(*k))
        {
            return Err(WorkerError::ConfigError(format!(
                "no render strategy registered for '{}'",
                missing
            )));
        }

        Ok(StrategyRegistry {
            strategies: self.strategies,
        })
    }
}

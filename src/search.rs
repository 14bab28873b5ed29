//! Clip discovery collaborator
//!
//! Discovery workers hand a platform/query/category triple to a [`ClipSearch`]
//! and fan out one render job per returned [`CandidateClip`].

use crate::error::{Result, WorkerError};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Upper bound of the viral score scale
pub const MAX_VIRAL_SCORE: u8 = 100;

/// Supported source platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Youtube,
    Tiktok,
    Twitch,
    Instagram,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::Youtube,
        Platform::Tiktok,
        Platform::Twitch,
        Platform::Instagram,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Youtube => "youtube",
            Platform::Tiktok => "tiktok",
            Platform::Twitch => "twitch",
            Platform::Instagram => "instagram",
        }
    }

    /// Public URL of a video id on this platform
    pub fn video_url(&self, video_id: &str) -> String {
        match self {
            Platform::Youtube => format!("https://www.youtube.com/watch?v={}", video_id),
            Platform::Tiktok => format!("https://www.tiktok.com/@creator/video/{}", video_id),
            Platform::Twitch => format!("https://clips.twitch.tv/{}", video_id),
            Platform::Instagram => format!("https://www.instagram.com/reel/{}", video_id),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input payload of a discovery job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryRequest {
    #[serde(default)]
    pub platform: Option<Platform>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

impl DiscoveryRequest {
    pub fn from_input(input: &serde_json::Value) -> Result<Self> {
        // Jobs created without any input are a plain "trending" search
        if input.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(input.clone())
            .map_err(|e| WorkerError::InvalidInput(format!("discovery input: {}", e)))
    }
}

/// A clip worth rendering, as returned by discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateClip {
    pub title: String,
    pub source_url: String,
    pub platform: Platform,
    pub viral_score: u8,
    #[serde(default)]
    pub duration_seconds: Option<u32>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

impl CandidateClip {
    /// Reject candidates that would produce an unrenderable job
    pub fn validate(&self) -> Result<()> {
        if self.viral_score > MAX_VIRAL_SCORE {
            return Err(WorkerError::InvalidInput(format!(
                "viral_score {} out of range 0..={}",
                self.viral_score, MAX_VIRAL_SCORE
            )));
        }
        if self.title.trim().is_empty() {
            return Err(WorkerError::InvalidInput("candidate title is empty".to_string()));
        }
        Url::parse(&self.source_url)?;
        Ok(())
    }
}

/// Content discovery capability
#[async_trait]
pub trait ClipSearch: Send + Sync {
    async fn search(
        &self,
        platform: Option<Platform>,
        query: Option<&str>,
        category: Option<&str>,
    ) -> Result<Vec<CandidateClip>>;
}

/// Stand-in search that fabricates plausible trending clips
#[derive(Debug, Clone)]
pub struct SimulatedSearch {
    pub min_results: usize,
    pub max_results: usize,
    pub min_score: u8,
}

impl Default for SimulatedSearch {
    fn default() -> Self {
        Self {
            min_results: 3,
            max_results: 5,
            min_score: 70,
        }
    }
}

impl SimulatedSearch {
    fn generate(
        &self,
        platform: Option<Platform>,
        query: Option<&str>,
        category: Option<&str>,
    ) -> Vec<CandidateClip> {
        let mut rng = rand::thread_rng();
        let count = rng.gen_range(self.min_results..=self.max_results.max(self.min_results));
        let topic = query.or(category).unwrap_or("trending");

        (1..=count)
            .map(|n| {
                let platform = platform
                    .or_else(|| Platform::ALL.choose(&mut rng).copied())
                    .unwrap_or(Platform::Youtube);
                let video_id: String = (0..11)
                    .map(|_| rng.sample(rand::distributions::Alphanumeric) as char)
                    .collect();

                CandidateClip {
                    title: format!("{} moment #{}", capitalize(topic), n),
                    source_url: platform.video_url(&video_id),
                    platform,
                    viral_score: rng.gen_range(self.min_score.min(MAX_VIRAL_SCORE)..=MAX_VIRAL_SCORE),
                    duration_seconds: Some(rng.gen_range(15..=90)),
                    thumbnail_url: Some(format!("https://img.clips.local/{}.jpg", video_id)),
                }
            })
            .collect()
    }
}

#[async_trait]
impl ClipSearch for SimulatedSearch {
    async fn search(
        &self,
        platform: Option<Platform>,
        query: Option<&str>,
        category: Option<&str>,
    ) -> Result<Vec<CandidateClip>> {
        Ok(self.generate(platform, query, category))
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::Modality;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub affect: AffectConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Token window per chunk.
    #[serde(default = "default_window_tokens")]
    pub window_tokens: usize,
    /// Fraction of the window shared by consecutive chunks.
    #[serde(default = "default_overlap_fraction")]
    pub overlap_fraction: f64,
}

fn default_window_tokens() -> usize {
    512
}
fn default_overlap_fraction() -> f64 {
    0.2
}

impl ChunkingConfig {
    pub fn overlap_tokens(&self) -> usize {
        (self.window_tokens as f64 * self.overlap_fraction) as usize
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_url")]
    pub url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: default_embedding_url(),
            model: default_embedding_model(),
            dims: default_dims(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_embedding_model() -> String {
    "all-minilm-l6-v2".to_string()
}
fn default_dims() -> usize {
    384
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_url")]
    pub url: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    /// Artifact form produced for each segment: `slides`, `audio_script`,
    /// or `video`.
    #[serde(default)]
    pub modality: Modality,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            url: default_generation_url(),
            model: default_generation_model(),
            max_retries: default_max_retries(),
            timeout_secs: default_generation_timeout_secs(),
            modality: Modality::default(),
        }
    }
}

fn default_generation_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_generation_model() -> String {
    "llama3.2".to_string()
}
fn default_generation_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Token budget for the concatenated grounding context.
    #[serde(default = "default_context_tokens")]
    pub context_tokens: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            context_tokens: default_context_tokens(),
        }
    }
}

fn default_top_k() -> usize {
    12
}
fn default_context_tokens() -> usize {
    4000
}

#[derive(Debug, Deserialize, Clone)]
pub struct AffectConfig {
    /// Consecutive agreeing raw samples required before the reported
    /// affect changes.
    #[serde(default = "default_debounce_samples")]
    pub debounce_samples: usize,
    /// Alternative dwell criterion: sustained agreement for this long also
    /// accepts the change.
    #[serde(default = "default_dwell_ms")]
    pub dwell_ms: u64,
    /// After this long without any sample, `latest()` reports neutral with
    /// the stale flag set.
    #[serde(default = "default_staleness_timeout_ms")]
    pub staleness_timeout_ms: u64,
    /// Optional affect feed file polled by the sensor adapter.
    #[serde(default)]
    pub feed_path: Option<PathBuf>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for AffectConfig {
    fn default() -> Self {
        Self {
            debounce_samples: default_debounce_samples(),
            dwell_ms: default_dwell_ms(),
            staleness_timeout_ms: default_staleness_timeout_ms(),
            feed_path: None,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_debounce_samples() -> usize {
    3
}
fn default_dwell_ms() -> u64 {
    2000
}
fn default_staleness_timeout_ms() -> u64 {
    5000
}
fn default_poll_interval_ms() -> u64 {
    1000
}

impl AffectConfig {
    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }
    pub fn staleness_timeout(&self) -> Duration {
        Duration::from_millis(self.staleness_timeout_ms)
    }
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Upper bound on waiting for an in-flight regeneration at a segment
    /// boundary before falling back to the last ready version.
    #[serde(default = "default_regeneration_timeout_secs")]
    pub regeneration_timeout_secs: u64,
    /// Presentation length of one segment.
    #[serde(default = "default_segment_seconds")]
    pub segment_seconds: u64,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            regeneration_timeout_secs: default_regeneration_timeout_secs(),
            segment_seconds: default_segment_seconds(),
            output_dir: default_output_dir(),
        }
    }
}

fn default_regeneration_timeout_secs() -> u64 {
    60
}
fn default_segment_seconds() -> u64 {
    30
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

impl SessionConfig {
    pub fn regeneration_timeout(&self) -> Duration {
        Duration::from_secs(self.regeneration_timeout_secs)
    }
    pub fn segment_length(&self) -> Duration {
        Duration::from_secs(self.segment_seconds)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_max_documents")]
    pub max_documents: usize,
    /// Articles pulled from the web scrape fallback when a topic has no
    /// local material. Zero disables scraping in favor of the topic seed.
    #[serde(default = "default_scrape_articles")]
    pub scrape_articles: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            input_dir: default_input_dir(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            max_documents: default_max_documents(),
            scrape_articles: default_scrape_articles(),
        }
    }
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("input")
}
fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.md".to_string(),
        "**/*.txt".to_string(),
        "**/*.pdf".to_string(),
    ]
}
fn default_max_documents() -> usize {
    16
}
fn default_scrape_articles() -> usize {
    3
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Startup validation. Invalid combinations are rejected before any work
/// begins rather than surfacing mid-session.
pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.window_tokens == 0 {
        anyhow::bail!("chunking.window_tokens must be > 0");
    }
    if !(0.0..=1.0).contains(&config.chunking.overlap_fraction) {
        anyhow::bail!("chunking.overlap_fraction must be in [0.0, 1.0]");
    }
    if config.chunking.overlap_tokens() >= config.chunking.window_tokens {
        anyhow::bail!(
            "chunk overlap ({} tokens) must be smaller than the window ({} tokens)",
            config.chunking.overlap_tokens(),
            config.chunking.window_tokens
        );
    }
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.affect.debounce_samples == 0 {
        anyhow::bail!("affect.debounce_samples must be >= 1");
    }
    if config.session.regeneration_timeout_secs == 0 {
        anyhow::bail!("session.regeneration_timeout_secs must be > 0");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> Config {
        toml::from_str(
            r#"
            [db]
            path = "data/tutor.sqlite"
            [chunking]
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = minimal_config();
        assert!(validate(&config).is_ok());
        assert_eq!(config.chunking.window_tokens, 512);
        assert_eq!(config.chunking.overlap_tokens(), 102);
        assert_eq!(config.retrieval.top_k, 12);
        assert_eq!(config.affect.debounce_samples, 3);
    }

    #[test]
    fn test_rejects_overlap_not_smaller_than_window() {
        let mut config = minimal_config();
        config.chunking.overlap_fraction = 1.0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_zero_dims() {
        let mut config = minimal_config();
        config.embedding.dims = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_parses_generation_modality() {
        let config: Config = toml::from_str(
            r#"
            [db]
            path = "data/tutor.sqlite"
            [chunking]
            [generation]
            modality = "audio_script"
            "#,
        )
        .unwrap();
        assert_eq!(config.generation.modality, Modality::AudioScript);

        let config = minimal_config();
        assert_eq!(config.generation.modality, Modality::Slides);
        assert_eq!(config.ingest.scrape_articles, 3);
    }

    #[test]
    fn test_rejects_zero_debounce() {
        let mut config = minimal_config();
        config.affect.debounce_samples = 0;
        assert!(validate(&config).is_err());
    }
}

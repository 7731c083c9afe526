//! TOML configuration.
//!
//! Every section is optional; missing keys take the defaults below, and
//! [`Config::minimal`] is the all-defaults configuration used when no file
//! is present.
//!
//! ```toml
//! [chunking]
//! max_tokens = 1000
//! overlap_tokens = 200
//!
//! [retrieval]
//! k = 5
//! preliminary_k = 10
//! min_chars = 20
//!
//! [context]
//! max_tokens = 2000
//! preliminary_max_tokens = 3000
//!
//! [context.scoring]
//! ideal_chars = [100, 500]
//! keywords = ["important", "total"]
//!
//! [discussion]
//! history_window = 5
//! max_message_chars = 1200
//!
//! [embedding]
//! provider = "openai"          # disabled | keyword | openai | ollama | local
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [generation]
//! provider = "openai"          # openai | ollama
//! model = "gpt-4o-mini"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

use roundtable_core::discussion::DiscussionSettings;
use roundtable_core::retrieve::RetrievalParams;
use roundtable_core::score::ScoreWeights;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub discussion: DiscussionConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_chunk_tokens(),
            overlap_tokens: default_overlap(),
        }
    }
}

fn default_chunk_tokens() -> usize {
    1000
}
fn default_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_preliminary_k")]
    pub preliminary_k: usize,
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            preliminary_k: default_preliminary_k(),
            min_chars: default_min_chars(),
        }
    }
}

fn default_k() -> usize {
    5
}
fn default_preliminary_k() -> usize {
    10
}
fn default_min_chars() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    #[serde(default = "default_context_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_preliminary_tokens")]
    pub preliminary_max_tokens: usize,
    #[serde(default)]
    pub scoring: ScoreWeights,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_context_tokens(),
            preliminary_max_tokens: default_preliminary_tokens(),
            scoring: ScoreWeights::default(),
        }
    }
}

fn default_context_tokens() -> usize {
    2000
}
fn default_preliminary_tokens() -> usize {
    3000
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscussionConfig {
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
    #[serde(default = "default_true")]
    pub preliminary: bool,
    #[serde(default = "default_true")]
    pub facilitation_note: bool,
}

impl Default for DiscussionConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            max_message_chars: default_max_message_chars(),
            preliminary: true,
            facilitation_note: true,
        }
    }
}

fn default_history_window() -> usize {
    5
}
fn default_max_message_chars() -> usize {
    1200
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama, or an OpenAI-compatible endpoint).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_embedding_retries(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

fn default_embedding_provider() -> String {
    "keyword".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_retries() -> u32 {
    5
}
fn default_embedding_timeout() -> u64 {
    30
}

impl EmbeddingConfig {
    /// Whether the provider computes embedding vectors.
    pub fn uses_embeddings(&self) -> bool {
        !matches!(self.provider.as_str(), "disabled" | "keyword")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: default_generation_model(),
            url: None,
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            timeout_secs: default_generation_timeout(),
            max_retries: default_generation_retries(),
        }
    }
}

fn default_generation_provider() -> String {
    "openai".to_string()
}
fn default_generation_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_output_tokens() -> u32 {
    1024
}
fn default_generation_timeout() -> u64 {
    60
}
fn default_generation_retries() -> u32 {
    2
}

impl Config {
    /// All defaults; used when no config file exists.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Orchestrator settings derived from this configuration.
    pub fn discussion_settings(&self) -> DiscussionSettings {
        DiscussionSettings {
            k: self.retrieval.k,
            preliminary_k: self.retrieval.preliminary_k,
            context_max_tokens: self.context.max_tokens,
            preliminary_max_tokens: self.context.preliminary_max_tokens,
            history_window: self.discussion.history_window,
            max_message_chars: self.discussion.max_message_chars,
            preliminary: self.discussion.preliminary,
            facilitation_note: self.discussion.facilitation_note,
            retrieval: RetrievalParams {
                min_chars: self.retrieval.min_chars,
                ..RetrievalParams::default()
            },
            weights: self.context.scoring.clone(),
        }
    }
}

/// Read, parse and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Load `path` if it exists, otherwise fall back to [`Config::minimal`].
pub fn load_or_minimal(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        Ok(Config::minimal())
    }
}

/// Parse and validate config text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        bail!("chunking.overlap_tokens must be < chunking.max_tokens");
    }

    // Validate retrieval and context
    if config.retrieval.k == 0 || config.retrieval.preliminary_k == 0 {
        bail!("retrieval.k and retrieval.preliminary_k must be >= 1");
    }
    if config.context.max_tokens == 0 || config.context.preliminary_max_tokens == 0 {
        bail!("context.max_tokens and context.preliminary_max_tokens must be > 0");
    }
    let scoring = &config.context.scoring;
    if scoring.ideal_chars.0 > scoring.ideal_chars.1
        || scoring.acceptable_chars.0 > scoring.acceptable_chars.1
    {
        bail!("context.scoring character ranges must be [min, max] with min <= max");
    }

    // Validate discussion
    if config.discussion.max_message_chars == 0 {
        bail!("discussion.max_message_chars must be > 0");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "keyword" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, keyword, openai, ollama, or local.",
            other
        ),
    }
    if matches!(config.embedding.provider.as_str(), "openai" | "ollama") {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    // Validate generation
    match config.generation.provider.as_str() {
        "openai" | "ollama" => {}
        other => bail!(
            "Unknown generation provider: '{}'. Must be openai or ollama.",
            other
        ),
    }
    if !(0.0..=2.0).contains(&config.generation.temperature) {
        bail!("generation.temperature must be in [0.0, 2.0]");
    }
    if config.generation.timeout_secs == 0 {
        bail!("generation.timeout_secs must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.chunking.max_tokens, 1000);
        assert_eq!(config.chunking.overlap_tokens, 200);
        assert_eq!(config.retrieval.k, 5);
        assert_eq!(config.context.max_tokens, 2000);
        assert_eq!(config.discussion.history_window, 5);
        assert_eq!(config.embedding.provider, "keyword");
        assert_eq!(config.generation.max_retries, 2);
        assert!((config.generation.temperature - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn test_scoring_section() {
        let config = parse_config(
            r#"
            [context.scoring]
            ideal_chars = [80, 400]
            keywords = ["risk"]
            "#,
        )
        .unwrap();
        assert_eq!(config.context.scoring.ideal_chars, (80, 400));
        assert_eq!(config.context.scoring.keywords, vec!["risk"]);
        // untouched weights keep defaults
        assert_eq!(config.context.scoring.digit_bonus, 2);
    }

    #[test]
    fn test_settings_mapping() {
        let config = parse_config(
            r#"
            [retrieval]
            k = 7
            min_chars = 30
            [discussion]
            preliminary = false
            "#,
        )
        .unwrap();
        let settings = config.discussion_settings();
        assert_eq!(settings.k, 7);
        assert_eq!(settings.retrieval.min_chars, 30);
        assert!(!settings.preliminary);
        assert!(settings.facilitation_note);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(parse_config("[chunking]\nmax_tokens = 0").is_err());
        assert!(parse_config("[chunking]\nmax_tokens = 100\noverlap_tokens = 100").is_err());
        assert!(parse_config("[embedding]\nprovider = \"cohere\"").is_err());
        assert!(parse_config("[embedding]\nprovider = \"openai\"\nmodel = \"m\"").is_err());
        assert!(parse_config("[generation]\nprovider = \"gemini\"").is_err());
        assert!(parse_config("[generation]\ntemperature = 3.5").is_err());
        assert!(parse_config("[context.scoring]\nideal_chars = [500, 100]").is_err());
    }

    #[test]
    fn test_uses_embeddings_by_provider() {
        let provider = |name: &str| EmbeddingConfig {
            provider: name.to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(!provider("keyword").uses_embeddings());
        assert!(!provider("disabled").uses_embeddings());
        assert!(provider("openai").uses_embeddings());
        assert!(provider("local").uses_embeddings());
    }

    #[test]
    fn test_load_or_minimal_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_or_minimal(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.retrieval.preliminary_k, 10);
    }

    #[test]
    fn test_load_config_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rtable.toml");
        std::fs::write(&path, "[retrieval]\nk = 3\n").unwrap();
        assert_eq!(load_config(&path).unwrap().retrieval.k, 3);
        assert!(load_config(&dir.path().join("nope.toml")).is_err());
    }
}

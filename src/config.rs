use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub connectors: ConnectorsConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Chunking settings: a default profile plus optional per-format overrides
/// keyed by document type (`markdown`, `pdf`, `html`, `plain`).
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    pub target_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
    #[serde(default)]
    pub min_tokens: usize,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverride>,
}

/// Partial profile; unset fields fall back to the defaults in `[chunking]`.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProfileOverride {
    pub target_tokens: Option<usize>,
    pub overlap_tokens: Option<usize>,
    pub min_tokens: Option<usize>,
}

fn default_overlap() -> usize {
    0
}

impl ChunkingConfig {
    /// Resolve the chunk profile for a stored content type.
    pub fn profile_for(&self, content_type: &str) -> crate::chunk::ChunkProfile {
        let key = match content_type {
            "text/markdown" => "markdown",
            "application/pdf" => "pdf",
            "text/html" => "html",
            _ => "plain",
        };
        let ov = self.profiles.get(key).cloned().unwrap_or_default();
        crate::chunk::ChunkProfile {
            target_tokens: ov.target_tokens.unwrap_or(self.target_tokens),
            overlap_tokens: ov.overlap_tokens.unwrap_or(self.overlap_tokens),
            min_tokens: ov.min_tokens.unwrap_or(self.min_tokens),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_keyword: i64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_vector: i64,
    #[serde(default = "default_final_limit")]
    pub final_limit: i64,
}

fn default_hybrid_alpha() -> f64 {
    0.6
}
fn default_candidate_k() -> i64 {
    80
}
fn default_final_limit() -> i64 {
    12
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the ollama provider. Ignored by openai.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConnectorsConfig {
    pub filesystem: Option<FilesystemConnectorConfig>,
    pub http: Option<HttpConnectorConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemConnectorConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Binary files larger than this are skipped instead of extracted.
    #[serde(default = "default_max_extract_bytes")]
    pub max_extract_bytes: u64,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

fn default_max_extract_bytes() -> u64 {
    32 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConnectorConfig {
    pub urls: Vec<String>,
    /// Pause between requests. Remote sites are not ours to hammer.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_http_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_delay_ms() -> u64 {
    1000
}
fn default_http_retries() -> u32 {
    3
}
fn default_user_agent() -> String {
    format!("doc-harvester/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "warn".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.target_tokens == 0 {
        anyhow::bail!("chunking.target_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.target_tokens {
        anyhow::bail!("chunking.overlap_tokens must be < chunking.target_tokens");
    }
    for (name, ov) in &config.chunking.profiles {
        let target = ov.target_tokens.unwrap_or(config.chunking.target_tokens);
        let overlap = ov.overlap_tokens.unwrap_or(config.chunking.overlap_tokens);
        if target == 0 {
            anyhow::bail!("chunking.profiles.{}.target_tokens must be > 0", name);
        }
        if overlap >= target {
            anyhow::bail!(
                "chunking.profiles.{}: overlap_tokens must be < target_tokens",
                name
            );
        }
    }

    // Validate retrieval
    if config.retrieval.final_limit < 1 {
        anyhow::bail!("retrieval.final_limit must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.hybrid_alpha) {
        anyhow::bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    Ok(config)
}

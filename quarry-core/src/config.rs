use crate::rag::ChunkingPolicy;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration for the whole engine.
///
/// A `Config` is passed explicitly to every operation; nothing in the
/// workspace reads configuration from process-wide state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub chunking: ChunkingPolicy,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Model endpoint settings.
///
/// Operations name a region (`bedrock_region` on the wire); each region maps
/// to the base URL of a model server. Unknown regions are rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_region")]
    pub default_region: String,
    #[serde(default = "default_regions")]
    pub regions: BTreeMap<String, String>,
    /// Per-request timeout for every model call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_region() -> String {
    "ap-northeast-1".to_string()
}

fn default_regions() -> BTreeMap<String, String> {
    let mut regions = BTreeMap::new();
    regions.insert(default_region(), "http://localhost:11434".to_string());
    regions
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            default_region: default_region(),
            regions: default_regions(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ProviderConfig {
    pub fn endpoint(&self, region: &str) -> Option<&str> {
        self.regions.get(region).map(|s| s.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Model id; recorded in every index built with it
    pub model: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "nomic-embed-text".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub model: String,
    pub temperature: f64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "llama3.2".to_string(),
            temperature: 0.2,
        }
    }
}

/// What a build does when a document or an embedding batch fails for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Any failure aborts the build; nothing is published.
    #[default]
    AllOrNothing,
    /// Failed documents/chunks are skipped and reported.
    Partial,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Key patterns skipped while listing documents.
    /// Default excludes: VCS/OS droppings and build outputs
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
}

fn default_batch_size() -> usize {
    16
}

fn default_exclude_patterns() -> Vec<String> {
    crate::patterns::default_exclude_patterns()
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            failure_policy: FailurePolicy::default(),
            exclude_patterns: default_exclude_patterns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    /// Overrides the built-in prompt template when set
    #[serde(default)]
    pub prompt_template: Option<String>,
    /// Upper bound on text taken from a single document into the prompt
    #[serde(default = "default_max_document_chars")]
    pub max_document_chars: usize,
}

fn default_top_k() -> usize {
    3
}

fn default_max_document_chars() -> usize {
    16 * 1024
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
            prompt_template: None,
            max_document_chars: default_max_document_chars(),
        }
    }
}

/// Backend for one bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum BucketMode {
    /// Process-local store, lost on exit
    Memory,
    /// Directory on the local filesystem
    Filesystem { root: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub buckets: BTreeMap<String, BucketMode>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            chunking: ChunkingPolicy::default(),
            build: BuildConfig::default(),
            query: QueryConfig::default(),
            retry: RetryPolicy::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `config.yaml` if it exists, otherwise use defaults.
    pub fn load_or_default() -> Self {
        Self::load("config.yaml").unwrap_or_default()
    }

    pub fn validate(&self) -> Result<()> {
        self.chunking
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self.build.batch_size == 0 {
            return Err(ConfigError::Invalid("build.batch_size must be positive".into()));
        }
        if self.query.default_top_k == 0 {
            return Err(ConfigError::Invalid("query.default_top_k must be positive".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid("retry.multiplier must be >= 1.0".into()));
        }
        if self.provider.timeout_secs == 0 {
            return Err(ConfigError::Invalid("provider.timeout_secs must be positive".into()));
        }
        if self.provider.endpoint(&self.provider.default_region).is_none() {
            return Err(ConfigError::Invalid(format!(
                "provider.default_region '{}' has no endpoint",
                self.provider.default_region
            )));
        }
        if self.embedding.model.trim().is_empty() || self.generation.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model ids must not be empty".into()));
        }
        Ok(())
    }
}

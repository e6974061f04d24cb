use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Attempts for a document write hitting a transient storage fault.
    #[serde(default = "default_write_retries")]
    pub write_retries: u32,
}

fn default_max_connections() -> u32 {
    5
}
fn default_write_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_search_provider")]
    pub provider: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Objects requested per page when listing a remote index.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: default_search_provider(),
            endpoint: None,
            api_key_env: default_search_key_env(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            page_size: default_page_size(),
        }
    }
}

fn default_search_provider() -> String {
    "memory".to_string()
}
fn default_search_key_env() -> String {
    "WEAVIATE_API_KEY".to_string()
}
fn default_page_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_completion_provider")]
    pub provider: String,
    /// Low-cost model used for metadata generation.
    #[serde(default = "default_completion_model")]
    pub model: String,
    #[serde(default = "default_completion_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_completion_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_completion_provider(),
            model: default_completion_model(),
            endpoint: default_completion_endpoint(),
            api_key_env: default_completion_key_env(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl CompletionConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_completion_provider() -> String {
    "disabled".to_string()
}
fn default_completion_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_completion_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_completion_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Rows fetched per page while enumerating the document store.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

fn default_batch_size() -> u32 {
    100
}

/// Where deferred work runs.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerMode {
    /// Single background worker draining an in-process FIFO.
    #[default]
    InProcess,
    /// Work items run immediately; an external trigger runtime owns queueing.
    Direct,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct WorkerConfig {
    #[serde(default)]
    pub mode: WorkerMode,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.db.max_connections == 0 {
        anyhow::bail!("db.max_connections must be > 0");
    }

    if config.sync.batch_size == 0 {
        anyhow::bail!("sync.batch_size must be > 0");
    }

    match config.search.provider.as_str() {
        "memory" => {}
        "weaviate" => {
            if config.search.endpoint.is_none() {
                anyhow::bail!("search.endpoint must be specified when provider is 'weaviate'");
            }
            if config.search.page_size == 0 {
                anyhow::bail!("search.page_size must be > 0");
            }
        }
        other => anyhow::bail!(
            "Unknown search provider: '{}'. Must be memory or weaviate.",
            other
        ),
    }

    match config.completion.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown completion provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_text: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_text)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse("[db]\npath = \"./data/rag.sqlite\"\n").unwrap();
        assert_eq!(config.search.provider, "memory");
        assert!(!config.completion.is_enabled());
        assert_eq!(config.completion.model, "gpt-4o-mini");
        assert_eq!(config.sync.batch_size, 100);
        assert_eq!(config.worker.mode, WorkerMode::InProcess);
    }

    #[test]
    fn worker_mode_parses_snake_case() {
        let config = parse("[db]\npath = \"x.sqlite\"\n[worker]\nmode = \"direct\"\n").unwrap();
        assert_eq!(config.worker.mode, WorkerMode::Direct);
    }

    #[test]
    fn weaviate_requires_endpoint() {
        let err = parse("[db]\npath = \"x.sqlite\"\n[search]\nprovider = \"weaviate\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("search.endpoint"));
    }

    #[test]
    fn unknown_completion_provider_is_rejected() {
        let err = parse("[db]\npath = \"x.sqlite\"\n[completion]\nprovider = \"llama\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("Unknown completion provider"));
    }
}

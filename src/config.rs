//! TOML configuration.
//!
//! Every section except `[db]` is optional and falls back to defaults
//! suited to a local Ollama install. See `config/coach.example.toml`.

use anyhow::{bail, Context, Result};
use globset::Glob;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatchConfig {
    #[serde(default = "default_watch_dir")]
    pub dir: PathBuf,
    /// Matched against the file's basename.
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    /// Index files already present when the watcher starts.
    #[serde(default = "default_true")]
    pub backfill: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            dir: default_watch_dir(),
            include_globs: default_include_globs(),
            backfill: true,
        }
    }
}

fn default_watch_dir() -> PathBuf {
    PathBuf::from("./documents")
}
fn default_include_globs() -> Vec<String> {
    vec!["*.txt".to_string()]
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_no_results_message")]
    pub no_results_message: String,
    /// Weight of the vector score in hybrid ranking; 0 is keyword-only,
    /// 1 is vector-only. Ignored while embeddings are disabled.
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    /// Candidates fetched from each ranking before they are merged.
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            no_results_message: default_no_results_message(),
            hybrid_alpha: default_hybrid_alpha(),
            candidate_k: default_candidate_k(),
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_no_results_message() -> String {
    "No relevant strategies found.".to_string()
}
fn default_hybrid_alpha() -> f64 {
    0.6
}
fn default_candidate_k() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `disabled`, `ollama` or `openai`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// API root; the provider's default when unset.
    #[serde(default)]
    pub url: Option<String>,
    /// Environment variable holding the key for `openai`.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            api_key_env: default_api_key_env(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    /// OpenAI-compatible API root, e.g. `http://localhost:11434/v1`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_model_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_model_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:11434/v1".to_string()
}
fn default_model() -> String {
    "llama3.2".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_model_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct ToolsConfig {
    /// `local` (in-process registry) or `http` (remote `coach serve`).
    #[serde(default = "default_transport")]
    pub transport: String,
    #[serde(default)]
    pub remote_url: Option<String>,
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_tada_list")]
    pub tada_list: PathBuf,
    #[serde(default = "default_task_list")]
    pub task_list: PathBuf,
    #[serde(default = "default_weather_url")]
    pub weather_url: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            remote_url: None,
            timeout_secs: default_tool_timeout_secs(),
            tada_list: default_tada_list(),
            task_list: default_task_list(),
            weather_url: default_weather_url(),
        }
    }
}

fn default_transport() -> String {
    "local".to_string()
}
fn default_tool_timeout_secs() -> u64 {
    30
}
fn default_tada_list() -> PathBuf {
    PathBuf::from("./tada_list.txt")
}
fn default_task_list() -> PathBuf {
    PathBuf::from("./tasks.txt")
}
fn default_weather_url() -> String {
    "https://wttr.in".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AgentConfig {
    /// Replaces the built-in coach prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7331".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

impl Config {
    /// All-defaults configuration with the database under `./data`.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/coach.sqlite"),
            },
            watch: WatchConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            model: ModelConfig::default(),
            tools: ToolsConfig::default(),
            agent: AgentConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Upper bound for every `max_retries` setting.
pub const MAX_RETRIES_LIMIT: u32 = 10;

fn validate(config: &Config) -> Result<()> {
    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.hybrid_alpha) {
        bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }
    if config.model.timeout_secs == 0 {
        bail!("model.timeout_secs must be > 0");
    }
    if config.model.max_retries > MAX_RETRIES_LIMIT {
        bail!("model.max_retries must be <= {}", MAX_RETRIES_LIMIT);
    }
    if config.tools.timeout_secs == 0 {
        bail!("tools.timeout_secs must be > 0");
    }
    if config.model.base_url.trim().is_empty() {
        bail!("model.base_url must not be empty");
    }
    reqwest::Url::parse(&config.tools.weather_url)
        .with_context(|| format!("tools.weather_url: invalid URL '{}'", config.tools.weather_url))?;

    for pattern in &config.watch.include_globs {
        Glob::new(pattern)
            .with_context(|| format!("watch.include_globs: invalid glob '{}'", pattern))?;
    }

    match config.embedding.provider.as_str() {
        "disabled" => {}
        "ollama" | "openai" => {
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if matches!(config.embedding.dims, None | Some(0)) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.timeout_secs == 0 {
                bail!("embedding.timeout_secs must be > 0");
            }
            if config.embedding.max_retries > MAX_RETRIES_LIMIT {
                bail!("embedding.max_retries must be <= {}", MAX_RETRIES_LIMIT);
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, ollama, or openai.",
            other
        ),
    }

    match config.tools.transport.as_str() {
        "local" => {}
        "http" => {
            if config.tools.remote_url.is_none() {
                bail!("tools.remote_url must be set when tools.transport is 'http'");
            }
        }
        other => bail!(
            "Unknown tool transport: '{}'. Must be local or http.",
            other
        ),
    }

    Ok(())
}

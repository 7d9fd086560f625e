use crate::storage::{self, StorageManager};
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.upstage.ai/v1/solar";
const DEFAULT_EMBEDDING_MODEL: &str = "embedding-passage";
const DEFAULT_CHAT_MODEL: &str = "solar-1-mini-chat";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default fastembed model for the local backend
const DEFAULT_LOCAL_MODEL: &str = "bge-base-en-v1.5";

const DEFAULT_TOP_N: usize = 8;
const DEFAULT_SUMMARY_TOP_N: usize = 10;
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Overrides `provider.api_key` at load time.
pub const API_KEY_ENV: &str = "PETMATCH_API_KEY";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("couldnt access config: {0}")]
    Io(#[from] std::io::Error),

    #[error("config is malformed: {0}")]
    Malformed(#[from] serde_yml::Error),

    #[error("config file is not valid utf8")]
    NotUtf8,

    #[error("{field}: {message}")]
    Invalid { field: &'static str, message: String },
}

fn invalid(field: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        message: message.into(),
    }
}

/// Embedding/chat API endpoint and credentials
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            embedding_model: default_embedding_model(),
            chat_model: default_chat_model(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_chat_model() -> String {
    DEFAULT_CHAT_MODEL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    #[default]
    Remote,
    /// fastembed, requires the `local-embeddings` feature
    Local,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub backend: EmbeddingBackend,

    /// Model name for the local backend (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_local_model")]
    pub local_model: String,

    /// Parallelism for embedding generation: "auto" or a positive integer
    #[serde(default = "default_parallelism")]
    pub parallelism: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::default(),
            local_model: default_local_model(),
            parallelism: default_parallelism(),
        }
    }
}

impl EmbeddingConfig {
    /// Pool size for batch generation, `None` for "auto".
    pub fn parallelism(&self) -> Option<usize> {
        self.parallelism.parse().ok().filter(|n| *n > 0)
    }

    /// Model name pinned in the vector store headers.
    pub fn model_name<'a>(&'a self, provider: &'a ProviderConfig) -> &'a str {
        match self.backend {
            EmbeddingBackend::Remote => &provider.embedding_model,
            EmbeddingBackend::Local => &self.local_model,
        }
    }
}

fn default_local_model() -> String {
    DEFAULT_LOCAL_MODEL.to_string()
}

fn default_parallelism() -> String {
    "auto".to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecommendConfig {
    #[serde(default = "default_top_n")]
    pub default_top_n: usize,

    /// How many of the heaviest interests go into a preference summary
    #[serde(default = "default_summary_top_n")]
    pub summary_top_n: usize,
}

impl Default for RecommendConfig {
    fn default() -> Self {
        Self {
            default_top_n: DEFAULT_TOP_N,
            summary_top_n: DEFAULT_SUMMARY_TOP_N,
        }
    }
}

fn default_top_n() -> usize {
    DEFAULT_TOP_N
}

fn default_summary_top_n() -> usize {
    DEFAULT_SUMMARY_TOP_N
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub recommend: RecommendConfig,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            embedding: EmbeddingConfig::default(),
            recommend: RecommendConfig::default(),
            listen_addr: default_listen_addr(),
            base_path: String::new(),
        }
    }
}

impl Config {
    fn validate(&self) -> Result<(), ConfigError> {
        let provider = &self.provider;
        let url = url::Url::parse(provider.base_url.trim())
            .map_err(|err| invalid("provider.base_url", err.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(
                "provider.base_url",
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }

        if provider.timeout_secs == 0 {
            return Err(invalid("provider.timeout_secs", "must be greater than 0"));
        }

        // validate parallelism: "auto" or positive integer
        let parallelism = &self.embedding.parallelism;
        if parallelism != "auto" && !matches!(parallelism.parse::<u32>(), Ok(n) if n > 0) {
            return Err(invalid(
                "embedding.parallelism",
                format!("must be 'auto' or a positive integer, got '{parallelism}'"),
            ));
        }

        if self.recommend.default_top_n == 0 {
            return Err(invalid("recommend.default_top_n", "must be greater than 0"));
        }
        if self.recommend.summary_top_n == 0 {
            return Err(invalid("recommend.summary_top_n", "must be greater than 0"));
        }

        Ok(())
    }

    pub fn load_with(base_path: &str) -> Result<Self, ConfigError> {
        let store = storage::BackendLocal::new(base_path)?;

        // create new if does not exist
        if !store.exists("config.yaml") {
            log::info!("writing default config to {base_path}/config.yaml");
            store.write(
                "config.yaml",
                serde_yml::to_string(&Self::default())?.as_bytes(),
            )?;
        }

        let config_str =
            String::from_utf8(store.read("config.yaml")?).map_err(|_| ConfigError::NotUtf8)?;
        let mut config: Self = serde_yml::from_str(&config_str)?;

        config.base_path = base_path.to_string();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        // applied after saving so the key from the environment never lands on disk
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                config.provider.api_key = Some(key);
            }
        }

        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let store = storage::BackendLocal::new(&self.base_path)?;

        let config_str = serde_yml::to_string(&self)?;
        store.write("config.yaml", config_str.as_bytes())?;
        Ok(())
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }
}

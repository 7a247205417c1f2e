//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable holding the generation service API key
pub const GENERATION_API_KEY_ENV: &str = "LOREKEEP_GENERATION_API_KEY";

/// Lorekeep configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    pub graph: GraphConfig,
    pub generation: GenerationConfig,
    pub projection: ProjectionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database file; `None` means the platform default location
    pub path: Option<PathBuf>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Fixed seed for the random-path sampler (reproducible walks)
    pub random_seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(skip)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionConfig {
    pub channel_capacity: usize,
    /// JSONL outbox consumed by the analytics mirror; disabled when unset
    pub outbox_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig {
                path: None,
                max_connections: 5,
            },
            graph: GraphConfig::default(),
            generation: GenerationConfig::default(),
            projection: ProjectionConfig {
                channel_capacity: 256,
                outbox_path: None,
            },
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "http://localhost:8088/v1".to_string(),
            model: "dialogue-writer".to_string(),
            timeout_secs: 60,
            max_count: 10,
        }
    }
}

impl GenerationConfig {
    pub fn resolved_api_key(&self) -> anyhow::Result<Option<String>> {
        self.enforce_env_only()?;
        Ok(env::var(GENERATION_API_KEY_ENV).ok())
    }

    pub fn enforce_env_only(&self) -> anyhow::Result<()> {
        if self.api_key.is_some() {
            return Err(anyhow!(
                "Generation API keys must be provided via {}, not stored in configuration",
                GENERATION_API_KEY_ENV
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("LOREKEEP_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("lorekeep")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or fall back to defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.generation.enforce_env_only()?;

        if self.store.max_connections == 0 {
            return Err(anyhow!("store.max_connections must be at least 1"));
        }
        if self.generation.max_count == 0 {
            return Err(anyhow!("generation.max_count must be at least 1"));
        }
        if self.projection.channel_capacity == 0 {
            return Err(anyhow!("projection.channel_capacity must be at least 1"));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        let display_path = |p: &Option<PathBuf>| {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(default)".to_string())
        };

        match key {
            "store.path" => Ok(display_path(&self.store.path)),
            "store.max_connections" => Ok(self.store.max_connections.to_string()),

            "graph.random_seed" => Ok(self
                .graph
                .random_seed
                .map(|s| s.to_string())
                .unwrap_or_else(|| "(entropy)".to_string())),

            "generation.base_url" => Ok(self.generation.base_url.clone()),
            "generation.model" => Ok(self.generation.model.clone()),
            "generation.timeout_secs" => Ok(self.generation.timeout_secs.to_string()),
            "generation.max_count" => Ok(self.generation.max_count.to_string()),
            "generation.api_key" => match self.generation.resolved_api_key()? {
                Some(_) => Ok("***".to_string()),
                None => Ok(format!("(not set - use {} env var)", GENERATION_API_KEY_ENV)),
            },

            "projection.channel_capacity" => Ok(self.projection.channel_capacity.to_string()),
            "projection.outbox_path" => Ok(display_path(&self.projection.outbox_path)),

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `lorekeep config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "store.path" => {
                self.store.path = optional_path(value);
            }
            "store.max_connections" => {
                let max: u32 = value
                    .parse()
                    .with_context(|| format!("Invalid max_connections value: {}", value))?;
                if max == 0 {
                    return Err(anyhow!("store.max_connections must be at least 1"));
                }
                self.store.max_connections = max;
            }

            "graph.random_seed" => {
                self.graph.random_seed = if value.is_empty() || value == "none" {
                    None
                } else {
                    Some(
                        value
                            .parse()
                            .with_context(|| format!("Invalid random_seed value: {}", value))?,
                    )
                };
            }

            "generation.base_url" => {
                if !(value.starts_with("http://") || value.starts_with("https://")) {
                    return Err(anyhow!("generation.base_url must be an http(s) URL"));
                }
                self.generation.base_url = value.trim_end_matches('/').to_string();
            }
            "generation.model" => {
                self.generation.model = value.to_string();
            }
            "generation.timeout_secs" => {
                self.generation.timeout_secs = value
                    .parse()
                    .with_context(|| format!("Invalid timeout_secs value: {}", value))?;
            }
            "generation.max_count" => {
                let max: usize = value
                    .parse()
                    .with_context(|| format!("Invalid max_count value: {}", value))?;
                if max == 0 {
                    return Err(anyhow!("generation.max_count must be at least 1"));
                }
                self.generation.max_count = max;
            }
            "generation.api_key" => {
                return Err(anyhow!(
                    "API keys cannot be stored in configuration. Set the {} environment variable instead.",
                    GENERATION_API_KEY_ENV
                ));
            }

            "projection.channel_capacity" => {
                let capacity: usize = value
                    .parse()
                    .with_context(|| format!("Invalid channel_capacity value: {}", value))?;
                if capacity == 0 {
                    return Err(anyhow!("projection.channel_capacity must be at least 1"));
                }
                self.projection.channel_capacity = capacity;
            }
            "projection.outbox_path" => {
                self.projection.outbox_path = optional_path(value);
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `lorekeep config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        Self::keys()
            .iter()
            .map(|key| Ok((key.to_string(), self.get(key)?)))
            .collect()
    }

    /// All recognised configuration keys
    pub fn keys() -> &'static [&'static str] {
        &[
            "store.path",
            "store.max_connections",
            "graph.random_seed",
            "generation.base_url",
            "generation.model",
            "generation.timeout_secs",
            "generation.max_count",
            "generation.api_key",
            "projection.channel_capacity",
            "projection.outbox_path",
        ]
    }
}

fn optional_path(value: &str) -> Option<PathBuf> {
    if value.is_empty() || value == "none" {
        None
    } else {
        Some(PathBuf::from(value))
    }
}

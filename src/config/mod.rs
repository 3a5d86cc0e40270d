pub mod templates;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use anyhow::Result;

use crate::utils::{CopilotError, CopilotResult};

pub use templates::{AnalysisType, MergedTemplate, PublicationType, TemplateRegistry};

pub const DEFAULT_CONFIG_PATH: &str = "config/settings.toml";
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
const PLACEHOLDER_API_KEY: &str = "your-openai-api-key";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub generation: GenerationConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub critique_max_tokens: u32,
    pub timeout_secs: u64,
    #[serde(default)]
    pub proxy: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub bind: String,
    pub max_upload_mb: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    pub capacity: usize,
}

fn default_max_retries() -> u32 {
    3
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8501".to_string(),
            max_upload_mb: 50,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 128 }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let config_path = PathBuf::from(path.as_ref());

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str::<AppConfig>(&content)?
        } else {
            Self::default()
        };

        // 环境变量中的密钥优先于配置文件
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                config.generation.api_key = key.trim().to_string();
            }
        }

        Ok(config)
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// 生成服务密钥为必填项，缺失时进程不应启动
    pub fn require_api_key(&self) -> CopilotResult<&str> {
        let key = self.generation.api_key.trim();
        if key.is_empty() || key == PLACEHOLDER_API_KEY {
            return Err(CopilotError::MissingCredential);
        }
        Ok(key)
    }

    pub fn validate(&self) -> CopilotResult<()> {
        if self.cache.capacity == 0 {
            return Err(CopilotError::ConfigError("cache.capacity 必须大于 0".to_string()));
        }
        if self.generation.max_tokens == 0 {
            return Err(CopilotError::ConfigError("generation.max_tokens 必须大于 0".to_string()));
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            generation: GenerationConfig {
                api_url: "https://api.openai.com/v1/chat/completions".to_string(),
                api_key: PLACEHOLDER_API_KEY.to_string(),
                model: "gpt-4o-2024-08-06".to_string(),
                max_tokens: 16000,
                critique_max_tokens: 1000,
                timeout_secs: 300,
                proxy: String::new(),
                max_retries: default_max_retries(),
            },
            server: ServerConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("settings.toml");
        let path_str = path.to_string_lossy().to_string();

        let mut config = AppConfig::default();
        config.cache.capacity = 16;
        config.save(&path_str).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let loaded: AppConfig = toml::from_str(&content).unwrap();
        assert_eq!(loaded.cache.capacity, 16);
        assert_eq!(loaded.generation.model, "gpt-4o-2024-08-06");
        assert_eq!(loaded.generation.max_tokens, 16000);
    }

    #[test]
    fn placeholder_key_is_treated_as_missing() {
        let config = AppConfig::default();
        assert!(matches!(config.require_api_key(), Err(CopilotError::MissingCredential)));

        let mut config = AppConfig::default();
        config.generation.api_key = "sk-test".to_string();
        assert_eq!(config.require_api_key().unwrap(), "sk-test");
    }

    #[test]
    fn optional_sections_fall_back_to_defaults() {
        let toml_text = r#"
            [generation]
            api_url = "http://localhost:8001/v1/chat/completions"
            api_key = "sk-local"
            model = "local-model"
            max_tokens = 4000
            critique_max_tokens = 500
            timeout_secs = 30
        "#;
        let config: AppConfig = toml::from_str(toml_text).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:8501");
        assert_eq!(config.cache.capacity, 128);
        assert_eq!(config.generation.max_retries, 3);
        assert!(config.validate().is_ok());
    }
}

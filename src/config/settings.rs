use anyhow::Context;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub telegram: TelegramConfig,
    pub model_service: ModelServiceConfig,
    pub conversation: ConversationConfig,
    pub throttle: ThrottleConfig,
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub api_token: String,
    pub api_url: String,
    pub poll_timeout_secs: u64,
    pub skip_pending_updates: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelServiceConfig {
    pub model_url: String,
    pub username: String,
    pub password: String,
    pub verify_ssl: bool,
    /// Budget per content image; the transfer call scales it by image count.
    pub transfer_timeout_ms: u64,
    pub examples_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub max_content_images: usize,
    pub media_group_latency_ms: u64,
    pub channel_buffer_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub rate_limit_ms: u64,
    pub key_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub users_file: String,
    pub examples_dir: String,
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// "auto", "cpu" or "cuda"
    pub device: String,
    pub backbone_weights: String,
    pub generators_dir: String,
    pub fixed_styles: Vec<String>,
    /// Side length for the optimization path. Unset means 512 on CUDA, 256 on CPU.
    pub image_size: Option<usize>,
    pub content_layers: Vec<usize>,
    pub style_layers: Vec<usize>,
    pub content_weight: f64,
    pub style_weight: f64,
    pub max_iterations: usize,
    pub report_every: Option<usize>,
    pub pool_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_token: String::new(),
            api_url: "https://api.telegram.org".to_string(),
            poll_timeout_secs: 30,
            skip_pending_updates: true,
        }
    }
}

impl Default for ModelServiceConfig {
    fn default() -> Self {
        Self {
            model_url: "https://127.0.0.1:5000".to_string(),
            username: String::new(),
            password: String::new(),
            verify_ssl: true,
            transfer_timeout_ms: 600_000,
            examples_timeout_ms: 60_000,
        }
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_content_images: 3,
            media_group_latency_ms: 10,
            channel_buffer_size: 100,
        }
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            rate_limit_ms: 500,
            key_prefix: "antiflood_".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            users_file: "users.yaml".to_string(),
            examples_dir: "assets/examples".to_string(),
            max_body_bytes: 64 * 1024 * 1024,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device: "auto".to_string(),
            backbone_weights: "checkpoints/vgg19_features.safetensors".to_string(),
            generators_dir: "checkpoints".to_string(),
            fixed_styles: crate::styles::fixed_style_ids()
                .map(str::to_string)
                .collect(),
            image_size: None,
            content_layers: vec![4],
            style_layers: vec![1, 2, 3, 4, 5],
            content_weight: 1.0,
            style_weight: 1e6,
            max_iterations: 300,
            report_every: None,
            pool_size: 3,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from an explicit file, or from `config/{CONFIG_ENV}` when
    /// no path is given. `APP__SECTION__KEY` environment variables win.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        builder = match path {
            Some(path) => builder.add_source(File::from(Path::new(path)).required(true)),
            None => {
                let config_env = env::var("CONFIG_ENV").unwrap_or_else(|_| "default".to_string());
                builder.add_source(File::with_name(&format!("config/{}", config_env)).required(false))
            }
        };

        builder
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?
            .try_deserialize()
    }
}

impl ModelServiceConfig {
    pub fn transfer_timeout(&self, image_count: usize) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms) * image_count.max(1) as u32
    }

    pub fn examples_timeout(&self) -> Duration {
        Duration::from_millis(self.examples_timeout_ms)
    }
}

impl ThrottleConfig {
    pub fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.rate_limit_ms)
    }
}

impl ConversationConfig {
    pub fn media_group_latency(&self) -> Duration {
        Duration::from_millis(self.media_group_latency_ms)
    }
}

/// Load the allow-list of service users (`username: password-hash`).
///
/// Parsed as a plain YAML map: usernames keep their case and may contain
/// dots, which the layered `Config` loader would fold or split.
pub fn load_users(path: &str) -> anyhow::Result<HashMap<String, String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read users file {}", path))?;
    if contents.trim().is_empty() {
        return Ok(HashMap::new());
    }
    serde_yaml::from_str(&contents).with_context(|| format!("invalid users file {}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_service_contract() {
        let settings = Settings::default();
        assert_eq!(settings.conversation.max_content_images, 3);
        assert_eq!(settings.engine.pool_size, 3);
        assert_eq!(settings.engine.max_iterations, 300);
        assert_eq!(settings.engine.fixed_styles.len(), 4);
        assert_eq!(settings.throttle.rate_limit(), Duration::from_millis(500));
    }

    #[test]
    fn test_load_partial_yaml_keeps_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "telegram:\n  api_token: \"123:abc\"\nmodel_service:\n  model_url: \"http://localhost:5000\"\n  verify_ssl: false\n"
        )
        .unwrap();

        let settings = Settings::load(file.path().to_str()).unwrap();
        assert_eq!(settings.telegram.api_token, "123:abc");
        assert_eq!(settings.model_service.model_url, "http://localhost:5000");
        assert!(!settings.model_service.verify_ssl);
        assert_eq!(settings.telegram.api_url, "https://api.telegram.org");
        assert_eq!(settings.server.port, 5000);
    }

    #[test]
    fn test_transfer_timeout_scales_with_images() {
        let config = ModelServiceConfig {
            transfer_timeout_ms: 1000,
            ..Default::default()
        };
        assert_eq!(config.transfer_timeout(3), Duration::from_secs(3));
        assert_eq!(config.transfer_timeout(0), Duration::from_secs(1));
    }

    #[test]
    fn test_load_users() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "bot: \"pbkdf2:sha256:1000$salt$abcd\"").unwrap();

        let users = load_users(file.path().to_str().unwrap()).unwrap();
        assert_eq!(users.get("bot").map(String::as_str), Some("pbkdf2:sha256:1000$salt$abcd"));
    }

    #[test]
    fn test_load_users_keeps_usernames_verbatim() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "AliceBot: \"hash-a\"\njohn.doe: \"hash-j\"").unwrap();

        let users = load_users(file.path().to_str().unwrap()).unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users.get("AliceBot").map(String::as_str), Some("hash-a"));
        assert_eq!(users.get("john.doe").map(String::as_str), Some("hash-j"));
        assert!(users.get("alicebot").is_none());
    }

    #[test]
    fn test_load_users_rejects_missing_file() {
        assert!(load_users("/nonexistent/users.yaml").is_err());
    }
}

//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! Deployment platforms and the legacy environment contract are handled as
//! explicit overrides: `HOST`, `PORT`, `IFLYTEK_APP_ID`, `IFLYTEK_API_KEY`,
//! and `IFLYTEK_API_SECRET` take effect without the APP_ prefix.
//!
//! Configuration is validated once at startup and is immutable for the
//! process lifetime; credentials cannot be changed at runtime.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub iflytek: IflytekConfig,
    pub evaluation: EvaluationConfig,
    pub performance: PerformanceConfig,
}

/// HTTP/WebSocket listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Credentials and endpoint for the remote evaluation service.
///
/// ## Fields:
/// - `app_id`: public application identifier sent in every Init frame
/// - `api_key`: public key identifier embedded in the authorization descriptor
/// - `api_secret`: HMAC signing secret, never sent over the wire
/// - `host`/`path`: WebSocket endpoint of the evaluation service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IflytekConfig {
    pub app_id: String,
    pub api_key: String,
    pub api_secret: String,
    pub host: String,
    pub path: String,
}

/// Default evaluation parameters applied to every request.
///
/// ## Fields:
/// - `language`: evaluation language code (e.g. "zh_cn")
/// - `category`: evaluation task category (e.g. "read_sentence")
/// - `ent`: engine variant selector (e.g. "cn_vip")
/// - `session_timeout_secs`: overall deadline for one remote exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    pub language: String,
    pub category: String,
    pub ent: String,
    pub session_timeout_secs: u64,
}

/// Capacity limits.
///
/// ## Tuning guidelines:
/// - `max_concurrent_sessions`: each in-flight evaluation holds one remote
///   WebSocket connection and one ffmpeg subprocess
/// - `max_audio_bytes`: upper bound on a single recording before transcoding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
    pub max_audio_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            iflytek: IflytekConfig {
                // Credentials have no sensible default; validate() rejects
                // empty values so a misconfigured deployment fails at startup.
                app_id: String::new(),
                api_key: String::new(),
                api_secret: String::new(),
                host: "ise-api.xfyun.cn".to_string(),
                path: "/v2/open-ise".to_string(),
            },
            evaluation: EvaluationConfig {
                language: "zh_cn".to_string(),
                category: "read_sentence".to_string(),
                ent: "cn_vip".to_string(),
                session_timeout_secs: 30,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 10,
                max_audio_bytes: 10 * 1024 * 1024,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml, and the environment.
    ///
    /// ## Priority (highest to lowest):
    /// 1. Deployment overrides: HOST, PORT, IFLYTEK_APP_ID, IFLYTEK_API_KEY,
    ///    IFLYTEK_API_SECRET
    /// 2. Environment variables with APP_ prefix (APP_SERVER_HOST, ...)
    /// 3. config.toml (optional)
    /// 4. Built-in defaults
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(app_id) = env::var("IFLYTEK_APP_ID") {
            settings = settings.set_override("iflytek.app_id", app_id)?;
        }

        if let Ok(api_key) = env::var("IFLYTEK_API_KEY") {
            settings = settings.set_override("iflytek.api_key", api_key)?;
        }

        if let Ok(api_secret) = env::var("IFLYTEK_API_SECRET") {
            settings = settings.set_override("iflytek.api_secret", api_secret)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration can actually serve requests.
    ///
    /// Missing credentials are fatal here rather than at the first request:
    /// a gateway without a usable signing secret cannot evaluate anything.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.iflytek.app_id.is_empty() {
            return Err(anyhow::anyhow!("IFLYTEK_APP_ID is not configured"));
        }

        if self.iflytek.api_key.is_empty() {
            return Err(anyhow::anyhow!("IFLYTEK_API_KEY is not configured"));
        }

        if self.iflytek.api_secret.is_empty() {
            return Err(anyhow::anyhow!("IFLYTEK_API_SECRET is not configured"));
        }

        if self.iflytek.host.is_empty() {
            return Err(anyhow::anyhow!("Evaluation service host cannot be empty"));
        }

        if !self.iflytek.path.starts_with('/') {
            return Err(anyhow::anyhow!(
                "Evaluation service path must start with '/'"
            ));
        }

        if self.evaluation.session_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Session timeout must be greater than 0"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!(
                "Max concurrent sessions must be greater than 0"
            ));
        }

        if self.performance.max_audio_bytes == 0 {
            return Err(anyhow::anyhow!("Max audio bytes must be greater than 0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_credentials() -> AppConfig {
        let mut config = AppConfig::default();
        config.iflytek.app_id = "app123".to_string();
        config.iflytek.api_key = "key456".to_string();
        config.iflytek.api_secret = "secret789".to_string();
        config
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.iflytek.host, "ise-api.xfyun.cn");
        assert_eq!(config.iflytek.path, "/v2/open-ise");
        assert_eq!(config.evaluation.language, "zh_cn");
        assert_eq!(config.evaluation.category, "read_sentence");
    }

    #[test]
    fn test_missing_credentials_rejected() {
        // Defaults carry no credentials, so validation must fail at startup.
        let config = AppConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_with_credentials_validates() {
        let config = config_with_credentials();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_rejects_bad_values() {
        let mut config = config_with_credentials();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = config_with_credentials();
        config.evaluation.session_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = config_with_credentials();
        config.iflytek.path = "v2/open-ise".to_string();
        assert!(config.validate().is_err());
    }
}

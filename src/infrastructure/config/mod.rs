use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::infrastructure::model::ComputeTarget;

#[derive(Debug, Clone)]
pub struct Config {
    pub openai_api_key: String,
    pub chat_model: String,
    pub cache_dir: PathBuf,
    pub compute_target: ComputeTarget,
    pub synthesis_parallelism: usize,
    pub synthesis_timeout: Duration,
    pub upstream_timeout: Duration,
    pub lookup_cache_enabled: bool,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();

        let config = Config {
            openai_api_key: env::var("OPENAI_API_KEY")?,
            chat_model: env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-3.5-turbo".to_string()),
            cache_dir: env::var("TTS_CACHE_DIR")
                .unwrap_or_else(|_| "cache".to_string())
                .into(),
            compute_target: env::var("TTS_DEVICE")
                .unwrap_or_else(|_| "cpu".to_string())
                .parse()?,
            synthesis_parallelism: env::var("TTS_PARALLELISM")
                .unwrap_or_else(|_| "1".to_string())
                .parse()?,
            synthesis_timeout: Duration::from_secs(
                env::var("SYNTHESIS_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "120".to_string())
                    .parse()?,
            ),
            upstream_timeout: Duration::from_secs(
                env::var("UPSTREAM_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()?,
            ),
            lookup_cache_enabled: env::var("TTS_LOOKUP_CACHE_ENABLED")
                .unwrap_or_else(|_| "false".to_string())
                .parse::<String>()
                .map(|s| s.to_lowercase() == "true")
                .unwrap_or(false),
            log_format: env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .parse::<String>()
                .map(|s| match s.as_str() {
                    "json" => LogFormat::Json,
                    _ => LogFormat::Pretty,
                })?,
        };

        Ok(config)
    }
}

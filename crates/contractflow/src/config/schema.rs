use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// SQLite file holding jobs, stage logs, quality issues and records.
    /// Falls back to `~/.contractflow/data/contractflow.db`.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub client: ClientSettings,
    pub router: RouterSettings,
    pub backends: Vec<BackendConfig>,
    #[serde(default)]
    pub pipeline: PipelineSettings,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default)]
    pub rate_limit: Option<RateLimitSettings>,
    #[serde(default)]
    pub cache: Option<CacheSettings>,
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_connections() -> usize {
    100
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_retry_delay_ms() -> u64 {
    1000
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_connections: default_max_connections(),
            max_retries: default_max_retries(),
            initial_retry_delay_ms: default_initial_retry_delay_ms(),
            rate_limit: None,
            cache: None,
        }
    }
}

/// Token bucket of `requests` tokens refilled every `period_secs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub requests: u32,
    pub period_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: u64,
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_cache_max_entries() -> u64 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSettings {
    #[serde(default = "default_complexity_threshold")]
    pub complexity_threshold: f64,
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,
    #[serde(default)]
    pub rag_enabled: bool,
    #[serde(default = "default_rag_sample_size")]
    pub rag_sample_size: usize,
    /// Routes every unforced document to the testing model.
    #[serde(default)]
    pub testing_mode: bool,
    pub models: ModelRoles,
    /// Extra alias → model id mappings, merged over the built-in aliases.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

fn default_complexity_threshold() -> f64 {
    0.7
}

fn default_true() -> bool {
    true
}

fn default_rag_sample_size() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRoles {
    pub default_worker: String,
    pub expert_fallback: String,
    pub reserve_channel: String,
    pub testing: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiFormat {
    /// `POST /v1/chat/completions` style (OpenAI, DeepSeek, vLLM, ...).
    Openai,
    /// `POST /v1/messages` style.
    Anthropic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub model: String,
    pub api_format: ApiFormat,
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default)]
    pub api_key_env_var: Option<String>,
    /// USD per one million input tokens.
    #[serde(default)]
    pub input_price_per_million: f64,
    /// USD per one million output tokens.
    #[serde(default)]
    pub output_price_per_million: f64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

fn default_max_output_tokens() -> u32 {
    4096
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_page_concurrency")]
    pub page_concurrency: usize,
    #[serde(default)]
    pub ocr: OcrSettings,
    #[serde(default = "default_max_blocks_per_request")]
    pub max_blocks_per_request: usize,
}

fn default_page_concurrency() -> usize {
    5
}

fn default_max_blocks_per_request() -> usize {
    400
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            page_concurrency: default_page_concurrency(),
            ocr: OcrSettings::default(),
            max_blocks_per_request: default_max_blocks_per_request(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrEngineKind {
    TesseractCli,
    Leptess,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrSettings {
    #[serde(default = "default_ocr_engine")]
    pub engine: OcrEngineKind,
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
}

fn default_ocr_engine() -> OcrEngineKind {
    OcrEngineKind::TesseractCli
}

fn default_languages() -> Vec<String> {
    vec!["eng".to_string()]
}

fn default_dpi() -> u32 {
    300
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            engine: default_ocr_engine(),
            languages: default_languages(),
            dpi: default_dpi(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_settings_defaults() {
        let settings: ClientSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.timeout_secs, 120);
        assert_eq!(settings.max_connections, 100);
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.initial_retry_delay_ms, 1000);
        assert!(settings.rate_limit.is_none());
        assert!(settings.cache.is_none());
    }

    #[test]
    fn test_router_settings_defaults() {
        let json = r#"{
            "models": {
                "default_worker": "deepseek-chat",
                "expert_fallback": "claude-sonnet-4",
                "reserve_channel": "gpt-4o",
                "testing": "deepseek-lite"
            }
        }"#;
        let settings: RouterSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.complexity_threshold, 0.7);
        assert!(settings.fallback_enabled);
        assert!(!settings.rag_enabled);
        assert!(!settings.testing_mode);
        assert_eq!(settings.rag_sample_size, 10);
        assert!(settings.aliases.is_empty());
    }

    #[test]
    fn test_api_format_lowercase() {
        let format: ApiFormat = serde_json::from_str("\"anthropic\"").unwrap();
        assert_eq!(format, ApiFormat::Anthropic);
        let format: ApiFormat = serde_json::from_str("\"openai\"").unwrap();
        assert_eq!(format, ApiFormat::Openai);
    }

    #[test]
    fn test_ocr_engine_snake_case() {
        let engine: OcrEngineKind = serde_json::from_str("\"tesseract_cli\"").unwrap();
        assert_eq!(engine, OcrEngineKind::TesseractCli);
    }
}

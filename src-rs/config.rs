use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const MODEL_ENV_VAR: &str = "VOICECODE_GEMINI_MODEL";
pub const THINKING_LEVEL_ENV_VAR: &str = "VOICECODE_THINKING_LEVEL";
pub const ENABLE_PROMPT_CACHE_ENV_VAR: &str = "VOICECODE_ENABLE_PROMPT_CACHE";
pub const PROMPT_CACHE_TTL_ENV_VAR: &str = "VOICECODE_PROMPT_CACHE_TTL";

pub const DEFAULT_PROMPT_CACHE_TTL: &str = "3600s";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_TRANSIENT_RETRIES: u32 = 1;
pub const RETRY_BACKOFF: Duration = Duration::from_millis(300);

/// Reasoning-effort setting forwarded to the model on every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    Minimal,
    Low,
    Medium,
    High,
}

impl ThinkingLevel {
    pub const DEFAULT: ThinkingLevel = ThinkingLevel::Minimal;

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "minimal" => Some(ThinkingLevel::Minimal),
            "low" => Some(ThinkingLevel::Low),
            "medium" => Some(ThinkingLevel::Medium),
            "high" => Some(ThinkingLevel::High),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ThinkingLevel::Minimal => "minimal",
            ThinkingLevel::Low => "low",
            ThinkingLevel::Medium => "medium",
            ThinkingLevel::High => "high",
        }
    }
}

/// Invalid values fall back to the minimal level with a warning.
pub fn resolve_thinking_level(raw: Option<&str>) -> ThinkingLevel {
    let Some(raw) = raw else {
        return ThinkingLevel::DEFAULT;
    };
    match ThinkingLevel::parse(raw) {
        Some(level) => level,
        None => {
            log::warn!(
                "[Gemini] invalid thinking level, using {}: {}",
                ThinkingLevel::DEFAULT.as_str(),
                raw
            );
            ThinkingLevel::DEFAULT
        }
    }
}

pub fn prompt_cache_enabled(raw: &str) -> bool {
    !matches!(raw.trim().to_lowercase().as_str(), "0" | "false" | "off" | "no")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiSettings {
    pub model_override: Option<String>,
    pub thinking_level: ThinkingLevel,
    pub enable_prompt_cache: bool,
    pub prompt_cache_ttl: String,
    pub request_timeout: Duration,
    pub max_transient_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for GeminiSettings {
    fn default() -> Self {
        Self {
            model_override: None,
            thinking_level: ThinkingLevel::DEFAULT,
            enable_prompt_cache: true,
            prompt_cache_ttl: DEFAULT_PROMPT_CACHE_TTL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_transient_retries: MAX_TRANSIENT_RETRIES,
            retry_backoff: RETRY_BACKOFF,
        }
    }
}

impl GeminiSettings {
    pub fn from_env() -> Self {
        let model_override = std::env::var(MODEL_ENV_VAR)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let thinking_level =
            resolve_thinking_level(std::env::var(THINKING_LEVEL_ENV_VAR).ok().as_deref());
        let enable_prompt_cache = std::env::var(ENABLE_PROMPT_CACHE_ENV_VAR)
            .map(|raw| prompt_cache_enabled(&raw))
            .unwrap_or(true);
        let prompt_cache_ttl = std::env::var(PROMPT_CACHE_TTL_ENV_VAR)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PROMPT_CACHE_TTL.to_string());

        Self {
            model_override,
            thinking_level,
            enable_prompt_cache,
            prompt_cache_ttl,
            ..Default::default()
        }
    }
}

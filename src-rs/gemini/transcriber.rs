use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::time::Instant;

use crate::config::GeminiSettings;
use crate::gemini::cache::{PromptCache, ThinkingMode};
use crate::gemini::catalog;
use crate::gemini::client::{GeminiApi, GenerateConfig, HttpGeminiClient};
use crate::gemini::faults::{classify, FaultKind};
use crate::gemini::retry::{self, RetryPolicy};
use crate::prompt::{self, TRANSCRIBE_PROMPT};

lazy_static! {
    static ref MARKUP_TAG: Regex = Regex::new(r"<[^>]+>").unwrap();
}

fn format_timed_log(label: &str, elapsed_seconds: f64, message: &str) -> String {
    format!("[{label} {elapsed_seconds:.2}s] {message}")
}

/// One transcription session: current model, reasoning mode and prompt-cache
/// handles. `transcribe` takes `&mut self`, so a session carries one call at
/// a time; concurrent callers need separate sessions.
pub struct Transcriber<C: GeminiApi> {
    api: C,
    settings: GeminiSettings,
    system_prompt: String,
    model_name: String,
    thinking_mode: ThinkingMode,
    cache: PromptCache,
    policy: RetryPolicy,
}

impl Transcriber<HttpGeminiClient> {
    /// Builds a session against the live Gemini API. The key falls back to
    /// `GOOGLE_API_KEY`; a missing key is the one construction error.
    pub async fn connect(api_key: Option<&str>) -> Result<Self> {
        let api_key = api_key
            .map(str::to_string)
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
            .filter(|key| !key.is_empty());
        let Some(api_key) = api_key else {
            anyhow::bail!("GOOGLE_API_KEY is not set");
        };

        let settings = GeminiSettings::from_env();
        let api = HttpGeminiClient::new(api_key, settings.request_timeout);
        let system_prompt = prompt::build_system_prompt();
        Self::with_api(api, settings, system_prompt).await
    }
}

impl<C: GeminiApi> Transcriber<C> {
    /// Session construction over an arbitrary transport: resolves the initial
    /// model and warms the prompt cache for it.
    pub async fn with_api(api: C, settings: GeminiSettings, system_prompt: String) -> Result<Self> {
        let model_name =
            catalog::resolve_model(&api, settings.model_override.as_deref(), &HashSet::new())
                .await
                .unwrap_or_default();

        let mut cache = PromptCache::new(
            settings.enable_prompt_cache,
            settings.prompt_cache_ttl.clone(),
        );
        if !model_name.is_empty() {
            cache.ensure(&api, &model_name, &system_prompt).await;
        }

        log::info!("[Gemini] using model: {}", model_name);
        log::info!(
            "[Gemini] thinking mode: level ({})",
            settings.thinking_level.as_str()
        );

        let policy = RetryPolicy {
            max_transient_retries: settings.max_transient_retries,
            backoff: settings.retry_backoff,
        };

        Ok(Self {
            api,
            settings,
            system_prompt,
            model_name,
            thinking_mode: ThinkingMode::Level,
            cache,
            policy,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn thinking_mode(&self) -> ThinkingMode {
        self.thinking_mode
    }

    /// Config the next request for the current model would carry.
    pub fn request_config(&self) -> GenerateConfig {
        self.cache.generate_config(
            &self.model_name,
            &self.system_prompt,
            self.thinking_mode,
            self.settings.thinking_level,
        )
    }

    /// Reads an audio file and transcribes it. Errors only on a missing or
    /// unreadable file; provider failures are absorbed as in `transcribe`.
    pub async fn transcribe_file(&mut self, audio_path: &Path) -> Result<(String, f64)> {
        if !audio_path.exists() {
            anyhow::bail!("Audio file not found: {}", audio_path.display());
        }
        let audio_data = std::fs::read(audio_path)
            .with_context(|| format!("Failed to read audio file: {}", audio_path.display()))?;
        Ok(self.transcribe(&audio_data).await)
    }

    /// Transcribes raw audio bytes, returning `(text, elapsed_seconds)`.
    ///
    /// Never fails on provider errors: recoverable faults are retried or
    /// failed over, anything else is logged and collapsed into an empty
    /// result. An empty string can therefore mean silent audio or an
    /// unrecoverable failure; the log distinguishes the two.
    pub async fn transcribe(&mut self, audio_data: &[u8]) -> (String, f64) {
        let start = Instant::now();

        let mut outcome = self.generate_with_retry(audio_data).await;
        let mut fault = outcome.as_ref().err().map(classify);

        if fault == Some(FaultKind::CacheInvalid) {
            log::warn!(
                "[Gemini] cached content rejected, retrying with inline system instruction (model={})",
                self.model_name
            );
            self.cache.invalidate(&self.model_name);
            outcome = self.generate_with_retry(audio_data).await;
            fault = outcome.as_ref().err().map(classify);
        }

        if let Some(kind @ (FaultKind::ModelNotFound | FaultKind::Transient)) = fault {
            let mut excluded = HashSet::new();
            excluded.insert(self.model_name.clone());
            let fallback = catalog::resolve_model(
                &self.api,
                self.settings.model_override.as_deref(),
                &excluded,
            )
            .await;

            if let Some(fallback_model) = fallback {
                let reason = match kind {
                    FaultKind::ModelNotFound => "model not found",
                    _ => "transient API error persisted",
                };
                log::warn!(
                    "[Gemini] {}, switching model: {} -> {}",
                    reason,
                    self.model_name,
                    fallback_model
                );
                self.model_name = fallback_model;
                self.cache
                    .ensure(&self.api, &self.model_name, &self.system_prompt)
                    .await;
                outcome = self.generate_with_retry(audio_data).await;
            }
        }

        let elapsed = start.elapsed().as_secs_f64();
        match outcome {
            Ok(response) => {
                let result = clean_response_text(&extract_response_text(&response));
                log::info!(
                    "{}",
                    format_timed_log(
                        "Gemini",
                        elapsed,
                        &format!("{} (model={})", result, self.model_name)
                    )
                );
                (result, elapsed)
            }
            Err(e) => {
                log::error!(
                    "{}",
                    format_timed_log(
                        "Gemini",
                        elapsed,
                        &format!("API call failed (model={}): {:#}", self.model_name, e)
                    )
                );
                (String::new(), elapsed)
            }
        }
    }

    async fn generate_with_retry(&mut self, audio_data: &[u8]) -> Result<Value> {
        let policy = self.policy;
        let level = self.settings.thinking_level;
        let api = &self.api;
        let cache = &self.cache;
        let system_prompt = &self.system_prompt;
        let model = self.model_name.clone();
        let mode = &mut self.thinking_mode;

        retry::execute(&policy, mode, |current_mode| {
            let config = cache.generate_config(&model, system_prompt, current_mode, level);
            let model = model.clone();
            async move {
                api.generate_content(&model, TRANSCRIBE_PROMPT, audio_data, &config)
                    .await
            }
        })
        .await
    }
}

/// Prefers the top-level `text` field, then concatenates every text part
/// across the candidates. A missing or empty structure is an empty string,
/// not an error.
fn extract_response_text(response: &Value) -> String {
    if let Some(direct) = response.get("text").and_then(|t| t.as_str()) {
        if !direct.is_empty() {
            return direct.to_string();
        }
    }

    let Some(candidates) = response.get("candidates").and_then(|c| c.as_array()) else {
        return String::new();
    };

    let mut text = String::new();
    for candidate in candidates {
        let Some(parts) = candidate.pointer("/content/parts").and_then(|p| p.as_array()) else {
            continue;
        };
        for part in parts {
            if let Some(part_text) = part.get("text").and_then(|t| t.as_str()) {
                text.push_str(part_text);
            }
        }
    }
    text
}

/// Strips surrounding whitespace and markup-like `<...>` tags the model may
/// echo despite being told not to.
fn clean_response_text(raw: &str) -> String {
    MARKUP_TAG.replace_all(raw, "").trim().to_string()
}

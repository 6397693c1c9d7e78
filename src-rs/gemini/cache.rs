use std::collections::HashMap;

use crate::config::ThinkingLevel;
use crate::gemini::client::{GeminiApi, GenerateConfig, ThinkingDirective};

/// Per-client reasoning-effort mode. Starts at `Level`; downgrades to
/// `BudgetZero` once the provider rejects the level control. One-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkingMode {
    Level,
    BudgetZero,
}

/// Server-side prompt cache handles, at most one per model. Caching is an
/// optimization: every failure here falls back to the inline instruction.
#[derive(Debug)]
pub struct PromptCache {
    enabled: bool,
    ttl: String,
    names: HashMap<String, String>,
}

impl PromptCache {
    pub fn new(enabled: bool, ttl: String) -> Self {
        Self {
            enabled,
            ttl,
            names: HashMap::new(),
        }
    }

    pub fn cached_name(&self, model: &str) -> Option<&str> {
        self.names.get(model).map(String::as_str)
    }

    /// Best-effort cache creation. No-op when caching is disabled or an
    /// entry for `model` already exists.
    pub async fn ensure<C: GeminiApi>(&mut self, api: &C, model: &str, system_instruction: &str) {
        if !self.enabled || self.names.contains_key(model) {
            return;
        }

        match api.create_cache(model, system_instruction, &self.ttl).await {
            Ok(cache_name) => {
                log::info!(
                    "[Gemini] Prompt cache created: {} (model={})",
                    cache_name,
                    model
                );
                self.names.insert(model.to_string(), cache_name);
            }
            Err(e) => {
                log::warn!(
                    "[Gemini] Prompt cache unavailable, using inline system instruction: {:#}",
                    e
                );
            }
        }
    }

    pub fn invalidate(&mut self, model: &str) {
        if self.names.remove(model).is_some() {
            log::warn!("[Gemini] Prompt cache dropped (model={})", model);
        }
    }

    /// Builds the request config for `model`: a cache reference when a handle
    /// exists, the full inline instruction otherwise. Temperature is pinned
    /// to 0 for deterministic transcription.
    pub fn generate_config(
        &self,
        model: &str,
        system_instruction: &str,
        mode: ThinkingMode,
        level: ThinkingLevel,
    ) -> GenerateConfig {
        let thinking = match mode {
            ThinkingMode::Level => ThinkingDirective::Level(level),
            ThinkingMode::BudgetZero => ThinkingDirective::BudgetZero,
        };

        match self.names.get(model) {
            Some(cache_name) => GenerateConfig {
                cached_content: Some(cache_name.clone()),
                system_instruction: None,
                thinking,
                temperature: 0.0,
            },
            None => GenerateConfig {
                cached_content: None,
                system_instruction: Some(system_instruction.to_string()),
                thinking,
                temperature: 0.0,
            },
        }
    }
}

use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::ThinkingLevel;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const AUDIO_MIME_TYPE: &str = "audio/wav";
pub const CACHE_DISPLAY_NAME: &str = "voicescribe-system-prompt-cache";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "supportedGenerationMethods", default)]
    pub supported_actions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ThinkingDirective {
    Level(ThinkingLevel),
    BudgetZero,
}

/// Per-request generation config. `cached_content` and `system_instruction`
/// are mutually exclusive: a cache handle replaces the inline instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateConfig {
    pub cached_content: Option<String>,
    pub system_instruction: Option<String>,
    pub thinking: ThinkingDirective,
    pub temperature: f32,
}

/// Provider transport seam. The orchestration layer only talks to this trait,
/// so tests can script responses without touching the network.
#[allow(async_fn_in_trait)]
pub trait GeminiApi: Send + Sync {
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    async fn generate_content(
        &self,
        model: &str,
        prompt: &str,
        audio_data: &[u8],
        config: &GenerateConfig,
    ) -> Result<Value>;

    /// Creates a server-side cache of the system instruction, returning its
    /// opaque name.
    async fn create_cache(&self, model: &str, system_instruction: &str, ttl: &str)
        -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct ListModelsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

fn generation_config_json(config: &GenerateConfig) -> Value {
    let thinking = match &config.thinking {
        ThinkingDirective::Level(level) => json!({ "thinkingLevel": level.as_str() }),
        ThinkingDirective::BudgetZero => json!({ "thinkingBudget": 0 }),
    };
    json!({
        "temperature": config.temperature,
        "thinkingConfig": thinking,
    })
}

fn generate_request_body(prompt: &str, audio_data: &[u8], config: &GenerateConfig) -> Value {
    let mut request_body = json!({
        "contents": [{
            "role": "user",
            "parts": [
                { "text": prompt },
                {
                    "inlineData": {
                        "mimeType": AUDIO_MIME_TYPE,
                        "data": general_purpose::STANDARD.encode(audio_data),
                    }
                },
            ]
        }],
        "generationConfig": generation_config_json(config),
    });

    if let Some(cache_name) = &config.cached_content {
        request_body["cachedContent"] = json!(cache_name);
    } else if let Some(instruction) = &config.system_instruction {
        request_body["systemInstruction"] = json!({ "parts": [{ "text": instruction }] });
    }

    request_body
}

#[derive(Debug, Clone)]
pub struct HttpGeminiClient {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl HttpGeminiClient {
    pub fn new(api_key: String, timeout: Duration) -> Self {
        Self {
            base_url: GEMINI_BASE_URL.to_string(),
            api_key,
            timeout,
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .context("Failed to build HTTP client")
    }

    async fn read_json_response(response: reqwest::Response) -> Result<Value> {
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Gemini API error ({}): {}", status, error_text);
        }
        response
            .json()
            .await
            .context("Failed to parse Gemini API response")
    }
}

impl GeminiApi for HttpGeminiClient {
    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!(
            "{}/models?key={}",
            self.base_url.trim_end_matches('/'),
            self.api_key
        );

        let response = self
            .http_client()?
            .get(&url)
            .send()
            .await
            .context("Failed to list Gemini models")?;
        let body = Self::read_json_response(response).await?;
        let parsed: ListModelsResponse = serde_json::from_value(body)
            .context("Failed to parse Gemini model list")?;
        Ok(parsed
            .models
            .into_iter()
            .filter(|model| !model.name.is_empty())
            .collect())
    }

    async fn generate_content(
        &self,
        model: &str,
        prompt: &str,
        audio_data: &[u8],
        config: &GenerateConfig,
    ) -> Result<Value> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url.trim_end_matches('/'),
            model,
            self.api_key
        );
        let request_body = generate_request_body(prompt, audio_data, config);

        let response = self
            .http_client()?
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await
            .context("Failed to send request to Gemini API")?;
        Self::read_json_response(response).await
    }

    async fn create_cache(
        &self,
        model: &str,
        system_instruction: &str,
        ttl: &str,
    ) -> Result<String> {
        let url = format!(
            "{}/cachedContents?key={}",
            self.base_url.trim_end_matches('/'),
            self.api_key
        );
        let request_body = json!({
            "model": format!("models/{}", model),
            "systemInstruction": { "parts": [{ "text": system_instruction }] },
            "ttl": ttl,
            "displayName": CACHE_DISPLAY_NAME,
        });

        let response = self
            .http_client()?
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await
            .context("Failed to create Gemini prompt cache")?;
        let body = Self::read_json_response(response).await?;

        let cache_name = body
            .get("name")
            .and_then(|n| n.as_str())
            .unwrap_or_default();
        if cache_name.is_empty() {
            anyhow::bail!("Gemini cache create response carried no name");
        }
        Ok(cache_name.to_string())
    }
}

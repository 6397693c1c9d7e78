use anyhow::Result;
use std::collections::HashSet;

use crate::gemini::client::GeminiApi;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

pub const PREFERRED_MODELS: [&str; 4] = [
    "gemini-3-flash-preview",
    DEFAULT_MODEL,
    "gemini-2.0-flash",
    "gemini-flash-latest",
];

/// Legacy names are mapped to their current equivalent at normalization time.
const MODEL_ALIASES: [(&str, &str); 1] = [("gemini-3.0-flash", "gemini-3-flash-preview")];

const GENERATE_ACTION: &str = "generateContent";

/// Strips the provider `models/` prefix and applies the alias table.
/// Idempotent: aliases never map onto another alias key.
pub fn normalize_model_name(model_name: &str) -> String {
    let normalized = model_name
        .strip_prefix("models/")
        .unwrap_or(model_name)
        .trim();
    for (legacy, current) in MODEL_ALIASES {
        if normalized == legacy {
            return current.to_string();
        }
    }
    normalized.to_string()
}

/// Preference-ordered candidate list: explicit override first, then the
/// preferred models, first occurrence wins.
pub fn build_candidates(override_model: Option<&str>) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();

    if let Some(configured) = override_model {
        let configured = normalize_model_name(configured);
        if !configured.is_empty() {
            candidates.push(configured);
        }
    }

    for model_name in PREFERRED_MODELS {
        if !candidates.iter().any(|c| c == model_name) {
            candidates.push(model_name.to_string());
        }
    }

    candidates
}

async fn list_generation_models<C: GeminiApi>(api: &C) -> Result<Vec<String>> {
    let mut available = Vec::new();
    for model in api.list_models().await? {
        if !model.supported_actions.iter().any(|a| a == GENERATE_ACTION) {
            continue;
        }
        if model.name.is_empty() {
            continue;
        }
        available.push(normalize_model_name(&model.name));
    }
    Ok(available)
}

/// Resolves the model to use, skipping `excluded` entries.
///
/// When the live model list cannot be fetched, the configured override (or
/// the default model) is assumed usable: availability over certainty. Makes
/// at most one list call.
pub async fn resolve_model<C: GeminiApi>(
    api: &C,
    override_model: Option<&str>,
    excluded: &HashSet<String>,
) -> Option<String> {
    let candidates = build_candidates(override_model);
    let configured = override_model
        .map(normalize_model_name)
        .filter(|m| !m.is_empty());

    let available = match list_generation_models(api).await {
        Ok(available) => available,
        Err(e) => {
            if let Some(configured) = configured {
                if !excluded.contains(&configured) {
                    log::warn!(
                        "[Gemini] model list unavailable, using configured model {}: {:#}",
                        configured,
                        e
                    );
                    return Some(configured);
                }
            }
            if !excluded.contains(DEFAULT_MODEL) {
                log::warn!(
                    "[Gemini] model list unavailable, using default model {}: {:#}",
                    DEFAULT_MODEL,
                    e
                );
                return Some(DEFAULT_MODEL.to_string());
            }
            return None;
        }
    };

    for candidate in &candidates {
        if available.contains(candidate) && !excluded.contains(candidate) {
            return Some(candidate.clone());
        }
    }

    for model in &available {
        if !excluded.contains(model) {
            log::warn!(
                "[Gemini] no preferred model available, falling back to {}",
                model
            );
            return Some(model.clone());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemini::client::{GenerateConfig, ModelInfo};
    use serde_json::Value;

    struct ListOnlyApi {
        models: Result<Vec<ModelInfo>, String>,
    }

    impl GeminiApi for ListOnlyApi {
        async fn list_models(&self) -> Result<Vec<ModelInfo>> {
            match &self.models {
                Ok(models) => Ok(models.clone()),
                Err(message) => Err(anyhow::anyhow!("{}", message)),
            }
        }

        async fn generate_content(
            &self,
            _model: &str,
            _prompt: &str,
            _audio_data: &[u8],
            _config: &GenerateConfig,
        ) -> Result<Value> {
            anyhow::bail!("generate_content is not scripted for this test")
        }

        async fn create_cache(
            &self,
            _model: &str,
            _system_instruction: &str,
            _ttl: &str,
        ) -> Result<String> {
            anyhow::bail!("create_cache is not scripted for this test")
        }
    }

    fn live(names: &[&str]) -> ListOnlyApi {
        ListOnlyApi {
            models: Ok(names
                .iter()
                .map(|name| ModelInfo {
                    name: format!("models/{name}"),
                    supported_actions: vec![GENERATE_ACTION.to_string()],
                })
                .collect()),
        }
    }

    fn unreachable_list() -> ListOnlyApi {
        ListOnlyApi {
            models: Err("network error".to_string()),
        }
    }

    fn excluding(names: &[&str]) -> HashSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn normalize_strips_provider_prefix() {
        assert_eq!(normalize_model_name("models/gemini-2.5-flash"), "gemini-2.5-flash");
        assert_eq!(normalize_model_name(" gemini-2.5-flash "), "gemini-2.5-flash");
    }

    #[test]
    fn normalize_applies_alias_table() {
        assert_eq!(normalize_model_name("gemini-3.0-flash"), "gemini-3-flash-preview");
        assert_eq!(normalize_model_name("models/gemini-3.0-flash"), "gemini-3-flash-preview");
    }

    #[test]
    fn normalize_is_idempotent() {
        for name in ["models/gemini-3.0-flash", "gemini-2.5-flash", "models/x", ""] {
            let once = normalize_model_name(name);
            assert_eq!(normalize_model_name(&once), once, "{name}");
        }
    }

    #[test]
    fn candidates_put_override_first_and_deduplicate() {
        let candidates = build_candidates(Some("gemini-2.0-flash"));
        assert_eq!(candidates[0], "gemini-2.0-flash");
        assert_eq!(
            candidates.iter().filter(|c| c.as_str() == "gemini-2.0-flash").count(),
            1
        );
        assert_eq!(candidates.len(), PREFERRED_MODELS.len());
    }

    #[test]
    fn candidates_without_override_follow_preferred_order() {
        let candidates = build_candidates(None);
        assert_eq!(candidates, PREFERRED_MODELS.map(String::from).to_vec());
    }

    #[tokio::test]
    async fn resolve_prefers_first_live_candidate() {
        let api = live(&["gemini-3-flash-preview", "gemini-2.5-flash"]);
        let resolved = resolve_model(&api, None, &HashSet::new()).await;
        assert_eq!(resolved.as_deref(), Some("gemini-3-flash-preview"));
    }

    #[tokio::test]
    async fn resolve_skips_excluded_models() {
        let api = live(&["gemini-3-flash-preview", "gemini-2.5-flash"]);
        let resolved = resolve_model(&api, None, &excluding(&["gemini-3-flash-preview"])).await;
        assert_eq!(resolved.as_deref(), Some("gemini-2.5-flash"));
    }

    #[tokio::test]
    async fn resolve_honors_live_override() {
        let api = live(&["gemini-3-flash-preview", "gemini-2.0-flash"]);
        let resolved = resolve_model(&api, Some("gemini-2.0-flash"), &HashSet::new()).await;
        assert_eq!(resolved.as_deref(), Some("gemini-2.0-flash"));
    }

    #[tokio::test]
    async fn resolve_falls_back_to_aliased_override_when_list_fails() {
        let api = unreachable_list();
        let resolved = resolve_model(&api, Some("gemini-3.0-flash"), &HashSet::new()).await;
        assert_eq!(resolved.as_deref(), Some("gemini-3-flash-preview"));
    }

    #[tokio::test]
    async fn resolve_falls_back_to_default_when_list_fails_without_override() {
        let api = unreachable_list();
        let resolved = resolve_model(&api, None, &HashSet::new()).await;
        assert_eq!(resolved.as_deref(), Some(DEFAULT_MODEL));
    }

    #[tokio::test]
    async fn resolve_returns_none_when_list_fails_and_default_excluded() {
        let api = unreachable_list();
        let resolved = resolve_model(&api, None, &excluding(&[DEFAULT_MODEL])).await;
        assert_eq!(resolved, None);
    }

    #[tokio::test]
    async fn resolve_last_resort_uses_any_live_model() {
        let api = live(&["gemini-exotic-preview"]);
        let resolved = resolve_model(&api, None, &HashSet::new()).await;
        assert_eq!(resolved.as_deref(), Some("gemini-exotic-preview"));
    }

    #[tokio::test]
    async fn resolve_returns_none_when_everything_is_excluded() {
        let api = live(&["gemini-2.5-flash"]);
        let resolved = resolve_model(&api, None, &excluding(&["gemini-2.5-flash"])).await;
        assert_eq!(resolved, None);
    }

    #[tokio::test]
    async fn resolve_ignores_models_without_generation_support() {
        let api = ListOnlyApi {
            models: Ok(vec![
                ModelInfo {
                    name: "models/gemini-embedding-001".to_string(),
                    supported_actions: vec!["embedContent".to_string()],
                },
                ModelInfo {
                    name: "models/gemini-2.5-flash".to_string(),
                    supported_actions: vec![GENERATE_ACTION.to_string()],
                },
            ]),
        };
        let resolved = resolve_model(&api, None, &HashSet::new()).await;
        assert_eq!(resolved.as_deref(), Some("gemini-2.5-flash"));
    }
}

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref HTTP_STATUS_HINT: Regex = Regex::new(r"\b(429|500|502|503|504)\b").unwrap();
}

const TRANSIENT_PATTERNS: [&str; 5] = [
    "deadline expired",
    "timed out",
    "timeout",
    "temporarily unavailable",
    "service unavailable",
];

/// Recovery category of a failed provider call.
///
/// `ModelNotFound` and `Transient` are recovered by the orchestrator
/// (failover / retry), `ThinkingUnsupported` by a one-shot mode downgrade,
/// `CacheInvalid` by dropping the cached-content handle. `Fatal` is absorbed
/// into an empty result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    ModelNotFound,
    Transient,
    ThinkingUnsupported,
    CacheInvalid,
    Fatal,
}

pub fn classify(error: &anyhow::Error) -> FaultKind {
    classify_message(&format!("{error:#}"))
}

/// Classifies a raw provider failure by its textual representation.
///
/// The thinking-level and cached-content checks run before the generic
/// transient/not-found ones: their messages can carry transient-looking
/// tokens (status codes, "not found") but need a different recovery action.
pub fn classify_message(message: &str) -> FaultKind {
    let message = message.to_lowercase();

    if is_thinking_level_unsupported(&message) {
        return FaultKind::ThinkingUnsupported;
    }
    if is_cache_invalid(&message) {
        return FaultKind::CacheInvalid;
    }
    if is_model_not_found(&message) {
        return FaultKind::ModelNotFound;
    }
    if is_transient(&message) {
        return FaultKind::Transient;
    }
    FaultKind::Fatal
}

fn is_model_not_found(message: &str) -> bool {
    message.contains("is not found for api version")
        || (message.contains("404") && message.contains("models/") && message.contains("not found"))
}

fn is_transient(message: &str) -> bool {
    TRANSIENT_PATTERNS.iter().any(|p| message.contains(p))
        || HTTP_STATUS_HINT.is_match(message)
        || message.contains("too many requests")
}

fn is_thinking_level_unsupported(message: &str) -> bool {
    message.contains("thinking level is not supported")
}

fn is_cache_invalid(message: &str) -> bool {
    let mentions_cache_entity =
        message.contains("cachedcontent") || message.contains("cached content");
    if !mentions_cache_entity {
        return false;
    }
    message.contains("not found")
        || message.contains("expired")
        || message.contains("permission denied")
        || message.contains("permission_denied")
}

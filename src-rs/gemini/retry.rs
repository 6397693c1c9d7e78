use anyhow::Result;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

use crate::config::{MAX_TRANSIENT_RETRIES, RETRY_BACKOFF};
use crate::gemini::cache::ThinkingMode;
use crate::gemini::faults::{classify, FaultKind};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_transient_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_transient_retries: MAX_TRANSIENT_RETRIES,
            backoff: RETRY_BACKOFF,
        }
    }
}

/// Runs one logical request with bounded transient retries and linear
/// backoff. Makes at most `max_transient_retries + 1` attempts, plus one
/// extra attempt when the provider rejects the thinking level: the mode is
/// flipped to `BudgetZero` permanently and the request is repeated once,
/// outside the transient-retry budget.
///
/// `ModelNotFound`, `CacheInvalid` and `Fatal` faults are never retried
/// here; they surface to the orchestrator.
pub async fn execute<F, Fut>(
    policy: &RetryPolicy,
    mode: &mut ThinkingMode,
    mut attempt: F,
) -> Result<Value>
where
    F: FnMut(ThinkingMode) -> Fut,
    Fut: Future<Output = Result<Value>>,
{
    let mut attempt_index = 0u32;
    loop {
        match attempt(*mode).await {
            Ok(response) => return Ok(response),
            Err(e) => match classify(&e) {
                FaultKind::ThinkingUnsupported if *mode == ThinkingMode::Level => {
                    *mode = ThinkingMode::BudgetZero;
                    log::warn!(
                        "[Gemini] thinking level rejected by the model, switching to thinking_budget=0"
                    );
                    return attempt(*mode).await;
                }
                FaultKind::Transient if attempt_index < policy.max_transient_retries => {
                    attempt_index += 1;
                    log::warn!(
                        "[Gemini] transient API error, retrying ({}/{}): {:#}",
                        attempt_index,
                        policy.max_transient_retries,
                        e
                    );
                    tokio::time::sleep(policy.backoff * attempt_index).await;
                }
                _ => return Err(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_transient_retries: 1,
            backoff: Duration::from_millis(1),
        }
    }

    fn script(outcomes: Vec<Result<Value>>) -> RefCell<VecDeque<Result<Value>>> {
        RefCell::new(outcomes.into_iter().collect())
    }

    #[tokio::test]
    async fn transient_failure_then_success_makes_two_calls() {
        let calls = Cell::new(0u32);
        let outcomes = script(vec![
            Err(anyhow::anyhow!("503 Service Unavailable")),
            Ok(serde_json::json!({"text": "ok"})),
        ]);
        let mut mode = ThinkingMode::Level;

        let result = execute(&quick_policy(), &mut mode, |_| {
            calls.set(calls.get() + 1);
            let next = outcomes.borrow_mut().pop_front().expect("scripted outcome");
            async move { next }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.get(), 2);
        assert_eq!(mode, ThinkingMode::Level);
    }

    #[tokio::test]
    async fn exhausted_transient_retries_raise_the_last_error() {
        let calls = Cell::new(0u32);
        let outcomes = script(vec![
            Err(anyhow::anyhow!("504 Deadline expired")),
            Err(anyhow::anyhow!("504 Deadline expired again")),
        ]);
        let mut mode = ThinkingMode::Level;

        let result = execute(&quick_policy(), &mut mode, |_| {
            calls.set(calls.get() + 1);
            let next = outcomes.borrow_mut().pop_front().expect("scripted outcome");
            async move { next }
        })
        .await;

        let error = result.expect_err("retries should be exhausted");
        assert!(error.to_string().contains("again"));
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn thinking_unsupported_triggers_one_extra_budget_zero_call() {
        let modes = RefCell::new(Vec::new());
        let outcomes = script(vec![
            Err(anyhow::anyhow!("Thinking level is not supported")),
            Ok(serde_json::json!({"text": "ok"})),
        ]);
        let mut mode = ThinkingMode::Level;

        let result = execute(&quick_policy(), &mut mode, |current| {
            modes.borrow_mut().push(current);
            let next = outcomes.borrow_mut().pop_front().expect("scripted outcome");
            async move { next }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(
            *modes.borrow(),
            vec![ThinkingMode::Level, ThinkingMode::BudgetZero]
        );
        assert_eq!(mode, ThinkingMode::BudgetZero);
    }

    #[tokio::test]
    async fn failed_downgrade_attempt_raises_without_further_retries() {
        let calls = Cell::new(0u32);
        let outcomes = script(vec![
            Err(anyhow::anyhow!("Thinking level is not supported")),
            Err(anyhow::anyhow!("503 Service Unavailable")),
        ]);
        let mut mode = ThinkingMode::Level;

        let result = execute(&quick_policy(), &mut mode, |_| {
            calls.set(calls.get() + 1);
            let next = outcomes.borrow_mut().pop_front().expect("scripted outcome");
            async move { next }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 2);
        assert_eq!(mode, ThinkingMode::BudgetZero);
    }

    #[tokio::test]
    async fn thinking_unsupported_in_budget_zero_mode_is_raised() {
        let calls = Cell::new(0u32);
        let outcomes = script(vec![Err(anyhow::anyhow!("Thinking level is not supported"))]);
        let mut mode = ThinkingMode::BudgetZero;

        let result = execute(&quick_policy(), &mut mode, |_| {
            calls.set(calls.get() + 1);
            let next = outcomes.borrow_mut().pop_front().expect("scripted outcome");
            async move { next }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn fatal_and_not_found_faults_are_never_retried() {
        for message in [
            "API key not valid",
            "404 models/gemini-x is not found for API version v1beta",
            "403 permission denied on cachedContents/abc123",
        ] {
            let calls = Cell::new(0u32);
            let outcomes = script(vec![Err(anyhow::anyhow!("{}", message))]);
            let mut mode = ThinkingMode::Level;

            let result = execute(&quick_policy(), &mut mode, |_| {
                calls.set(calls.get() + 1);
                let next = outcomes.borrow_mut().pop_front().expect("scripted outcome");
                async move { next }
            })
            .await;

            assert!(result.is_err(), "{message}");
            assert_eq!(calls.get(), 1, "{message}");
        }
    }
}

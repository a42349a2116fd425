use std::time::Duration;

use crate::config::RetryPolicy;
use crate::error::LLMError;

use super::base::{Completer, LLMParams, MessageType, SearchPhase};

pub fn is_transient(error: &anyhow::Error) -> bool {
    !matches!(error.downcast_ref::<LLMError>(), Some(LLMError::Permanent(_)))
}

/// Calls the completer, retrying transient failures with exponential back-off.
pub async fn complete_with_retry(
    llm: &dyn Completer,
    messages: MessageType,
    llm_params: LLMParams,
    search_phase: SearchPhase,
    retry_policy: &RetryPolicy,
) -> anyhow::Result<String> {
    let max_attempts = retry_policy.max_attempts.max(1);
    let mut backoff = Duration::from_millis(retry_policy.initial_backoff_ms);
    let max_backoff = Duration::from_millis(retry_policy.max_backoff_ms);
    let mut attempt = 1;

    loop {
        match llm
            .complete(messages.clone(), llm_params.clone(), Some(search_phase))
            .await
        {
            Ok(response) => return Ok(response),
            Err(e) => {
                if attempt >= max_attempts || !is_transient(&e) {
                    return Err(e);
                }

                tracing::warn!(
                    phase = ?search_phase,
                    attempt,
                    max_attempts,
                    error = %e,
                    "LLM call failed, retrying in {:?}",
                    backoff
                );
                tokio::time::sleep(backoff).await;
                backoff = next_backoff(backoff, max_backoff);
                attempt += 1;
            }
        }
    }
}

fn next_backoff(backoff: Duration, max_backoff: Duration) -> Duration {
    std::cmp::min(backoff.saturating_mul(2), max_backoff)
}

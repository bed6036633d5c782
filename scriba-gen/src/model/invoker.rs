//! Model invocation with rate limiting and retry
//!
//! **Algorithm:**
//! 1. Wait on the shared request gate
//! 2. Call the model
//! 3. Pass the response to the caller's acceptance check
//! 4. On a transient model error or a rejected response: back off, retry
//! 5. On a non-transient model error: fail immediately
//! 6. After `max_attempts` attempts: fail with `RetryExhausted`
//!
//! **Backoff Strategy:** exponential, doubling from `initial_backoff` and
//! capped at `max_backoff`.

use crate::error::{PipelineError, PipelineResult};
use crate::model::{GenerativeModel, ModelRequest, RequestGate};
use scriba_common::config::LlmConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Retry ceiling and backoff bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Delay before attempt `attempt + 1` (attempt is 1-based)
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&LlmConfig::default())
    }
}

/// Accepted model output
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation<T> {
    pub value: T,
    /// Attempts used, including the successful one
    pub attempts: u32,
}

/// Gate + model + retry policy, shared by every component of a session
#[derive(Clone)]
pub struct ModelInvoker {
    model: Arc<dyn GenerativeModel>,
    gate: Arc<RequestGate>,
    policy: RetryPolicy,
}

impl ModelInvoker {
    pub fn new(model: Arc<dyn GenerativeModel>, gate: Arc<RequestGate>, policy: RetryPolicy) -> Self {
        Self {
            model,
            gate,
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Issue `request` until `accept` takes the response or attempts run out
    ///
    /// `accept` turns raw model text into the caller's value, or explains why
    /// the text is unusable (which triggers a retry). `on_retry` is told the
    /// number of the attempt about to start and the previous failure.
    ///
    /// # Errors
    /// - `ModelUnavailable` when the model rejects the request outright
    /// - `RetryExhausted` when every attempt failed
    pub async fn invoke<T, A, R>(
        &self,
        request: &ModelRequest,
        unit_index: Option<usize>,
        mut accept: A,
        mut on_retry: R,
    ) -> PipelineResult<Invocation<T>>
    where
        A: FnMut(&str) -> Result<T, String>,
        R: FnMut(u32, &str),
    {
        let operation = request.operation.label();
        let start_time = Instant::now();
        let mut last_error = String::new();

        for attempt in 1..=self.policy.max_attempts {
            if attempt > 1 {
                let backoff = self.policy.backoff_after(attempt - 1);
                tracing::warn!(
                    operation,
                    unit_index,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %last_error,
                    "Model request failed, will retry after backoff"
                );
                on_retry(attempt, &last_error);
                tokio::time::sleep(backoff).await;
            }

            self.gate.acquire().await;
            tracing::debug!(
                operation,
                unit_index,
                attempt,
                model = self.model.name(),
                text_chars = request.text().len(),
                images = request.image_count(),
                "Issuing model request"
            );

            match self.model.generate(request).await {
                Ok(text) => match accept(&text) {
                    Ok(value) => {
                        if attempt > 1 {
                            tracing::info!(
                                operation,
                                unit_index,
                                attempt,
                                elapsed_ms = start_time.elapsed().as_millis() as u64,
                                "Model request succeeded after retry"
                            );
                        }
                        return Ok(Invocation {
                            value,
                            attempts: attempt,
                        });
                    }
                    Err(reason) => last_error = format!("response rejected: {}", reason),
                },
                Err(err) if err.is_transient() => last_error = err.to_string(),
                Err(err) => {
                    tracing::error!(
                        operation,
                        unit_index,
                        attempt,
                        error = %err,
                        "Model rejected request, not retrying"
                    );
                    return Err(PipelineError::ModelUnavailable(err.to_string()));
                }
            }
        }

        tracing::error!(
            operation,
            unit_index,
            attempts = self.policy.max_attempts,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            error = %last_error,
            "Model request failed: retry ceiling reached"
        );
        Err(PipelineError::RetryExhausted {
            operation: operation.to_string(),
            unit_index,
            attempts: self.policy.max_attempts,
            last_error,
        })
    }
}

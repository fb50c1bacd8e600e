use crate::orchestrator::EvaluationError;
use grader_common::config::RetrySettings;
use grader_common::types::EvaluationJob;
use rand::Rng;
use std::time::Duration;

/// What the queue does with a job whose evaluation failed.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStep {
    /// Terminal domain error; nothing to retry.
    Drop,
    /// Put the next attempt back on the queue once `delay` has passed.
    Requeue { job: EvaluationJob, delay: Duration },
    /// Retries exhausted.
    DeadLetter,
}

/// Decide the fate of a failed job
pub fn next_step(err: &EvaluationError, job: &EvaluationJob, policy: &RetrySettings) -> JobStep {
    if !err.is_retryable() {
        return JobStep::Drop;
    }

    let next = job.next_attempt();
    if next.attempt >= policy.max_attempts {
        return JobStep::DeadLetter;
    }

    let delay = calculate_backoff(next.attempt, policy.backoff_base, policy.backoff_max);
    JobStep::Requeue { job: next, delay }
}

/// Calculate exponential backoff delay with jitter.
///
/// Formula: `min(base * 2^(attempt-1) + jitter, max)` (0-25% jitter)
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let base_ms = base.as_millis() as u64;
    let max_ms = max.as_millis() as u64;
    let exp_factor = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exp_factor);

    let jitter = if delay_ms > 0 {
        rand::rng().random_range(0..=delay_ms / 4)
    } else {
        0
    };

    Duration::from_millis(delay_ms.saturating_add(jitter).min(max_ms))
}

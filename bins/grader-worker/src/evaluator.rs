/// Test Result Aggregator - Language-Agnostic Scoring Logic
///
/// **Core Responsibility:**
/// Reduce per-test executor results plus their declared weights into counts,
/// a weighted score and a single dominant error classification.
///
/// **Critical Properties:**
/// - Knows nothing about HTTP
/// - Knows nothing about the store
/// - Pure function: (test cases, executor results) → outcome
///
/// **Scoring Rules:**
/// - score = max_score * Σ(weight of passed) / Σ(all weights)
/// - rounded half-up to 2 decimals, computed in integer hundredths
/// - zero total weight scores 0
///
/// **Severity Ordering (highest wins):**
/// 1. Any compile-time error → `failed` / `syntax_error`, score forced to 0
/// 2. Any timeout and nothing passed → `timeout` / `timeout`
/// 3. Everything passed → `completed`, no error type
/// 4. Every case crashed at runtime → `completed` / `runtime_error`
/// 5. Anything else → `completed` / `test_failure`, partial score stands
///
/// Case-level infrastructure faults are never scored.

use crate::executor::TestExecutionResult;
use grader_common::types::{CodingTestCase, ErrorType, SubmissionStatus, TestStatus};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq)]
pub enum AggregationError {
    #[error("{results} results for {cases} test cases")]
    CountMismatch { cases: usize, results: usize },

    #[error("no result for test case {0}")]
    MissingResult(Uuid),

    #[error("executor failed internally on test case {0}")]
    Infrastructure(Uuid),
}

/// Verdict of one evaluation pass
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationOutcome {
    pub status: SubmissionStatus,
    pub error_type: Option<ErrorType>,
    pub error_message: Option<String>,
    pub passed_count: u32,
    pub failed_count: u32,
    pub errored_count: u32,
    pub timeout_count: u32,
    pub total_count: u32,
    pub score: f64,
    /// Score earned per test case, in test case order.
    pub case_scores: Vec<f64>,
    pub execution_time_ms: Option<u64>,
    pub memory_kb: Option<u64>,
}

/// `max_score * part / whole`, rounded half-up to 2 decimals
///
/// Widened to `u128` so any `u32` weights and score stay exact. `part` is
/// clamped to `whole`, keeping the result within `[0, max_score]`.
pub fn weighted_score(part: u64, whole: u64, max_score: u32) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    let whole = whole as u128;
    let numerator = 100 * max_score as u128 * (part as u128).min(whole);
    let hundredths = (2 * numerator + whole) / (2 * whole);
    hundredths as f64 / 100.0
}

fn message_of(result: &TestExecutionResult) -> Option<String> {
    result
        .error
        .as_ref()
        .or(result.stderr.as_ref())
        .filter(|m| !m.trim().is_empty())
        .cloned()
}

/// Aggregate executor results into a submission verdict
///
/// ## Arguments
/// * `test_cases` - Active test cases in evaluation order
/// * `max_score` - The assessment's maximum score
/// * `results` - One executor result per test case
pub fn aggregate(
    test_cases: &[CodingTestCase],
    max_score: u32,
    results: &[TestExecutionResult],
) -> Result<EvaluationOutcome, AggregationError> {
    if results.len() != test_cases.len() {
        return Err(AggregationError::CountMismatch {
            cases: test_cases.len(),
            results: results.len(),
        });
    }

    let by_id: HashMap<Uuid, &TestExecutionResult> =
        results.iter().map(|r| (r.test_case_id, r)).collect();
    let ordered: Vec<&TestExecutionResult> = test_cases
        .iter()
        .map(|tc| {
            by_id
                .get(&tc.id)
                .copied()
                .ok_or(AggregationError::MissingResult(tc.id))
        })
        .collect::<Result<_, _>>()?;

    if let Some(faulty) = ordered
        .iter()
        .find(|r| r.error_type == Some(ErrorType::InfrastructureError))
    {
        return Err(AggregationError::Infrastructure(faulty.test_case_id));
    }

    let total_weight: u64 = test_cases.iter().map(|tc| tc.weight as u64).sum();
    let mut passed_weight = 0u64;
    let (mut passed, mut failed, mut errored, mut timed_out) = (0u32, 0u32, 0u32, 0u32);
    let mut case_scores = Vec::with_capacity(test_cases.len());

    for (tc, result) in test_cases.iter().zip(&ordered) {
        match result.status {
            TestStatus::Passed => {
                passed += 1;
                passed_weight += tc.weight as u64;
                case_scores.push(weighted_score(tc.weight as u64, total_weight, max_score));
            }
            TestStatus::Failed => {
                failed += 1;
                case_scores.push(0.0);
            }
            TestStatus::Error => {
                errored += 1;
                case_scores.push(0.0);
            }
            TestStatus::Timeout => {
                timed_out += 1;
                case_scores.push(0.0);
            }
        }

        debug!(
            test_case_id = %tc.id,
            weight = tc.weight,
            status = ?result.status,
            error_type = ?result.error_type,
            execution_ms = result.execution_time_ms,
            "Test case outcome"
        );
    }

    let total = test_cases.len() as u32;
    let compile_error = ordered
        .iter()
        .find(|r| r.error_type.is_some_and(|e| e.is_compile_time()));
    let first_error_message = ordered
        .iter()
        .filter(|r| r.status == TestStatus::Error)
        .find_map(|r| message_of(r));

    let (status, error_type, error_message, score) = if let Some(r) = compile_error {
        case_scores.iter_mut().for_each(|s| *s = 0.0);
        (
            SubmissionStatus::Failed,
            Some(ErrorType::SyntaxError),
            message_of(r),
            0.0,
        )
    } else if timed_out > 0 && passed == 0 {
        (
            SubmissionStatus::Timeout,
            Some(ErrorType::Timeout),
            first_error_message,
            0.0,
        )
    } else if passed == total {
        (
            SubmissionStatus::Completed,
            None,
            None,
            weighted_score(passed_weight, total_weight, max_score),
        )
    } else if passed == 0 && errored == total {
        (
            SubmissionStatus::Completed,
            Some(ErrorType::RuntimeError),
            first_error_message,
            0.0,
        )
    } else {
        (
            SubmissionStatus::Completed,
            Some(ErrorType::TestFailure),
            first_error_message,
            weighted_score(passed_weight, total_weight, max_score),
        )
    };

    Ok(EvaluationOutcome {
        status,
        error_type,
        error_message,
        passed_count: passed,
        failed_count: failed,
        errored_count: errored,
        timeout_count: timed_out,
        total_count: total,
        score,
        case_scores,
        execution_time_ms: ordered.iter().filter_map(|r| r.execution_time_ms).max(),
        memory_kb: ordered.iter().filter_map(|r| r.memory_kb).max(),
    })
}

/// Evaluation Orchestrator - Submission State Machine
///
/// **Responsibility:**
/// Drive one submission from `pending` to a terminal verdict:
/// 1. Load the submission, its assessment and the active test cases
/// 2. Take the single-flight lease for the submission
/// 3. Run the code through the Executor (executor.rs)
/// 4. Score the raw results with the Aggregator (evaluator.rs)
/// 5. Commit result rows, verdict and assignment cascade in one atomic write
///
/// `evaluating` is never persisted; it is the lifetime of the lease.
/// Infrastructure failures leave the submission exactly as it was so the whole
/// evaluation can be retried later.

use crate::evaluator::{self, AggregationError, EvaluationOutcome};
use crate::executor::{Executor, ExecutorError, TestExecutionResult};
use chrono::{DateTime, Utc};
use grader_common::store::{EvaluationCommit, StoreError, SubmissionStore};
use grader_common::types::{
    CodingAssessment, CodingSubmission, CodingSubmissionTestResult, CodingTestCase,
};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Captured stdout/stderr beyond this many characters is dropped
const MAX_CAPTURED_OUTPUT_CHARS: usize = 64 * 1024;

/// Extra lease lifetime on top of the executor deadline, covering store writes
const DEFAULT_LEASE_MARGIN: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("submission {0} not found")]
    SubmissionNotFound(Uuid),

    #[error("assignment {0} not found")]
    AssignmentNotFound(Uuid),

    #[error("assessment {0} not found")]
    AssessmentNotFound(Uuid),

    #[error("assessment {0} has no active test cases")]
    NoTestCases(Uuid),

    #[error("submission {0} was already evaluated")]
    AlreadyEvaluated(Uuid),

    #[error("an evaluation of submission {0} is already in flight")]
    InFlight(Uuid),

    #[error("evaluation infrastructure error: {0}")]
    Infrastructure(#[from] ExecutorError),

    #[error("evaluation infrastructure error: {0}")]
    InvalidResults(#[from] AggregationError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl EvaluationError {
    /// The executor could not produce a usable verdict.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Infrastructure(_) | Self::InvalidResults(_))
    }

    /// Whether re-running the same evaluation later can succeed.
    pub fn is_retryable(&self) -> bool {
        self.is_infrastructure() || matches!(self, Self::InFlight(_) | Self::Store(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EvaluationMode {
    /// First evaluation; the submission must be pending.
    Fresh,
    /// Explicit operator-initiated re-run of any submission.
    Reevaluate,
}

pub struct Orchestrator<E, S> {
    executor: E,
    store: S,
    lease_margin: Duration,
}

impl<E: Executor, S: SubmissionStore> Orchestrator<E, S> {
    pub fn new(executor: E, store: S) -> Self {
        Self {
            executor,
            store,
            lease_margin: DEFAULT_LEASE_MARGIN,
        }
    }

    #[cfg(test)]
    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Evaluate a pending submission.
    pub async fn evaluate_submission(
        &self,
        submission_id: Uuid,
    ) -> Result<CodingSubmission, EvaluationError> {
        self.run(submission_id, EvaluationMode::Fresh).await
    }

    /// Re-run a submission regardless of its current verdict, replacing its
    /// previous result set.
    pub async fn reevaluate_submission(
        &self,
        submission_id: Uuid,
    ) -> Result<CodingSubmission, EvaluationError> {
        self.run(submission_id, EvaluationMode::Reevaluate).await
    }

    #[instrument(skip(self), fields(submission_id = %submission_id))]
    async fn run(
        &self,
        submission_id: Uuid,
        mode: EvaluationMode,
    ) -> Result<CodingSubmission, EvaluationError> {
        let submission = self.load_submission(submission_id).await?;
        check_mode(&submission, mode)?;

        let assessment = self
            .store
            .get_assessment(submission.assessment_id)
            .await?
            .ok_or(EvaluationError::AssessmentNotFound(submission.assessment_id))?;
        let test_cases = assessment.active_test_cases();
        if test_cases.is_empty() {
            return Err(EvaluationError::NoTestCases(assessment.id));
        }

        let ttl = self.executor.deadline(&test_cases) + self.lease_margin;
        let lease = self
            .store
            .acquire_lease(submission_id, ttl)
            .await?
            .ok_or(EvaluationError::InFlight(submission_id))?;

        let outcome = self
            .evaluate_leased(submission_id, mode, &assessment, &test_cases)
            .await;

        if let Err(e) = self.store.release_lease(&lease).await {
            // The lease expires on its own; this only delays the next attempt.
            warn!(error = %e, "Failed to release evaluation lease");
        }

        outcome
    }

    async fn evaluate_leased(
        &self,
        submission_id: Uuid,
        mode: EvaluationMode,
        assessment: &CodingAssessment,
        test_cases: &[CodingTestCase],
    ) -> Result<CodingSubmission, EvaluationError> {
        // Re-read under the lease: a concurrent pass may have finished meanwhile.
        let submission = self.load_submission(submission_id).await?;
        check_mode(&submission, mode)?;

        let mut assignment = self
            .store
            .get_assignment(submission.assignment_id)
            .await?
            .ok_or(EvaluationError::AssignmentNotFound(submission.assignment_id))?;

        info!(
            language = %submission.language,
            test_cases = test_cases.len(),
            reevaluate = mode == EvaluationMode::Reevaluate,
            "Evaluating submission"
        );

        let results = self
            .executor
            .execute(submission.language, &submission.source_code, test_cases)
            .await
            .inspect_err(|e| warn!(error = %e, "Executor infrastructure failure; submission left unevaluated"))?;

        let outcome = evaluator::aggregate(test_cases, assessment.max_score, &results)
            .inspect_err(|e| warn!(error = %e, "Executor results unusable; submission left unevaluated"))?;

        let now = Utc::now();
        let rows = result_rows(submission.id, test_cases, &results, &outcome, now);
        let updated = apply_outcome(submission, &outcome, now);
        let assignment_changed = assignment.mark_submitted(now);

        self.store
            .commit_evaluation(EvaluationCommit {
                submission: updated.clone(),
                results: rows,
                assignment: assignment_changed.then_some(assignment),
            })
            .await?;

        info!(
            status = %updated.status,
            error_type = ?updated.error_type,
            score = updated.score,
            passed = updated.passed_count,
            total = updated.total_count,
            assignment_submitted = assignment_changed,
            "Submission evaluated"
        );

        Ok(updated)
    }

    async fn load_submission(&self, id: Uuid) -> Result<CodingSubmission, EvaluationError> {
        self.store
            .get_submission(id)
            .await?
            .ok_or(EvaluationError::SubmissionNotFound(id))
    }
}

fn check_mode(submission: &CodingSubmission, mode: EvaluationMode) -> Result<(), EvaluationError> {
    if mode == EvaluationMode::Fresh && submission.status.is_terminal() {
        return Err(EvaluationError::AlreadyEvaluated(submission.id));
    }
    Ok(())
}

fn capture(output: Option<&String>) -> Option<String> {
    output.map(|s| s.chars().take(MAX_CAPTURED_OUTPUT_CHARS).collect())
}

fn result_rows(
    submission_id: Uuid,
    test_cases: &[CodingTestCase],
    results: &[TestExecutionResult],
    outcome: &EvaluationOutcome,
    now: DateTime<Utc>,
) -> Vec<CodingSubmissionTestResult> {
    test_cases
        .iter()
        .zip(&outcome.case_scores)
        .filter_map(|(tc, score)| {
            let result = results.iter().find(|r| r.test_case_id == tc.id)?;
            Some(CodingSubmissionTestResult {
                id: Uuid::new_v4(),
                submission_id,
                test_case_id: tc.id,
                status: result.status,
                error_type: result.error_type,
                score_earned: *score,
                execution_time_ms: result.execution_time_ms,
                memory_kb: result.memory_kb,
                stdout: capture(result.stdout.as_ref()),
                stderr: capture(result.stderr.as_ref().or(result.error.as_ref())),
                created_at: now,
            })
        })
        .collect()
}

fn apply_outcome(
    mut submission: CodingSubmission,
    outcome: &EvaluationOutcome,
    now: DateTime<Utc>,
) -> CodingSubmission {
    submission.status = outcome.status;
    submission.error_type = outcome.error_type;
    submission.error_message = outcome.error_message.clone();
    submission.passed_count = outcome.passed_count;
    submission.failed_count = outcome.failed_count;
    submission.errored_count = outcome.errored_count;
    submission.timeout_count = outcome.timeout_count;
    submission.total_count = outcome.total_count;
    submission.score = outcome.score;
    submission.execution_time_ms = outcome.execution_time_ms;
    submission.memory_kb = outcome.memory_kb;
    submission.evaluated_at = Some(now);
    submission
}
